pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use crate::config::Policy;
use crate::infra::{cache::RedisCache, db::Db, storage::BlobStores};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub blobs: BlobStores,
    pub policy: Policy,
    pub upload_max_bytes: usize,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
}
