//! Content-addressed blob storage.
//!
//! Each namespace (live videos, Hall of Fame, banned videos, thumbnails) is a
//! separate bucket with its own client, so credentials can be scoped per
//! namespace. Keys are the SHA-256 of the stored bytes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::config::{AppConfig, BucketConfig};
use crate::infra::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobNamespace {
    Videos,
    HallOfFame,
    Banned,
    Thumbnails,
}

impl BlobNamespace {
    /// Query returning whether any row still points at a key in this namespace.
    fn reference_query(&self) -> &'static str {
        match self {
            Self::Videos => "SELECT EXISTS(SELECT 1 FROM videos WHERE content_key = $1)",
            Self::HallOfFame => "SELECT EXISTS(SELECT 1 FROM hall_of_fame WHERE content_key = $1)",
            Self::Banned => "SELECT EXISTS(SELECT 1 FROM banned_videos WHERE content_key = $1)",
            Self::Thumbnails => "SELECT EXISTS(SELECT 1 FROM videos WHERE thumbnail_key = $1)",
        }
    }
}

impl fmt::Display for BlobNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Videos => "videos",
            Self::HallOfFame => "hall_of_fame",
            Self::Banned => "banned",
            Self::Thumbnails => "thumbnails",
        };
        f.write_str(name)
    }
}

/// Hex SHA-256 of the raw bytes, used as the blob key.
pub fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hold the key lock for `key` in `namespace` until `tx` ends.
///
/// Writers take it before storing and [`BlobStores::release`] takes it around the
/// reference check, so a blob is never deleted between its upload and the commit
/// of the row that points at it.
pub(crate) async fn lock_key(
    tx: &mut Transaction<'_, Postgres>,
    namespace: BlobNamespace,
    key: &str,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("{}:{}", namespace, key))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Blobs written on behalf of a transaction that has not committed yet.
#[derive(Debug, Default)]
pub struct StagedBlobs {
    entries: Vec<(BlobNamespace, String)>,
}

impl StagedBlobs {
    pub fn push(&mut self, namespace: BlobNamespace, key: &str) {
        self.entries.push((namespace, key.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything staged. Call only once the owning transaction is gone.
    pub async fn discard(self, db: &Db, blobs: &BlobStores) {
        for (namespace, key) in self.entries {
            warn!(%namespace, key = %key, "releasing blob staged by a rolled-back transaction");
            blobs.release(db, namespace, &key).await;
        }
    }
}

/// Commit `tx` when `outcome` succeeded; otherwise roll it back. Either way a
/// failure discards the blobs staged for it.
pub(crate) async fn commit_or_discard<T>(
    db: &Db,
    blobs: &BlobStores,
    tx: Transaction<'static, Postgres>,
    staged: StagedBlobs,
    outcome: Result<T>,
) -> Result<T> {
    let result = match outcome {
        Ok(value) => tx.commit().await.map(|()| value).map_err(anyhow::Error::from),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = ?rollback_err, "failed to roll back transaction");
            }
            Err(err)
        }
    };
    if result.is_err() && !staged.is_empty() {
        staged.discard(db, blobs).await;
    }
    result
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, key: &str, bytes: Bytes) -> Result<()>;

    /// `Ok(None)` when the key is absent.
    async fn retrieve(&self, key: &str) -> Result<Option<Bytes>>;

    async fn delete(&self, keys: &[String]) -> Result<()>;
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &AppConfig, bucket: &BucketConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        match (&bucket.access_key_id, &bucket.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                s3_builder = s3_builder.credentials_provider(Credentials::new(
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    None,
                    None,
                    "gim-namespace",
                ));
            }
            _ => {
                if let Some(provider) = shared_config.credentials_provider() {
                    s3_builder = s3_builder.credentials_provider(provider);
                }
            }
        }

        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: bucket.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket if it does not exist yet. Used by local setups and tests.
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }
        self.client.create_bucket().bucket(&self.bucket).send().await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Bytes>> {
        let object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(object) => object,
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => return Ok(None),
            Err(err) => return Err(anyhow!(err)),
        };

        let data = object.body.collect().await?.into_bytes();
        Ok(Some(data))
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await?;
        }
        Ok(())
    }
}

/// One store per namespace.
#[derive(Clone)]
pub struct BlobStores {
    pub videos: Arc<dyn BlobStore>,
    pub hall_of_fame: Arc<dyn BlobStore>,
    pub banned: Arc<dyn BlobStore>,
    pub thumbnails: Arc<dyn BlobStore>,
}

impl BlobStores {
    pub async fn s3(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            videos: Arc::new(S3BlobStore::new(config, &config.videos_bucket).await?),
            hall_of_fame: Arc::new(S3BlobStore::new(config, &config.hall_of_fame_bucket).await?),
            banned: Arc::new(S3BlobStore::new(config, &config.banned_bucket).await?),
            thumbnails: Arc::new(S3BlobStore::new(config, &config.thumbnails_bucket).await?),
        })
    }

    pub fn namespace(&self, namespace: BlobNamespace) -> &Arc<dyn BlobStore> {
        match namespace {
            BlobNamespace::Videos => &self.videos,
            BlobNamespace::HallOfFame => &self.hall_of_fame,
            BlobNamespace::Banned => &self.banned,
            BlobNamespace::Thumbnails => &self.thumbnails,
        }
    }

    /// Delete `key` from `namespace` unless a committed row still references it.
    ///
    /// Runs after the owning transaction ends. Failures are logged and swallowed.
    pub async fn release(&self, db: &Db, namespace: BlobNamespace, key: &str) {
        if let Err(err) = self.release_unreferenced(db, namespace, key).await {
            warn!(error = ?err, %namespace, key, "failed to release blob");
        }
    }

    async fn release_unreferenced(
        &self,
        db: &Db,
        namespace: BlobNamespace,
        key: &str,
    ) -> Result<()> {
        let mut tx = db.begin().await?;
        lock_key(&mut tx, namespace, key).await?;
        let referenced: bool = sqlx::query_scalar(namespace.reference_query())
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        if !referenced {
            self.namespace(namespace)
                .delete(&[key.to_string()])
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
