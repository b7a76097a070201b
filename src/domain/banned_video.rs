use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Snapshot of a video removed by moderation. Doubles as a warning against its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannedVideo {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub banned_on: OffsetDateTime,
    pub lat: f64,
    pub lon: f64,
    pub tags: Vec<String>,
    pub user_warned: bool,
    #[serde(skip_serializing)]
    pub content_key: String,
}
