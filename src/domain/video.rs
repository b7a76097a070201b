use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    #[serde(rename = "video_id")]
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub edited_on: OffsetDateTime,
    pub lat: f64,
    pub lon: f64,
    pub tags: Vec<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    /// The requesting user's vote: -1, 0 or 1.
    pub user_vote: i32,
    #[serde(skip_serializing)]
    pub content_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
}

/// Which base filter a feed request starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedType {
    /// Geofenced, tag-filtered, minus videos the requester has flagged.
    Global,
    /// Videos authored by a given user.
    Created,
    /// Videos a given user has upvoted.
    Liked,
}

impl FeedType {
    pub fn from_query(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("main") | Some("global") => Some(Self::Global),
            Some("created") => Some(Self::Created),
            Some("liked") => Some(Self::Liked),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Popular,
    Recent,
}

impl SortBy {
    /// Unknown or missing values fall back to `Popular`.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("recent") => Self::Recent,
            _ => Self::Popular,
        }
    }
}

/// Normalise a requested tag list: trimmed, non-empty, deduplicated, sorted.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

pub const MAX_TAG_LEN: usize = 64;
pub const MAX_TAGS_PER_VIDEO: usize = 20;
