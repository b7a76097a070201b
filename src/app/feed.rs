use anyhow::Result;
use uuid::Uuid;

use crate::app::videos::{video_from_row, VIDEO_COLUMNS};
use crate::config::Policy;
use crate::domain::geo::{bounding_box, Coordinates};
use crate::domain::video::{FeedType, SortBy, Video};
use crate::infra::db::Db;

#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub feed_type: FeedType,
    pub sort: SortBy,
    pub center: Coordinates,
    /// Conjunctive filter; empty means no filter. Global feed only.
    pub tags: Vec<String>,
    /// Whose created/liked videos to list. Ignored by the global feed.
    pub subject_id: Uuid,
    pub limit: i64,
    pub offset: i64,
}

/// Read-only feed queries. Every variant is one statement, so it sees a single snapshot.
#[derive(Clone)]
pub struct FeedService {
    db: Db,
    policy: Policy,
}

impl FeedService {
    pub fn new(db: Db, policy: Policy) -> Self {
        Self { db, policy }
    }

    pub async fn list(&self, viewer_id: Uuid, query: &FeedQuery) -> Result<Vec<Video>> {
        let limit = self.policy.clamp_feed_limit(Some(query.limit));
        let offset = query.offset.max(0);

        let rows = match query.feed_type {
            FeedType::Global => {
                let fence = bounding_box(query.center, self.policy.search_radius_km);
                sqlx::query(&format!(
                    "SELECT * FROM ( \
                         SELECT {} FROM videos v \
                         WHERE v.lat BETWEEN $2 AND $3 \
                           AND v.lon BETWEEN $4 AND $5 \
                           AND (cardinality($6::text[]) = 0 \
                                OR (SELECT COUNT(DISTINCT ft.tag_name) FROM video_tags ft \
                                    WHERE ft.video_id = v.id AND ft.tag_name = ANY($6::text[])) \
                                   = cardinality($6::text[])) \
                           AND NOT EXISTS (SELECT 1 FROM flags f \
                                           WHERE f.video_id = v.id AND f.user_id = $1) \
                     ) feed {} LIMIT $7 OFFSET $8",
                    VIDEO_COLUMNS,
                    order_clause(query.feed_type, query.sort)
                ))
                .bind(viewer_id)
                .bind(fence.lat_min)
                .bind(fence.lat_max)
                .bind(fence.lon_min)
                .bind(fence.lon_max)
                .bind(&query.tags)
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
            FeedType::Created => {
                sqlx::query(&format!(
                    "SELECT * FROM ( \
                         SELECT {} FROM videos v WHERE v.owner_id = $2 \
                     ) feed {} LIMIT $3 OFFSET $4",
                    VIDEO_COLUMNS,
                    order_clause(query.feed_type, query.sort)
                ))
                .bind(viewer_id)
                .bind(query.subject_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
            FeedType::Liked => {
                sqlx::query(&format!(
                    "SELECT * FROM ( \
                         SELECT {}, liked.created_at AS liked_at \
                         FROM videos v \
                         JOIN votes liked ON liked.video_id = v.id \
                                         AND liked.user_id = $2 AND liked.upvote \
                     ) feed {} LIMIT $3 OFFSET $4",
                    VIDEO_COLUMNS,
                    order_clause(query.feed_type, query.sort)
                ))
                .bind(viewer_id)
                .bind(query.subject_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(video_from_row).collect())
    }
}

/// Ordering over the `feed` subquery. Trailing keys make paging deterministic.
fn order_clause(feed_type: FeedType, sort: SortBy) -> &'static str {
    match (feed_type, sort) {
        (_, SortBy::Popular) => {
            "ORDER BY (feed.upvotes - feed.downvotes) DESC, feed.uploaded_on DESC, feed.id DESC"
        }
        (FeedType::Liked, SortBy::Recent) => "ORDER BY feed.liked_at DESC, feed.id DESC",
        (_, SortBy::Recent) => "ORDER BY feed.uploaded_on DESC, feed.id DESC",
    }
}
