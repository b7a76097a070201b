use anyhow::Result;
use bytes::Bytes;
use sqlx::{Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::scoring::bank_and_purge;
use crate::app::videos::{lock_video, release_video_blobs, video_tags, LockedVideo};
use crate::app::OwnerScoped;
use crate::config::Policy;
use crate::domain::banned_video::BannedVideo;
use crate::domain::user::{Capability, UserGroup, UserStatus};
use crate::infra::db::{retry_on_conflict, Db};
use crate::infra::storage::{commit_or_discard, lock_key, BlobNamespace, BlobStores, StagedBlobs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanReport {
    /// Banned videos now on the owner's record, this one included.
    pub warnings: i64,
    /// True when this ban moved the owner into the restricted group.
    pub newly_restricted: bool,
}

#[derive(Clone)]
pub struct ModerationService {
    db: Db,
    blobs: BlobStores,
    policy: Policy,
}

impl ModerationService {
    pub fn new(db: Db, blobs: BlobStores, policy: Policy) -> Self {
        Self { db, blobs, policy }
    }

    /// Ban a video whose row the caller holds locked.
    ///
    /// Snapshots the video into `banned_videos`, copies its bytes into the banned
    /// namespace, banks its score and deletes it, then escalates the owner to the
    /// restricted group once the warning count reaches the threshold. Live blobs
    /// are left for the caller to release after commit; the banned copy is pushed
    /// onto `staged` so a rollback can release it.
    pub(crate) async fn ban_locked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        video: &LockedVideo,
        staged: &mut StagedBlobs,
    ) -> Result<BanReport> {
        let tags = video_tags(tx, video.id).await?;

        sqlx::query(
            "INSERT INTO banned_videos (id, owner_id, uploaded_on, lat, lon, content_key) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(video.id)
        .bind(video.owner_id)
        .bind(video.uploaded_on)
        .bind(video.lat)
        .bind(video.lon)
        .bind(&video.content_key)
        .execute(&mut **tx)
        .await?;

        if !tags.is_empty() {
            sqlx::query(
                "INSERT INTO banned_video_tags (banned_video_id, tag_name) \
                 SELECT $1, unnest($2::text[])",
            )
            .bind(video.id)
            .bind(&tags)
            .execute(&mut **tx)
            .await?;
        }

        match self.blobs.videos.retrieve(&video.content_key).await? {
            Some(bytes) => {
                lock_key(tx, BlobNamespace::Banned, &video.content_key).await?;
                staged.push(BlobNamespace::Banned, &video.content_key);
                self.blobs
                    .banned
                    .store(&video.content_key, bytes)
                    .await?;
            }
            None => {
                warn!(video_id = %video.id, key = %video.content_key, "banned video has no stored content");
            }
        }

        let net = bank_and_purge(tx, video.id, video.owner_id).await?;
        sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(video.id)
            .execute(&mut **tx)
            .await?;

        let warnings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM banned_videos WHERE owner_id = $1")
                .bind(video.owner_id)
                .fetch_one(&mut **tx)
                .await?;

        let mut newly_restricted = false;
        if self.policy.should_restrict(warnings) {
            let result = sqlx::query(
                "UPDATE users SET user_group = $2 WHERE id = $1 AND user_group <> $2",
            )
            .bind(video.owner_id)
            .bind(UserGroup::Restricted.as_db())
            .execute(&mut **tx)
            .await?;
            newly_restricted = result.rows_affected() > 0;
        }

        info!(
            video_id = %video.id,
            owner_id = %video.owner_id,
            banked = net,
            warnings,
            "video banned"
        );
        if newly_restricted {
            info!(user_id = %video.owner_id, warnings, "user restricted");
        }

        Ok(BanReport {
            warnings,
            newly_restricted,
        })
    }

    /// Operator ban, bypassing vote pressure. `None` when the video does not exist.
    pub async fn ban_video(&self, video_id: Uuid) -> Result<Option<BanReport>> {
        retry_on_conflict("ban_video", || self.try_ban_video(video_id)).await
    }

    async fn try_ban_video(&self, video_id: Uuid) -> Result<Option<BanReport>> {
        let mut tx = self.db.begin().await?;
        let video = match lock_video(&mut tx, video_id).await? {
            Some(video) => video,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };
        let mut staged = StagedBlobs::default();
        let outcome = self.ban_locked(&mut tx, &video, &mut staged).await;
        let report = commit_or_discard(&self.db, &self.blobs, tx, staged, outcome).await?;

        release_video_blobs(&self.db, &self.blobs, &video).await;
        Ok(Some(report))
    }

    /// Report restrictions and surface warnings the user has not seen yet.
    ///
    /// Each warning is returned by exactly one call.
    pub async fn user_status(&self, user_id: Uuid) -> Result<Option<UserStatus>> {
        let mut tx = self.db.begin().await?;
        let group: Option<String> =
            sqlx::query_scalar("SELECT user_group FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(group) = group.as_deref().and_then(UserGroup::from_db) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let warning_ids: Vec<Uuid> = sqlx::query_scalar(
            "WITH shown AS ( \
                 UPDATE banned_videos SET user_warned = TRUE \
                 WHERE owner_id = $1 AND NOT user_warned \
                 RETURNING id, banned_on \
             ) SELECT id FROM shown ORDER BY banned_on, id",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(UserStatus {
            user_id,
            warning_ids,
            vote_restricted: !group.allows(Capability::Vote),
            post_restricted: !group.allows(Capability::Post),
        }))
    }

    pub async fn get_banned_video(
        &self,
        requester_id: Uuid,
        banned_id: Uuid,
    ) -> Result<OwnerScoped<BannedVideo>> {
        let row = sqlx::query(
            "SELECT b.id, b.owner_id, b.uploaded_on, b.banned_on, b.lat, b.lon, b.content_key, \
                    b.user_warned, \
                    COALESCE((SELECT array_agg(t.tag_name ORDER BY t.tag_name) \
                              FROM banned_video_tags t WHERE t.banned_video_id = b.id), \
                             ARRAY[]::text[]) AS tags \
             FROM banned_videos b WHERE b.id = $1",
        )
        .bind(banned_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(OwnerScoped::NotFound);
        };
        let banned = BannedVideo {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            uploaded_on: row.get("uploaded_on"),
            banned_on: row.get("banned_on"),
            lat: row.get("lat"),
            lon: row.get("lon"),
            tags: row.get("tags"),
            user_warned: row.get("user_warned"),
            content_key: row.get("content_key"),
        };
        if banned.owner_id != requester_id {
            return Ok(OwnerScoped::NotOwner);
        }
        Ok(OwnerScoped::Done(banned))
    }

    pub async fn banned_video_file(
        &self,
        requester_id: Uuid,
        banned_id: Uuid,
    ) -> Result<OwnerScoped<Bytes>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT owner_id, content_key FROM banned_videos WHERE id = $1")
                .bind(banned_id)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((owner_id, key)) = row else {
            return Ok(OwnerScoped::NotFound);
        };
        if owner_id != requester_id {
            return Ok(OwnerScoped::NotOwner);
        }
        match self.blobs.banned.retrieve(&key).await? {
            Some(bytes) => Ok(OwnerScoped::Done(bytes)),
            None => Ok(OwnerScoped::NotFound),
        }
    }
}
