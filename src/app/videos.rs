use anyhow::Result;
use bytes::Bytes;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::app::scoring::bank_and_purge;
use crate::app::users::load_group;
use crate::app::OwnerScoped;
use crate::domain::geo::Coordinates;
use crate::domain::user::Capability;
use crate::domain::video::Video;
use crate::infra::db::{retry_on_conflict, Db};
use crate::infra::storage::{
    commit_or_discard, content_key, lock_key, BlobNamespace, BlobStores, StagedBlobs,
};

/// Columns hydrating a [`Video`]; `$1` is the viewer whose vote is reported.
pub(crate) const VIDEO_COLUMNS: &str = "v.id, v.owner_id, v.uploaded_on, v.edited_on, v.lat, v.lon, \
     v.content_key, v.thumbnail_key, \
     (SELECT COUNT(*) FROM votes uv WHERE uv.video_id = v.id AND uv.upvote) AS upvotes, \
     (SELECT COUNT(*) FROM votes dv WHERE dv.video_id = v.id AND NOT dv.upvote) AS downvotes, \
     COALESCE((SELECT CASE WHEN mine.upvote THEN 1 ELSE -1 END FROM votes mine \
               WHERE mine.video_id = v.id AND mine.user_id = $1), 0) AS user_vote, \
     COALESCE((SELECT array_agg(vt.tag_name ORDER BY vt.tag_name) FROM video_tags vt \
               WHERE vt.video_id = v.id), ARRAY[]::text[]) AS tags";

pub(crate) fn video_from_row(row: &PgRow) -> Video {
    Video {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        uploaded_on: row.get("uploaded_on"),
        edited_on: row.get("edited_on"),
        lat: row.get("lat"),
        lon: row.get("lon"),
        tags: row.get("tags"),
        upvotes: row.get("upvotes"),
        downvotes: row.get("downvotes"),
        user_vote: row.get("user_vote"),
        content_key: row.get("content_key"),
        thumbnail_key: row.get("thumbnail_key"),
    }
}

/// A video row held under `FOR UPDATE` for the rest of the transaction.
#[derive(Debug, Clone)]
pub struct LockedVideo {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub uploaded_on: OffsetDateTime,
    pub lat: f64,
    pub lon: f64,
    pub content_key: String,
    pub thumbnail_key: Option<String>,
}

pub(crate) fn locked_from_row(row: &PgRow) -> LockedVideo {
    LockedVideo {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        uploaded_on: row.get("uploaded_on"),
        lat: row.get("lat"),
        lon: row.get("lon"),
        content_key: row.get("content_key"),
        thumbnail_key: row.get("thumbnail_key"),
    }
}

pub(crate) async fn lock_video(
    tx: &mut Transaction<'_, Postgres>,
    video_id: Uuid,
) -> Result<Option<LockedVideo>> {
    let row = sqlx::query(
        "SELECT id, owner_id, uploaded_on, lat, lon, content_key, thumbnail_key \
         FROM videos WHERE id = $1 FOR UPDATE",
    )
    .bind(video_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.as_ref().map(locked_from_row))
}

/// Like [`lock_video`], but skips rows uploaded at or after `cutoff`.
pub(crate) async fn lock_expired_video(
    tx: &mut Transaction<'_, Postgres>,
    video_id: Uuid,
    cutoff: OffsetDateTime,
) -> Result<Option<LockedVideo>> {
    let row = sqlx::query(
        "SELECT id, owner_id, uploaded_on, lat, lon, content_key, thumbnail_key \
         FROM videos WHERE id = $1 AND uploaded_on < $2 FOR UPDATE",
    )
    .bind(video_id)
    .bind(cutoff)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.as_ref().map(locked_from_row))
}

pub(crate) async fn video_tags(
    tx: &mut Transaction<'_, Postgres>,
    video_id: Uuid,
) -> Result<Vec<String>> {
    let tags = sqlx::query_scalar::<_, String>(
        "SELECT tag_name FROM video_tags WHERE video_id = $1 ORDER BY tag_name",
    )
    .bind(video_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(tags)
}

async fn attach_tags(
    tx: &mut Transaction<'_, Postgres>,
    video_id: Uuid,
    tags: &[String],
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    sqlx::query("INSERT INTO tags (name) SELECT unnest($1::text[]) ON CONFLICT DO NOTHING")
        .bind(tags)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO video_tags (video_id, tag_name) \
         SELECT $1, unnest($2::text[]) ON CONFLICT DO NOTHING",
    )
    .bind(video_id)
    .bind(tags)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Release the live-namespace blobs of a video that no longer exists. Call after commit.
pub(crate) async fn release_video_blobs(db: &Db, blobs: &BlobStores, video: &LockedVideo) {
    blobs
        .release(db, BlobNamespace::Videos, &video.content_key)
        .await;
    if let Some(thumbnail_key) = &video.thumbnail_key {
        blobs
            .release(db, BlobNamespace::Thumbnails, thumbnail_key)
            .await;
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub location: Coordinates,
    /// Already normalised.
    pub tags: Vec<String>,
    pub content: Bytes,
    pub thumbnail: Option<Bytes>,
}

#[derive(Debug)]
pub enum PostOutcome {
    Posted(Video),
    Restricted,
}

#[derive(Clone)]
pub struct VideoService {
    db: Db,
    blobs: BlobStores,
}

impl VideoService {
    pub fn new(db: Db, blobs: BlobStores) -> Self {
        Self { db, blobs }
    }

    pub async fn post_video(&self, owner_id: Uuid, video: NewVideo) -> Result<PostOutcome> {
        match load_group(self.db.pool(), owner_id).await? {
            Some(group) if group.allows(Capability::Post) => {}
            _ => return Ok(PostOutcome::Restricted),
        }

        let key = content_key(&video.content);
        let thumbnail_key = video.thumbnail.as_ref().map(|thumbnail| content_key(thumbnail));
        let video_id = retry_on_conflict("post_video", || {
            self.try_post_video(owner_id, &video, &key, thumbnail_key.as_deref())
        })
        .await?;

        info!(video_id = %video_id, owner_id = %owner_id, "video posted");

        let posted = self
            .get_video(owner_id, video_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("video {} vanished after insert", video_id))?;
        Ok(PostOutcome::Posted(posted))
    }

    async fn try_post_video(
        &self,
        owner_id: Uuid,
        video: &NewVideo,
        key: &str,
        thumbnail_key: Option<&str>,
    ) -> Result<Uuid> {
        let mut tx = self.db.begin().await?;
        let mut staged = StagedBlobs::default();
        let outcome = self
            .insert_video(&mut tx, &mut staged, owner_id, video, key, thumbnail_key)
            .await;
        commit_or_discard(&self.db, &self.blobs, tx, staged, outcome).await
    }

    /// Store the blobs under their key locks, then insert the row pointing at them.
    async fn insert_video(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        staged: &mut StagedBlobs,
        owner_id: Uuid,
        video: &NewVideo,
        key: &str,
        thumbnail_key: Option<&str>,
    ) -> Result<Uuid> {
        lock_key(tx, BlobNamespace::Videos, key).await?;
        staged.push(BlobNamespace::Videos, key);
        self.blobs.videos.store(key, video.content.clone()).await?;

        if let (Some(thumbnail), Some(thumbnail_key)) = (&video.thumbnail, thumbnail_key) {
            lock_key(tx, BlobNamespace::Thumbnails, thumbnail_key).await?;
            staged.push(BlobNamespace::Thumbnails, thumbnail_key);
            self.blobs
                .thumbnails
                .store(thumbnail_key, thumbnail.clone())
                .await?;
        }

        let video_id: Uuid = sqlx::query_scalar(
            "INSERT INTO videos (owner_id, lat, lon, content_key, thumbnail_key) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(owner_id)
        .bind(video.location.lat)
        .bind(video.location.lon)
        .bind(key)
        .bind(thumbnail_key)
        .fetch_one(&mut **tx)
        .await?;
        attach_tags(tx, video_id, &video.tags).await?;
        Ok(video_id)
    }

    pub async fn get_video(&self, viewer_id: Uuid, video_id: Uuid) -> Result<Option<Video>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM videos v WHERE v.id = $2",
            VIDEO_COLUMNS
        ))
        .bind(viewer_id)
        .bind(video_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.as_ref().map(video_from_row))
    }

    /// Replace the tag set of a video. Owner only.
    pub async fn update_tags(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        tags: Vec<String>,
    ) -> Result<OwnerScoped<Video>> {
        let updated =
            retry_on_conflict("update_tags", || self.try_update_tags(user_id, video_id, &tags))
                .await?;
        if let Some(refused) = updated {
            return Ok(refused);
        }

        match self.get_video(user_id, video_id).await? {
            Some(video) => Ok(OwnerScoped::Done(video)),
            None => Ok(OwnerScoped::NotFound),
        }
    }

    /// `Some` carries a refusal; `None` means the tags were replaced.
    async fn try_update_tags(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        tags: &[String],
    ) -> Result<Option<OwnerScoped<Video>>> {
        let mut tx = self.db.begin().await?;
        let video = match lock_video(&mut tx, video_id).await? {
            Some(video) => video,
            None => {
                tx.rollback().await?;
                return Ok(Some(OwnerScoped::NotFound));
            }
        };
        if video.owner_id != user_id {
            tx.rollback().await?;
            return Ok(Some(OwnerScoped::NotOwner));
        }

        sqlx::query("DELETE FROM video_tags WHERE video_id = $1")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        attach_tags(&mut tx, video_id, tags).await?;
        sqlx::query("UPDATE videos SET edited_on = now() WHERE id = $1")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(None)
    }

    /// Delete a video on its owner's request, banking its score first.
    pub async fn delete_video(&self, user_id: Uuid, video_id: Uuid) -> Result<OwnerScoped<()>> {
        retry_on_conflict("delete_video", || self.try_delete_video(user_id, video_id)).await
    }

    async fn try_delete_video(&self, user_id: Uuid, video_id: Uuid) -> Result<OwnerScoped<()>> {
        let mut tx = self.db.begin().await?;
        let video = match lock_video(&mut tx, video_id).await? {
            Some(video) => video,
            None => {
                tx.rollback().await?;
                return Ok(OwnerScoped::NotFound);
            }
        };
        if video.owner_id != user_id {
            tx.rollback().await?;
            return Ok(OwnerScoped::NotOwner);
        }

        let net = bank_and_purge(&mut tx, video.id, video.owner_id).await?;
        sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(video.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(video_id = %video.id, banked = net, "video deleted by owner");
        release_video_blobs(&self.db, &self.blobs, &video).await;
        Ok(OwnerScoped::Done(()))
    }

    pub async fn video_file(&self, video_id: Uuid) -> Result<Option<Bytes>> {
        let key: Option<String> =
            sqlx::query_scalar("SELECT content_key FROM videos WHERE id = $1")
                .bind(video_id)
                .fetch_optional(self.db.pool())
                .await?;
        match key {
            Some(key) => self.blobs.videos.retrieve(&key).await,
            None => Ok(None),
        }
    }

    pub async fn thumbnail_file(&self, video_id: Uuid) -> Result<Option<Bytes>> {
        let key: Option<Option<String>> =
            sqlx::query_scalar("SELECT thumbnail_key FROM videos WHERE id = $1")
                .bind(video_id)
                .fetch_optional(self.db.pool())
                .await?;
        match key.flatten() {
            Some(key) => self.blobs.thumbnails.retrieve(&key).await,
            None => Ok(None),
        }
    }
}
