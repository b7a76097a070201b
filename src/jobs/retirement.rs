//! Retirement of aged videos.
//!
//! Every video uploaded before the cutoff is banked and removed. Depending on its
//! final score it either enters the capacity-bounded Hall of Fame (possibly
//! evicting the weakest entry) or is discarded. Each video is retired in its own
//! transaction: a failure leaves that video untouched, releases any Hall of Fame
//! copy written for it, and the batch moves on.

use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlx::{Postgres, Row, Transaction};
use time::{Duration, OffsetDateTime};
use tracing::{error, info};
use uuid::Uuid;

use crate::app::scoring::bank_and_purge;
use crate::app::videos::{lock_expired_video, release_video_blobs, LockedVideo};
use crate::config::Policy;
use crate::domain::hall_of_fame::{Admission, Incumbent};
use crate::infra::db::{retry_on_conflict, Db};
use crate::infra::storage::{commit_or_discard, lock_key, BlobNamespace, BlobStores, StagedBlobs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetirementReport {
    pub examined: usize,
    pub admitted: usize,
    pub replaced: usize,
    pub discarded: usize,
    /// Already gone (or no longer expired) by the time it was locked.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retired {
    Admitted,
    Replaced,
    Discarded,
}

/// Cutoff for a run started now.
pub fn default_cutoff(policy: &Policy) -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::hours(policy.retirement_age_hours)
}

pub async fn run(
    db: &Db,
    blobs: &BlobStores,
    policy: &Policy,
    cutoff: OffsetDateTime,
) -> Result<RetirementReport> {
    let candidates: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM videos WHERE uploaded_on < $1 ORDER BY uploaded_on, id",
    )
    .bind(cutoff)
    .fetch_all(db.pool())
    .await?;

    info!(candidates = candidates.len(), cutoff = %cutoff, "retirement started");

    let mut report = RetirementReport::default();
    for video_id in candidates {
        report.examined += 1;
        match retire_one(db, blobs, policy, video_id, cutoff).await {
            Ok(Some(Retired::Admitted)) => report.admitted += 1,
            Ok(Some(Retired::Replaced)) => report.replaced += 1,
            Ok(Some(Retired::Discarded)) => report.discarded += 1,
            Ok(None) => report.skipped += 1,
            Err(err) => {
                error!(error = ?err, video_id = %video_id, "failed to retire video");
                report.failed += 1;
            }
        }
    }

    info!(
        examined = report.examined,
        admitted = report.admitted,
        replaced = report.replaced,
        discarded = report.discarded,
        skipped = report.skipped,
        failed = report.failed,
        "retirement finished"
    );
    Ok(report)
}

async fn retire_one(
    db: &Db,
    blobs: &BlobStores,
    policy: &Policy,
    video_id: Uuid,
    cutoff: OffsetDateTime,
) -> Result<Option<Retired>> {
    retry_on_conflict("retire_video", || {
        try_retire(db, blobs, policy, video_id, cutoff)
    })
    .await
}

async fn try_retire(
    db: &Db,
    blobs: &BlobStores,
    policy: &Policy,
    video_id: Uuid,
    cutoff: OffsetDateTime,
) -> Result<Option<Retired>> {
    let mut tx = db.begin().await?;
    let Some(video) = lock_expired_video(&mut tx, video_id, cutoff).await? else {
        tx.rollback().await?;
        return Ok(None);
    };

    let mut staged = StagedBlobs::default();
    let outcome = retire_locked(&mut tx, blobs, policy, &video, &mut staged).await;
    let settled = commit_or_discard(db, blobs, tx, staged, outcome).await?;

    release_video_blobs(db, blobs, &video).await;
    if let Some(key) = &settled.evicted_key {
        blobs.release(db, BlobNamespace::HallOfFame, key).await;
    }

    info!(
        video_id = %video.id,
        score = settled.score,
        outcome = ?settled.retired,
        "video retired"
    );
    Ok(Some(settled.retired))
}

struct Settled {
    retired: Retired,
    score: i64,
    evicted_key: Option<String>,
}

async fn retire_locked(
    tx: &mut Transaction<'static, Postgres>,
    blobs: &BlobStores,
    policy: &Policy,
    video: &LockedVideo,
    staged: &mut StagedBlobs,
) -> Result<Settled> {
    let score = bank_and_purge(tx, video.id, video.owner_id).await?;

    // Serializes capacity checks between concurrent retirements.
    sqlx::query("LOCK TABLE hall_of_fame IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut **tx)
        .await?;
    let size: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hall_of_fame")
        .fetch_one(&mut **tx)
        .await?;
    let lowest = lowest_entry(tx).await?;

    let decision = Admission::decide(size, policy.hall_of_fame_limit, lowest, score);
    let mut evicted_key = None;
    match decision {
        Admission::Admit | Admission::Replace { .. } => {
            let bytes = blobs
                .videos
                .retrieve(&video.content_key)
                .await?
                .ok_or_else(|| anyhow!("content {} missing for video {}", video.content_key, video.id))?;
            lock_key(tx, BlobNamespace::HallOfFame, &video.content_key).await?;
            staged.push(BlobNamespace::HallOfFame, &video.content_key);
            blobs
                .hall_of_fame
                .store(&video.content_key, bytes)
                .await?;

            if let Admission::Replace { evict } = decision {
                let key: String =
                    sqlx::query_scalar("DELETE FROM hall_of_fame WHERE id = $1 RETURNING content_key")
                        .bind(evict)
                        .fetch_one(&mut **tx)
                        .await?;
                evicted_key = Some(key);
                info!(evicted_id = %evict, video_id = %video.id, "hall of fame entry evicted");
            }

            sqlx::query(
                "INSERT INTO hall_of_fame (id, owner_id, uploaded_on, lat, lon, score, content_key) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(video.id)
            .bind(video.owner_id)
            .bind(video.uploaded_on)
            .bind(video.lat)
            .bind(video.lon)
            .bind(score)
            .bind(&video.content_key)
            .execute(&mut **tx)
            .await?;
        }
        Admission::Discard => {}
    }

    sqlx::query("DELETE FROM videos WHERE id = $1")
        .bind(video.id)
        .execute(&mut **tx)
        .await?;

    let retired = match decision {
        Admission::Admit => Retired::Admitted,
        Admission::Replace { .. } => Retired::Replaced,
        Admission::Discard => Retired::Discarded,
    };
    Ok(Settled {
        retired,
        score,
        evicted_key,
    })
}

/// The entry that would be evicted next: lowest score, most recent among ties.
async fn lowest_entry(tx: &mut Transaction<'_, Postgres>) -> Result<Option<Incumbent>> {
    let row = sqlx::query(
        "SELECT id, score FROM hall_of_fame \
         ORDER BY score ASC, inducted_on DESC, id DESC LIMIT 1",
    )
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|row| Incumbent {
        id: row.get("id"),
        score: row.get("score"),
    }))
}
