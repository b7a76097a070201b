use anyhow::Result;
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::app::moderation::ModerationService;
use crate::app::scoring::{flag_count, tally};
use crate::app::videos::{lock_video, release_video_blobs, LockedVideo};
use crate::config::Policy;
use crate::domain::user::{Capability, UserGroup};
use crate::domain::vote::{vote_value, Tally, VoteAction, VoteOutcome};
use crate::infra::db::{retry_on_conflict, Db};
use crate::infra::storage::{commit_or_discard, BlobStores, StagedBlobs};

#[derive(Debug)]
pub enum VoteResult {
    Applied(VoteOutcome),
    NotFound,
    Restricted,
}

#[derive(Clone)]
pub struct VoteService {
    db: Db,
    blobs: BlobStores,
    policy: Policy,
}

impl VoteService {
    pub fn new(db: Db, blobs: BlobStores, policy: Policy) -> Self {
        Self { db, blobs, policy }
    }

    /// Toggle the caller's vote on a video.
    ///
    /// Same direction withdraws, opposite direction flips. Runs under the video row
    /// lock so concurrent votes on one video serialize, and bans the video in the
    /// same transaction if the new tally crosses the threshold.
    pub async fn cast_vote(&self, voter_id: Uuid, video_id: Uuid, upvote: bool) -> Result<VoteResult> {
        retry_on_conflict("cast_vote", || self.try_cast_vote(voter_id, video_id, upvote)).await
    }

    async fn try_cast_vote(
        &self,
        voter_id: Uuid,
        video_id: Uuid,
        upvote: bool,
    ) -> Result<VoteResult> {
        let mut tx = self.db.begin().await?;
        if !may_vote(&mut tx, voter_id).await? {
            tx.rollback().await?;
            return Ok(VoteResult::Restricted);
        }
        let Some(video) = lock_video(&mut tx, video_id).await? else {
            tx.rollback().await?;
            return Ok(VoteResult::NotFound);
        };

        let existing: Option<bool> =
            sqlx::query_scalar("SELECT upvote FROM votes WHERE user_id = $1 AND video_id = $2")
                .bind(voter_id)
                .bind(video_id)
                .fetch_optional(&mut *tx)
                .await?;

        let action = VoteAction::resolve(existing, upvote);
        match action {
            VoteAction::Insert => {
                sqlx::query("INSERT INTO votes (user_id, video_id, upvote) VALUES ($1, $2, $3)")
                    .bind(voter_id)
                    .bind(video_id)
                    .bind(upvote)
                    .execute(&mut *tx)
                    .await?;
            }
            VoteAction::Remove => {
                sqlx::query("DELETE FROM votes WHERE user_id = $1 AND video_id = $2")
                    .bind(voter_id)
                    .bind(video_id)
                    .execute(&mut *tx)
                    .await?;
            }
            VoteAction::Flip => {
                sqlx::query(
                    "UPDATE votes SET upvote = $3, created_at = now() \
                     WHERE user_id = $1 AND video_id = $2",
                )
                .bind(voter_id)
                .bind(video_id)
                .bind(upvote)
                .execute(&mut *tx)
                .await?;
            }
        }

        let user_vote = action.resulting_state(upvote);
        self.settle(tx, video, user_vote).await
    }

    /// Flag a video as inappropriate. Repeated flags by one user count once.
    pub async fn flag_video(&self, reporter_id: Uuid, video_id: Uuid) -> Result<VoteResult> {
        retry_on_conflict("flag_video", || self.try_flag_video(reporter_id, video_id)).await
    }

    async fn try_flag_video(&self, reporter_id: Uuid, video_id: Uuid) -> Result<VoteResult> {
        let mut tx = self.db.begin().await?;
        if !may_vote(&mut tx, reporter_id).await? {
            tx.rollback().await?;
            return Ok(VoteResult::Restricted);
        }
        let Some(video) = lock_video(&mut tx, video_id).await? else {
            tx.rollback().await?;
            return Ok(VoteResult::NotFound);
        };

        sqlx::query(
            "INSERT INTO flags (user_id, video_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, video_id) DO NOTHING",
        )
        .bind(reporter_id)
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

        let existing: Option<bool> =
            sqlx::query_scalar("SELECT upvote FROM votes WHERE user_id = $1 AND video_id = $2")
                .bind(reporter_id)
                .bind(video_id)
                .fetch_optional(&mut *tx)
                .await?;
        let user_vote = existing.map(vote_value).unwrap_or(0);

        self.settle(tx, video, user_vote).await
    }

    /// Recompute pressure on a locked video, ban it if needed, and commit.
    async fn settle(
        &self,
        mut tx: Transaction<'static, Postgres>,
        video: LockedVideo,
        user_vote: i32,
    ) -> Result<VoteResult> {
        let mut staged = StagedBlobs::default();
        let outcome = self.apply_pressure(&mut tx, &video, &mut staged).await;
        let (current, banned) =
            commit_or_discard(&self.db, &self.blobs, tx, staged, outcome).await?;

        if banned {
            release_video_blobs(&self.db, &self.blobs, &video).await;
        }

        Ok(VoteResult::Applied(VoteOutcome {
            video_id: video.id,
            upvotes: current.upvotes,
            downvotes: current.downvotes,
            user_vote,
            banned,
        }))
    }

    async fn apply_pressure(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        video: &LockedVideo,
        staged: &mut StagedBlobs,
    ) -> Result<(Tally, bool)> {
        let current = tally(tx, video.id).await?;
        let flags = flag_count(tx, video.id).await?;

        let banned = self.policy.exceeds_ban_pressure(current.net(), flags);
        if banned {
            info!(
                video_id = %video.id,
                net = current.net(),
                flags,
                "ban threshold reached"
            );
            let moderation = ModerationService::new(self.db.clone(), self.blobs.clone(), self.policy);
            moderation.ban_locked(tx, video, staged).await?;
        }
        Ok((current, banned))
    }
}

async fn may_vote(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<bool> {
    let group: Option<String> = sqlx::query_scalar("SELECT user_group FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(group
        .as_deref()
        .and_then(UserGroup::from_db)
        .map(|group| group.allows(Capability::Vote))
        .unwrap_or(false))
}
