use anyhow::Result;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::app::auth::{hash_password, verify_password};
use crate::app::scoring::{bank_and_purge, USER_SCORE_SQL};
use crate::app::videos::{locked_from_row, release_video_blobs, LockedVideo};
use crate::domain::user::{User, UserGroup};
use crate::infra::db::{retry_on_conflict, Db};
use crate::infra::storage::{BlobNamespace, BlobStores};

pub(crate) async fn load_group(pool: &PgPool, user_id: Uuid) -> Result<Option<UserGroup>> {
    let group: Option<String> = sqlx::query_scalar("SELECT user_group FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(group.as_deref().and_then(UserGroup::from_db))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCheck {
    Done,
    WrongPassword,
    NotFound,
}

#[derive(Clone)]
pub struct UserService {
    db: Db,
    blobs: BlobStores,
}

impl UserService {
    pub fn new(db: Db, blobs: BlobStores) -> Self {
        Self { db, blobs }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT u.id, u.email, u.registered_on, {} AS score \
             FROM users u WHERE u.id = $1",
            USER_SCORE_SQL
        ))
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        let user = row.map(|row| User {
            id: row.get("id"),
            email: row.get("email"),
            registered_on: row.get("registered_on"),
            score: row.get("score"),
        });

        Ok(user)
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        replacement: &str,
    ) -> Result<CredentialCheck> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.db.pool())
                .await?;
        let Some(stored) = stored else {
            return Ok(CredentialCheck::NotFound);
        };
        if !verify_password(current, &stored)? {
            return Ok(CredentialCheck::WrongPassword);
        }

        let password_hash = hash_password(replacement)?;
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(self.db.pool())
            .await?;
        Ok(CredentialCheck::Done)
    }

    /// Delete an account and everything it owns.
    ///
    /// Owned videos are banked first so that voters keep their vote-cast points;
    /// the remaining rows go through `ON DELETE CASCADE`.
    pub async fn delete_account(&self, user_id: Uuid, password: &str) -> Result<CredentialCheck> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.db.pool())
                .await?;
        let Some(stored) = stored else {
            return Ok(CredentialCheck::NotFound);
        };
        if !verify_password(password, &stored)? {
            return Ok(CredentialCheck::WrongPassword);
        }

        let Some(removed) =
            retry_on_conflict("delete_account", || self.try_delete_account(user_id)).await?
        else {
            return Ok(CredentialCheck::NotFound);
        };

        info!(
            user_id = %user_id,
            videos = removed.videos.len(),
            hall_of_fame = removed.hall_of_fame_keys.len(),
            banned = removed.banned_keys.len(),
            "account deleted"
        );

        for video in &removed.videos {
            release_video_blobs(&self.db, &self.blobs, video).await;
        }
        for key in &removed.hall_of_fame_keys {
            self.blobs
                .release(&self.db, BlobNamespace::HallOfFame, key)
                .await;
        }
        for key in &removed.banned_keys {
            self.blobs.release(&self.db, BlobNamespace::Banned, key).await;
        }

        Ok(CredentialCheck::Done)
    }

    /// Video rows first, then every user row the purge touches, both in id order.
    async fn try_delete_account(&self, user_id: Uuid) -> Result<Option<RemovedAccount>> {
        let mut tx = self.db.begin().await?;
        let rows = sqlx::query(
            "SELECT id, owner_id, uploaded_on, lat, lon, content_key, thumbnail_key \
             FROM videos WHERE owner_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        let videos: Vec<LockedVideo> = rows.iter().map(locked_from_row).collect();

        let locked_users: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM users \
             WHERE id = $1 \
                OR id IN (SELECT vt.user_id FROM votes vt \
                          JOIN videos owned ON owned.id = vt.video_id \
                          WHERE owned.owner_id = $1) \
             ORDER BY id FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        if !locked_users.contains(&user_id) {
            tx.rollback().await?;
            return Ok(None);
        }

        for video in &videos {
            bank_and_purge(&mut tx, video.id, video.owner_id).await?;
        }

        let hall_of_fame_keys: Vec<String> =
            sqlx::query_scalar("SELECT content_key FROM hall_of_fame WHERE owner_id = $1")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await?;
        let banned_keys: Vec<String> =
            sqlx::query_scalar("SELECT content_key FROM banned_videos WHERE owner_id = $1")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(RemovedAccount {
            videos,
            hall_of_fame_keys,
            banned_keys,
        }))
    }
}

/// What a committed account deletion left behind in blob storage.
struct RemovedAccount {
    videos: Vec<LockedVideo>,
    hall_of_fame_keys: Vec<String>,
    banned_keys: Vec<String>,
}
