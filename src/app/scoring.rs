use anyhow::Result;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::vote::Tally;

/// Displayed score: banked score, plus one per vote cast, plus net votes on owned live videos.
pub(crate) const USER_SCORE_SQL: &str = "u.stored_score \
     + (SELECT COUNT(*) FROM votes cast_votes WHERE cast_votes.user_id = u.id) \
     + COALESCE((SELECT SUM(CASE WHEN rv.upvote THEN 1 ELSE -1 END) \
                 FROM votes rv JOIN videos owned ON owned.id = rv.video_id \
                 WHERE owned.owner_id = u.id), 0)";

pub async fn tally(tx: &mut Transaction<'_, Postgres>, video_id: Uuid) -> Result<Tally> {
    let row = sqlx::query(
        "SELECT COUNT(*) FILTER (WHERE upvote) AS upvotes, \
                COUNT(*) FILTER (WHERE NOT upvote) AS downvotes \
         FROM votes WHERE video_id = $1",
    )
    .bind(video_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Tally {
        upvotes: row.get("upvotes"),
        downvotes: row.get("downvotes"),
    })
}

pub async fn flag_count(tx: &mut Transaction<'_, Postgres>, video_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flags WHERE video_id = $1")
        .bind(video_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(count)
}

/// Bank a video's score before it disappears, then drop its votes, flags and tag links.
///
/// The owner is credited with the net score and every distinct voter with one point,
/// so nobody's displayed score moves. The caller must hold the video row lock and
/// delete the video itself in the same transaction.
///
/// User rows are locked in id order, after the video row. Every path that holds
/// both kinds of lock takes them in that order.
pub async fn bank_and_purge(
    tx: &mut Transaction<'_, Postgres>,
    video_id: Uuid,
    owner_id: Uuid,
) -> Result<i64> {
    sqlx::query(
        "SELECT id FROM users \
         WHERE id = $1 OR id IN (SELECT user_id FROM votes WHERE video_id = $2) \
         ORDER BY id FOR NO KEY UPDATE",
    )
    .bind(owner_id)
    .bind(video_id)
    .fetch_all(&mut **tx)
    .await?;

    let net = tally(tx, video_id).await?.net();

    sqlx::query("UPDATE users SET stored_score = stored_score + $2 WHERE id = $1")
        .bind(owner_id)
        .bind(net)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "UPDATE users SET stored_score = stored_score + 1 \
         WHERE id IN (SELECT user_id FROM votes WHERE video_id = $1)",
    )
    .bind(video_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM votes WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM flags WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM video_tags WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut **tx)
        .await?;

    Ok(net)
}
