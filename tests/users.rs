//! User Tests
//!
//! Covers profile access, score accounting, password changes and account deletion.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::json;

// ===========================================================================
// Profile
// ===========================================================================

#[tokio::test]
async fn get_own_profile() {
    let app = app().await;
    let user = app.create_user("profile").await;

    let resp = app
        .get(&format!("/api/Users/{}", user.id), Some(&user.token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["user_id"].as_str(), Some(user.id.to_string().as_str()));
    assert_eq!(body["email"].as_str(), Some(user.email.as_str()));
    assert_eq!(body["score"], json!(0));
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn other_profiles_are_private() {
    let app = app().await;
    let user = app.create_user("private_a").await;
    let other = app.create_user("private_b").await;

    let resp = app
        .get(&format!("/api/Users/{}", other.id), Some(&user.token))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let patch = app
        .patch_json(
            &format!("/api/Users/{}", other.id),
            json!({ "password": common::DEFAULT_PASSWORD, "new_password": "takeover1!" }),
            Some(&user.token),
        )
        .await;
    assert_eq!(patch.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Score
// ===========================================================================

#[tokio::test]
async fn score_counts_votes_cast_and_received() {
    let app = app().await;
    let author = app.create_user("score_author").await;
    let voters = app.create_users("score_voter", 3).await;
    let video_id = app.create_video(&author).await;

    app.vote(&voters[0], video_id, true).await;
    app.vote(&voters[1], video_id, true).await;
    app.vote(&voters[2], video_id, false).await;

    assert_eq!(app.displayed_score(&author).await, 1);
    for voter in &voters {
        // Every vote cast is worth one point regardless of direction.
        assert_eq!(app.displayed_score(voter).await, 1);
    }

    // Withdrawing a vote takes the point back.
    app.vote(&voters[2], video_id, false).await;
    assert_eq!(app.displayed_score(&voters[2]).await, 0);
    assert_eq!(app.displayed_score(&author).await, 2);
}

// ===========================================================================
// Password
// ===========================================================================

#[tokio::test]
async fn change_password_requires_the_current_one() {
    let app = app().await;
    let user = app.create_user("pw_change").await;
    let path = format!("/api/Users/{}", user.id);

    let wrong = app
        .patch_json(
            &path,
            json!({ "password": "notmypass1!", "new_password": "brandnew1!" }),
            Some(&user.token),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let weak = app
        .patch_json(
            &path,
            json!({ "password": common::DEFAULT_PASSWORD, "new_password": "weak" }),
            Some(&user.token),
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);

    let ok = app
        .patch_json(
            &path,
            json!({ "password": common::DEFAULT_PASSWORD, "new_password": "brandnew1!" }),
            Some(&user.token),
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK);

    let old_login = app
        .post_json(
            "/api/Auth/Login",
            json!({ "email": user.email, "password": common::DEFAULT_PASSWORD }),
            None,
        )
        .await;
    assert_eq!(old_login.status, StatusCode::NOT_FOUND);

    let new_login = app
        .post_json(
            "/api/Auth/Login",
            json!({ "email": user.email, "password": "brandnew1!" }),
            None,
        )
        .await;
    assert_eq!(new_login.status, StatusCode::OK);
}

// ===========================================================================
// Account deletion
// ===========================================================================

#[tokio::test]
async fn delete_account_requires_password() {
    let app = app().await;
    let user = app.create_user("del_wrong").await;

    let resp = app
        .delete_json(
            &format!("/api/Users/{}", user.id),
            json!({ "password": "wrongpass1!" }),
            Some(&user.token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let still_there = app
        .get(&format!("/api/Users/{}", user.id), Some(&user.token))
        .await;
    assert_eq!(still_there.status, StatusCode::OK);
}

#[tokio::test]
async fn delete_account_removes_content_and_keeps_voter_points() {
    let app = app().await;
    let user = app.create_user("del_cascade").await;
    let voter = app.create_user("del_voter").await;
    let bystander = app.create_user("del_bystander").await;

    let own_video = app.create_video(&user).await;
    let other_video = app.create_video(&bystander).await;
    app.vote(&voter, own_video, true).await;
    app.vote(&user, other_video, true).await;

    let banned_video = app.create_video(&user).await;
    let ban = app
        .post_admin(
            &format!("/api/Moderation/Videos/{}/ban", banned_video),
            json!({}),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(ban.status, StatusCode::OK);

    let voter_before = app.displayed_score(&voter).await;

    let resp = app
        .delete_json(
            &format!("/api/Users/{}", user.id),
            json!({ "password": common::DEFAULT_PASSWORD }),
            Some(&user.token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    // The voter keeps the point earned on the deleted video.
    assert_eq!(app.displayed_score(&voter).await, voter_before);

    let video = app
        .get(&format!("/api/Videos/{}", own_video), Some(&voter.token))
        .await;
    assert_eq!(video.status, StatusCode::NOT_FOUND);

    // Votes cast by the deleted user disappear from other videos.
    let other = app
        .get(&format!("/api/Videos/{}", other_video), Some(&bystander.token))
        .await;
    assert_eq!(other.json()["upvotes"], json!(0));

    let banned_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM banned_videos WHERE owner_id = $1")
            .bind(user.id)
            .fetch_one(app.pool())
            .await
            .unwrap();
    assert_eq!(banned_rows, 0);

    let status = app.get("/api/Auth/Status", Some(&user.token)).await;
    assert_eq!(status.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_account_racing_a_ban_never_fails() {
    let app = app().await;

    for round in 0..5 {
        let owner = app.create_user(&format!("race_del_owner_{}", round)).await;
        let voters = app
            .create_users(&format!("race_del_voter_{}", round), 4)
            .await;
        let video_id = app.create_video(&owner).await;
        for voter in &voters[..3] {
            assert_eq!(app.vote(voter, video_id, false).await.status, StatusCode::OK);
        }

        // The fourth downvote bans the video while the owner's account goes away.
        let path = format!("/api/Users/{}", owner.id);
        let (deleted, voted) = tokio::join!(
            app.delete_json(
                &path,
                json!({ "password": common::DEFAULT_PASSWORD }),
                Some(&owner.token),
            ),
            app.vote(&voters[3], video_id, false),
        );
        assert_eq!(deleted.status, StatusCode::NO_CONTENT, "round {}", round);
        assert!(
            voted.status == StatusCode::OK || voted.status == StatusCode::NOT_FOUND,
            "round {}: {} {}",
            round,
            voted.status,
            voted.error_message()
        );

        for voter in &voters[..3] {
            assert_eq!(app.stored_score(voter.id).await, 1);
        }
        let leftovers: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM videos WHERE owner_id = $1) \
                  + (SELECT COUNT(*) FROM banned_videos WHERE owner_id = $1)",
        )
        .bind(owner.id)
        .fetch_one(app.pool())
        .await
        .unwrap();
        assert_eq!(leftovers, 0);
    }
}
