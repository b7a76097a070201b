use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/Auth/Register", post(handlers::register))
        .route("/Auth/Login", post(handlers::login))
        .route("/Auth/Logout", get(handlers::logout).post(handlers::logout))
        .route("/Auth/Status", get(handlers::auth_status))
}

pub fn users() -> Router<AppState> {
    Router::new().route(
        "/Users/:id",
        get(handlers::get_user)
            .patch(handlers::change_password)
            .delete(handlers::delete_user),
    )
}

pub fn videos(upload_max_bytes: usize) -> Router<AppState> {
    // Multipart uploads are bounded by the configured limit instead of axum's 2 MiB default.
    let upload = Router::new()
        .route(
            "/Videos",
            get(handlers::list_videos).post(handlers::post_video),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_max_bytes));

    Router::new()
        .merge(upload)
        .route(
            "/Videos/:id",
            get(handlers::get_video)
                .patch(handlers::update_video)
                .delete(handlers::delete_video),
        )
        .route("/VideoFiles/:id", get(handlers::video_file))
        .route("/Thumbnails/:id", get(handlers::thumbnail_file))
}

pub fn hall_of_fame() -> Router<AppState> {
    Router::new()
        .route("/HallOfFame", get(handlers::list_hall_of_fame))
        .route("/HallOfFame/:id", get(handlers::get_hall_of_fame_entry))
        .route("/HallOfFameFiles/:id", get(handlers::hall_of_fame_file))
}

pub fn banned_videos() -> Router<AppState> {
    Router::new()
        .route("/BannedVideos/:id", get(handlers::get_banned_video))
        .route("/BannedVideoFiles/:id", get(handlers::banned_video_file))
}

pub fn moderation() -> Router<AppState> {
    Router::new()
        .route("/Moderation/Videos/:id/ban", post(handlers::ban_video))
        .route("/Moderation/Retire", post(handlers::retire_videos))
}
