use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AdminToken, AuthUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::auth())
        .merge(routes::users())
        .merge(routes::videos(state.upload_max_bytes))
        .merge(routes::hall_of_fame())
        .merge(routes::banned_videos())
        .merge(routes::moderation());

    Router::new()
        .merge(routes::health())
        .nest("/api", api)
        .with_state(state)
}
