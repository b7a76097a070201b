use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::auth::{check_password_rules, AuthService, MAX_PASSWORD_LEN};
use crate::app::feed::{FeedQuery, FeedService};
use crate::app::hall_of_fame::HallOfFameService;
use crate::app::moderation::ModerationService;
use crate::app::users::{CredentialCheck, UserService};
use crate::app::videos::{NewVideo, PostOutcome, VideoService};
use crate::app::votes::{VoteResult, VoteService};
use crate::app::OwnerScoped;
use crate::domain::banned_video::BannedVideo;
use crate::domain::geo::Coordinates;
use crate::domain::hall_of_fame::HallOfFameEntry;
use crate::domain::user::{User, UserStatus};
use crate::domain::video::{normalize_tags, FeedType, SortBy, Video, MAX_TAGS_PER_VIDEO, MAX_TAG_LEN};
use crate::domain::vote::VoteOutcome;
use crate::http::{AdminToken, AppError, AuthUser};
use crate::jobs::retirement::{self, RetirementReport};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.cache.clone(),
        state.paseto_access_key,
        state.access_ttl_minutes,
    )
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|err| err.as_database_error())
        .and_then(|db_err| db_err.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

fn binary_response(bytes: Bytes) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response()
}

fn validate_tags(tags: Vec<String>) -> Result<Vec<String>, AppError> {
    let tags = normalize_tags(tags);
    if tags.len() > MAX_TAGS_PER_VIDEO {
        return Err(AppError::bad_request(format!(
            "at most {} tags are allowed",
            MAX_TAGS_PER_VIDEO
        )));
    }
    if tags.iter().any(|tag| tag.len() > MAX_TAG_LEN) {
        return Err(AppError::bad_request(format!(
            "tags must be at most {} bytes",
            MAX_TAG_LEN
        )));
    }
    Ok(tags)
}

fn parse_coordinates(lat: Option<&str>, lon: Option<&str>) -> Result<Coordinates, AppError> {
    let lat = lat.ok_or_else(|| AppError::bad_request("lat is required"))?;
    let lon = lon.ok_or_else(|| AppError::bad_request("lon is required"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request("lat must be a number"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request("lon must be a number"))?;
    Coordinates::new(lat, lon).ok_or_else(|| AppError::bad_request("coordinates out of range"))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub auth_token: String,
    pub user_id: Uuid,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    check_password_rules(&payload.password, state.policy.min_password_length)
        .map_err(AppError::bad_request)?;

    let session = auth_service(&state)
        .register(email, &payload.password)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                return AppError::conflict("email already registered");
            }
            tracing::error!(error = ?err, "failed to register");
            AppError::internal("failed to register")
        })?;

    tracing::info!(user_id = %session.user_id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            auth_token: session.token,
            user_id: session.user_id,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 bytes"));
    }

    let session = auth_service(&state)
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match session {
        Some(session) => Ok(Json(SessionResponse {
            auth_token: session.token,
            user_id: session.user_id,
        })),
        None => Err(AppError::not_found("invalid email or password")),
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    auth_service(&state)
        .logout(&auth.token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to logout");
            AppError::internal("failed to logout")
        })?;
    Ok(Json(MessageResponse {
        message: "logged out",
    }))
}

pub async fn auth_status(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserStatus>, AppError> {
    let service = ModerationService::new(state.db.clone(), state.blobs.clone(), state.policy);
    let status = service.user_status(auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %auth.user_id, "failed to load status");
        AppError::internal("failed to load status")
    })?;
    status
        .map(Json)
        .ok_or_else(|| AppError::unauthorized("invalid token"))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    if user_id != auth.user_id {
        return Err(AppError::unauthorized("cannot view another user"));
    }

    let service = UserService::new(state.db.clone(), state.blobs.clone());
    let user = service.get_user(user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %user_id, "failed to load user");
        AppError::internal("failed to load user")
    })?;
    user.map(Json)
        .ok_or_else(|| AppError::not_found("user not found"))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<User>, AppError> {
    if user_id != auth.user_id {
        return Err(AppError::unauthorized("cannot modify another user"));
    }
    check_password_rules(&payload.new_password, state.policy.min_password_length)
        .map_err(AppError::bad_request)?;

    let service = UserService::new(state.db.clone(), state.blobs.clone());
    let outcome = service
        .change_password(user_id, &payload.password, &payload.new_password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user_id, "failed to change password");
            AppError::internal("failed to change password")
        })?;

    match outcome {
        CredentialCheck::Done => {}
        CredentialCheck::WrongPassword => return Err(AppError::unauthorized("wrong password")),
        CredentialCheck::NotFound => return Err(AppError::not_found("user not found")),
    }

    let user = service.get_user(user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %user_id, "failed to load user");
        AppError::internal("failed to load user")
    })?;
    user.map(Json)
        .ok_or_else(|| AppError::not_found("user not found"))
}

#[derive(Deserialize)]
pub struct DeleteUserRequest {
    pub password: String,
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<DeleteUserRequest>,
) -> Result<StatusCode, AppError> {
    if user_id != auth.user_id {
        return Err(AppError::unauthorized("cannot delete another user"));
    }

    let service = UserService::new(state.db.clone(), state.blobs.clone());
    let outcome = service
        .delete_account(user_id, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user_id, "failed to delete account");
            AppError::internal("failed to delete account")
        })?;

    match outcome {
        CredentialCheck::Done => Ok(StatusCode::NO_CONTENT),
        CredentialCheck::WrongPassword => Err(AppError::unauthorized("wrong password")),
        CredentialCheck::NotFound => Err(AppError::not_found("user not found")),
    }
}

// ---------------------------------------------------------------------------
// Videos
// ---------------------------------------------------------------------------

pub async fn post_video(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Video>), AppError> {
    let mut content: Option<Bytes> = None;
    let mut thumbnail: Option<Bytes> = None;
    let mut lat: Option<String> = None;
    let mut lon: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();

    let multipart_error = |err: axum::extract::multipart::MultipartError| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::payload_too_large("upload too large")
        } else {
            AppError::bad_request(format!("invalid multipart body: {}", err.body_text()))
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => content = Some(field.bytes().await.map_err(multipart_error)?),
            "thumbnail" => thumbnail = Some(field.bytes().await.map_err(multipart_error)?),
            "lat" => lat = Some(field.text().await.map_err(multipart_error)?),
            "lon" => lon = Some(field.text().await.map_err(multipart_error)?),
            "tags" | "tag" => tags.push(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let content = content
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::bad_request("file is required"))?;
    let location = parse_coordinates(lat.as_deref(), lon.as_deref())?;
    let tags = validate_tags(tags)?;
    let thumbnail = thumbnail.filter(|bytes| !bytes.is_empty());

    let service = VideoService::new(state.db.clone(), state.blobs.clone());
    let outcome = service
        .post_video(
            auth.user_id,
            NewVideo {
                location,
                tags,
                content,
                thumbnail,
            },
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to post video");
            AppError::internal("failed to post video")
        })?;

    match outcome {
        PostOutcome::Posted(video) => Ok((StatusCode::CREATED, Json(video))),
        PostOutcome::Restricted => Err(AppError::unauthorized("posting is restricted")),
    }
}

/// Feed parameters. Parsed by hand because `tag` may repeat.
#[derive(Debug)]
struct FeedParams {
    center: Coordinates,
    tags: Vec<String>,
    limit: Option<i64>,
    offset: i64,
    sort: SortBy,
    feed_type: FeedType,
    subject_id: Option<Uuid>,
}

impl FeedParams {
    fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, AppError> {
        let mut lat = None;
        let mut lon = None;
        let mut tags = Vec::new();
        let mut limit = None;
        let mut offset = 0;
        let mut sort_by = None;
        let mut feed_type = None;
        let mut subject_id = None;

        for (key, value) in pairs {
            match key.as_str() {
                "lat" => lat = Some(value),
                "lon" => lon = Some(value),
                "tag" | "tags" => tags.push(value),
                "limit" => {
                    limit = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| AppError::bad_request("limit must be an integer"))?,
                    )
                }
                "offset" => {
                    offset = value
                        .parse::<i64>()
                        .map_err(|_| AppError::bad_request("offset must be an integer"))?;
                    if offset < 0 {
                        return Err(AppError::bad_request("offset must not be negative"));
                    }
                }
                "sortBy" => sort_by = Some(value),
                "feedType" => feed_type = Some(value),
                "userId" => {
                    subject_id = Some(
                        Uuid::parse_str(&value)
                            .map_err(|_| AppError::bad_request("userId must be a uuid"))?,
                    )
                }
                _ => {}
            }
        }

        Ok(Self {
            center: parse_coordinates(lat.as_deref(), lon.as_deref())?,
            tags: validate_tags(tags)?,
            limit,
            offset,
            sort: SortBy::from_query(sort_by.as_deref()),
            feed_type: FeedType::from_query(feed_type.as_deref())
                .ok_or_else(|| AppError::bad_request("unknown feedType"))?,
            subject_id,
        })
    }
}

#[derive(Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<Video>,
}

pub async fn list_videos(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<VideoListResponse>, AppError> {
    let params = FeedParams::from_pairs(pairs)?;
    let query = FeedQuery {
        feed_type: params.feed_type,
        sort: params.sort,
        center: params.center,
        tags: params.tags,
        subject_id: params.subject_id.unwrap_or(auth.user_id),
        limit: state.policy.clamp_feed_limit(params.limit),
        offset: params.offset,
    };

    let service = FeedService::new(state.db.clone(), state.policy);
    let videos = service.list(auth.user_id, &query).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %auth.user_id, "failed to load feed");
        AppError::internal("failed to load feed")
    })?;

    Ok(Json(VideoListResponse { videos }))
}

pub async fn get_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<Json<Video>, AppError> {
    let service = VideoService::new(state.db.clone(), state.blobs.clone());
    let video = service
        .get_video(auth.user_id, video_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, video_id = %video_id, "failed to load video");
            AppError::internal("failed to load video")
        })?;
    video
        .map(Json)
        .ok_or_else(|| AppError::not_found("video not found"))
}

#[derive(Deserialize)]
pub struct UpdateVideoRequest {
    pub upvote: Option<bool>,
    pub flagged: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Vote, flag or retag a video. A flag takes precedence over `upvote`.
pub async fn update_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(video_id): Path<Uuid>,
    Json(payload): Json<UpdateVideoRequest>,
) -> Result<Response, AppError> {
    let flagged = payload.flagged.unwrap_or(false);
    if payload.tags.is_none() && payload.upvote.is_none() && !flagged {
        return Err(AppError::bad_request("nothing to update"));
    }

    let mut retagged: Option<Video> = None;
    if let Some(tags) = payload.tags {
        let tags = validate_tags(tags)?;
        let service = VideoService::new(state.db.clone(), state.blobs.clone());
        let outcome = service
            .update_tags(auth.user_id, video_id, tags)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, video_id = %video_id, "failed to update tags");
                AppError::internal("failed to update tags")
            })?;
        match outcome {
            OwnerScoped::Done(video) => retagged = Some(video),
            OwnerScoped::NotFound => return Err(AppError::not_found("video not found")),
            OwnerScoped::NotOwner => {
                return Err(AppError::forbidden("only the owner may edit tags"))
            }
        }
    }

    if !flagged && payload.upvote.is_none() {
        return match retagged {
            Some(video) => Ok(Json(video).into_response()),
            None => Err(AppError::not_found("video not found")),
        };
    }

    let service = VoteService::new(state.db.clone(), state.blobs.clone(), state.policy);
    let result = match (flagged, payload.upvote) {
        (true, _) => service.flag_video(auth.user_id, video_id).await,
        (false, upvote) => {
            service
                .cast_vote(auth.user_id, video_id, upvote.unwrap_or(true))
                .await
        }
    };
    let result = result.map_err(|err| {
        tracing::error!(error = ?err, video_id = %video_id, "failed to record vote");
        AppError::internal("failed to record vote")
    })?;

    match result {
        VoteResult::Applied(outcome) => Ok(Json::<VoteOutcome>(outcome).into_response()),
        VoteResult::NotFound => Err(AppError::not_found("video not found")),
        VoteResult::Restricted => Err(AppError::unauthorized("voting is restricted")),
    }
}

pub async fn delete_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let service = VideoService::new(state.db.clone(), state.blobs.clone());
    let outcome = service
        .delete_video(auth.user_id, video_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, video_id = %video_id, "failed to delete video");
            AppError::internal("failed to delete video")
        })?;

    match outcome {
        OwnerScoped::Done(()) => Ok(StatusCode::NO_CONTENT),
        OwnerScoped::NotFound => Err(AppError::not_found("video not found")),
        OwnerScoped::NotOwner => Err(AppError::forbidden("only the owner may delete a video")),
    }
}

pub async fn video_file(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let service = VideoService::new(state.db.clone(), state.blobs.clone());
    let bytes = service.video_file(video_id).await.map_err(|err| {
        tracing::error!(error = ?err, video_id = %video_id, "failed to load video file");
        AppError::internal("failed to load video file")
    })?;
    bytes
        .map(binary_response)
        .ok_or_else(|| AppError::not_found("video not found"))
}

pub async fn thumbnail_file(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let service = VideoService::new(state.db.clone(), state.blobs.clone());
    let bytes = service.thumbnail_file(video_id).await.map_err(|err| {
        tracing::error!(error = ?err, video_id = %video_id, "failed to load thumbnail");
        AppError::internal("failed to load thumbnail")
    })?;
    bytes
        .map(binary_response)
        .ok_or_else(|| AppError::not_found("thumbnail not found"))
}

// ---------------------------------------------------------------------------
// Hall of Fame
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HallOfFameListResponse {
    pub videos: Vec<HallOfFameEntry>,
}

pub async fn list_hall_of_fame(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<HallOfFameListResponse>, AppError> {
    let service = HallOfFameService::new(state.db.clone(), state.blobs.clone());
    let videos = service.list().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to load hall of fame");
        AppError::internal("failed to load hall of fame")
    })?;
    Ok(Json(HallOfFameListResponse { videos }))
}

pub async fn get_hall_of_fame_entry(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<HallOfFameEntry>, AppError> {
    let service = HallOfFameService::new(state.db.clone(), state.blobs.clone());
    let entry = service.get(entry_id).await.map_err(|err| {
        tracing::error!(error = ?err, entry_id = %entry_id, "failed to load hall of fame entry");
        AppError::internal("failed to load hall of fame entry")
    })?;
    entry
        .map(Json)
        .ok_or_else(|| AppError::not_found("video does not exist in the hall of fame"))
}

pub async fn hall_of_fame_file(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let service = HallOfFameService::new(state.db.clone(), state.blobs.clone());
    let bytes = service.file(entry_id).await.map_err(|err| {
        tracing::error!(error = ?err, entry_id = %entry_id, "failed to load hall of fame file");
        AppError::internal("failed to load hall of fame file")
    })?;
    bytes
        .map(binary_response)
        .ok_or_else(|| AppError::not_found("video does not exist in the hall of fame"))
}

// ---------------------------------------------------------------------------
// Banned videos
// ---------------------------------------------------------------------------

pub async fn get_banned_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(banned_id): Path<Uuid>,
) -> Result<Json<BannedVideo>, AppError> {
    let service = ModerationService::new(state.db.clone(), state.blobs.clone(), state.policy);
    let outcome = service
        .get_banned_video(auth.user_id, banned_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, banned_id = %banned_id, "failed to load banned video");
            AppError::internal("failed to load banned video")
        })?;

    match outcome {
        OwnerScoped::Done(banned) => Ok(Json(banned)),
        OwnerScoped::NotFound => Err(AppError::not_found("banned video does not exist")),
        OwnerScoped::NotOwner => Err(AppError::forbidden("not your video")),
    }
}

pub async fn banned_video_file(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(banned_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let service = ModerationService::new(state.db.clone(), state.blobs.clone(), state.policy);
    let outcome = service
        .banned_video_file(auth.user_id, banned_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, banned_id = %banned_id, "failed to load banned video file");
            AppError::internal("failed to load banned video file")
        })?;

    match outcome {
        OwnerScoped::Done(bytes) => Ok(binary_response(bytes)),
        OwnerScoped::NotFound => Err(AppError::not_found("banned video does not exist")),
        OwnerScoped::NotOwner => Err(AppError::forbidden("not your video")),
    }
}

// ---------------------------------------------------------------------------
// Moderation (admin)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct BanResponse {
    pub video_id: Uuid,
    pub warnings: i64,
    pub newly_restricted: bool,
}

pub async fn ban_video(
    State(state): State<AppState>,
    _admin: AdminToken,
    Path(video_id): Path<Uuid>,
) -> Result<Json<BanResponse>, AppError> {
    let service = ModerationService::new(state.db.clone(), state.blobs.clone(), state.policy);
    let report = service.ban_video(video_id).await.map_err(|err| {
        tracing::error!(error = ?err, video_id = %video_id, "failed to ban video");
        AppError::internal("failed to ban video")
    })?;

    let report = report.ok_or_else(|| AppError::not_found("video not found"))?;
    Ok(Json(BanResponse {
        video_id,
        warnings: report.warnings,
        newly_restricted: report.newly_restricted,
    }))
}

#[derive(Deserialize, Default)]
pub struct RetireRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub cutoff: Option<OffsetDateTime>,
}

pub async fn retire_videos(
    State(state): State<AppState>,
    _admin: AdminToken,
    payload: Option<Json<RetireRequest>>,
) -> Result<Json<RetirementReport>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    let cutoff = payload
        .cutoff
        .unwrap_or_else(|| retirement::default_cutoff(&state.policy));

    let report = retirement::run(&state.db, &state.blobs, &state.policy, cutoff)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to run retirement");
            AppError::internal("failed to run retirement")
        })?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn feed_params_collect_repeated_tags() {
        let params = FeedParams::from_pairs(pairs(&[
            ("lat", "10.5"),
            ("lon", "-20"),
            ("tag", "b"),
            ("tag", "a"),
            ("sortBy", "recent"),
        ]))
        .unwrap();
        assert_eq!(params.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(params.sort, SortBy::Recent);
        assert_eq!(params.feed_type, FeedType::Global);
        assert_eq!(params.offset, 0);
    }

    #[test]
    fn feed_params_reject_bad_coordinates() {
        assert!(FeedParams::from_pairs(pairs(&[("lat", "91"), ("lon", "0")])).is_err());
        assert!(FeedParams::from_pairs(pairs(&[("lat", "0"), ("lon", "-180.5")])).is_err());
        assert!(FeedParams::from_pairs(pairs(&[("lat", "north"), ("lon", "0")])).is_err());
        assert!(FeedParams::from_pairs(pairs(&[("lon", "0")])).is_err());
    }

    #[test]
    fn feed_params_reject_unknown_feed_type() {
        let err = FeedParams::from_pairs(pairs(&[
            ("lat", "0"),
            ("lon", "0"),
            ("feedType", "trending"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn too_many_tags_are_rejected() {
        let tags: Vec<String> = (0..=MAX_TAGS_PER_VIDEO).map(|i| format!("t{}", i)).collect();
        assert!(validate_tags(tags).is_err());
        assert!(validate_tags(vec!["x".repeat(MAX_TAG_LEN + 1)]).is_err());
    }
}
