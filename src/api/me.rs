//! The caller's own profile and avatar.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension, Multipart, State},
    response::Json,
    routing::{get, post},
    Router,
};

use crate::model::{Profile, ProfileUpdate};
use crate::portal::{Caller, MAX_AVATAR_BYTES};

use super::error::{ApiError, ApiResult};
use super::routes::AppState;

/// Multipart framing on top of the image itself.
const AVATAR_BODY_SLACK: usize = 64 * 1024;

/// Create the profile routes (nested under `/api/me`).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_me).patch(update_me))
        .route(
            "/avatar",
            post(upload_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + AVATAR_BODY_SLACK)),
        )
}

/// GET /api/me
async fn get_me(Extension(caller): Extension<Caller>) -> Json<Caller> {
    Json(caller)
}

/// PATCH /api/me
async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ProfileUpdate>,
) -> ApiResult<Json<Profile>> {
    Ok(Json(state.portal.update_own_profile(&caller, req).await?))
}

/// POST /api/me/avatar
/// Multipart upload with the image in a `file` field.
async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    mut multipart: Multipart,
) -> ApiResult<Json<Profile>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;

        let profile = state
            .portal
            .upload_avatar(&caller, file_name.as_deref(), content_type.as_deref(), data)
            .await?;
        return Ok(Json(profile));
    }
    Err(ApiError::BadRequest(
        "Missing 'file' field in upload".to_string(),
    ))
}
