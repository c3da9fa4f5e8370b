//! Bearer-token authentication and the session endpoints.
//!
//! - `POST /api/auth/login` exchanges email and password for a token
//! - Every protected route requires `Authorization: Bearer <token>`
//! - The middleware resolves the token to a [`Caller`] (creating the profile
//!   on first sight) and hands it to handlers as an extension
//! - Tokens minted by the password-reset flow only reach
//!   `POST /api/auth/update-password`

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use super::types::{
    LoginRequest, LoginResponse, ResetPasswordRequest, StatusResponse, UpdatePasswordRequest,
};

pub const UPDATE_PASSWORD_PATH: &str = "/api/auth/update-password";

/// Raw bearer token of the current request.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn bearer_token(req: &Request<Body>) -> Option<String> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or("")
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response();
    };

    let user = match state.portal.identity().get_user(&token).await {
        Ok(user) => user,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if user.recovery && req.uri().path() != UPDATE_PASSWORD_PATH {
        return ApiError::Unauthorized("Recovery token can only set a new password".to_string())
            .into_response();
    }

    let caller = match state.portal.resolve_caller(user).await {
        Ok(caller) => caller,
        Err(e) => return ApiError::from(e).into_response(),
    };

    req.extensions_mut().insert(caller);
    req.extensions_mut().insert(BearerToken(token));
    next.run(req).await
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let outcome = state.portal.login(&req.email, &req.password).await?;
    Ok(Json(outcome.into()))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> ApiResult<Json<StatusResponse>> {
    state.portal.logout(&token).await?;
    Ok(Json(StatusResponse::ok("Signed out")))
}

/// POST /api/auth/reset-password
/// Answers the same way for known and unknown addresses.
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.portal.request_password_reset(&req.email).await?;
    Ok(Json(StatusResponse::ok(
        "If the address is registered, a reset link has been sent",
    )))
}

/// POST /api/auth/update-password
pub async fn update_password(
    State(state): State<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Json(req): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.portal.update_password(&token, &req.password).await?;
    Ok(Json(StatusResponse::ok("Password updated")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/me");
        if let Some(value) = header {
            builder = builder.header(axum::http::header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&request(Some("Bearer abc"))), Some("abc".to_string()));
        assert_eq!(bearer_token(&request(Some("bearer abc"))), Some("abc".to_string()));
        assert_eq!(bearer_token(&request(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request(Some("Bearer  "))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }
}
