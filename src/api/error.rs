//! Mapping of portal failures onto HTTP responses.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::portal::PortalError;
use crate::storage::StorageError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Portal(e.into())
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        ApiError::Portal(e.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn portal_status(e: &PortalError) -> StatusCode {
    match e {
        PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
        PortalError::BadRequest(_) => StatusCode::BAD_REQUEST,
        PortalError::NotFound(_) => StatusCode::NOT_FOUND,
        PortalError::Redirect(_) => StatusCode::SEE_OTHER,
        PortalError::Store(e) => match e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PortalError::Identity(e) => match e {
            IdentityError::InvalidCredentials | IdentityError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            IdentityError::AlreadyExists(_) => StatusCode::CONFLICT,
            IdentityError::Invalid(_) => StatusCode::BAD_REQUEST,
            IdentityError::Backend(_) => StatusCode::BAD_GATEWAY,
        },
        PortalError::Storage(e) => match e {
            StorageError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Backend(_) => StatusCode::BAD_GATEWAY,
        },
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Portal(e) => portal_status(e),
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Portal(PortalError::Redirect(location)) = &self {
            return (StatusCode::SEE_OTHER, [(header::LOCATION, location.clone())]).into_response();
        }

        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!(status = %status, "Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
