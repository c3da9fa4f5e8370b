//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Profile, Role, RunStatus};
use crate::portal::LoginOutcome;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    /// Expiry as unix seconds
    pub exp: i64,
    pub user_id: Uuid,
    pub role: Role,
    /// Page the dashboard should navigate to
    pub redirect: String,
    pub profile: Profile,
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            token: outcome.session.access_token,
            exp: outcome.session.expires_at,
            user_id: outcome.session.user.id,
            role: outcome.profile.role,
            redirect: outcome.redirect,
            profile: outcome.profile,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// Generic acknowledgement body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dev_mode: bool,
    /// Data store backend in use
    pub store: String,
    /// Identity provider in use
    pub identity: String,
    /// Object storage in use
    pub storage: String,
}

/// Full tenant list for an automation.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignTenantsRequest {
    pub tenant_ids: Vec<String>,
}

/// Full automation list for a tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignAutomationsRequest {
    pub automation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenantRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinishRunRequest {
    pub status: RunStatus,
    #[serde(default)]
    pub log: Option<String>,
}
