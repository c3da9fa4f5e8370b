//! Identity providers: sign-in, sessions, password reset and admin user
//! creation.
//!
//! - `local`: PBKDF2 password hashes and HS256 JWT sessions
//! - `supabase`: hosted GoTrue auth API

mod local;
mod supabase;

pub use local::LocalIdentity;
pub use supabase::SupabaseIdentity;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, IdentityType};
use crate::model::Role;
use crate::store::StoreType;
use crate::supabase::SupabaseClient;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("User already registered: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Backend(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// The authenticated user behind a bearer token.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
    /// Role recorded by the identity provider. Informational; the profile
    /// row decides access.
    pub app_role: Option<Role>,
    /// Token was issued by the password-reset flow and only allows setting
    /// a new password.
    #[serde(skip)]
    pub recovery: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    /// Expiry as unix seconds
    pub expires_at: i64,
    pub user: SessionUser,
}

/// Admin-side user creation request.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Session>;

    /// Resolve a bearer token to its user.
    async fn get_user(&self, token: &str) -> IdentityResult<SessionUser>;

    async fn sign_out(&self, token: &str) -> IdentityResult<()>;

    /// Start the reset flow. Unknown emails are not an error.
    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> IdentityResult<()>;

    async fn update_password(&self, token: &str, new_password: &str) -> IdentityResult<()>;

    /// Create a confirmed user with the elevated credential.
    async fn create_user(&self, user: &NewUser) -> IdentityResult<SessionUser>;
}

pub type SharedIdentity = Arc<dyn IdentityProvider>;

pub(crate) const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn check_password(password: &str) -> IdentityResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(IdentityError::Invalid(format!(
            "Password should be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Create the identity provider selected by configuration.
pub async fn create_identity(config: &Config) -> IdentityResult<SharedIdentity> {
    match config.identity {
        IdentityType::Supabase => {
            let client = SupabaseClient::new(&config.supabase)
                .map_err(|e| IdentityError::Invalid(e.to_string()))?;
            Ok(Arc::new(SupabaseIdentity::new(client)))
        }
        IdentityType::Local => {
            let secret = match config.auth.jwt_secret.clone() {
                Some(secret) => secret,
                None => {
                    tracing::warn!("JWT_SECRET not set; using an ephemeral secret (dev mode)");
                    local::random_hex(32)
                }
            };
            let identity = if config.store == StoreType::Memory {
                LocalIdentity::in_memory(secret, config.auth.jwt_ttl_hours)
            } else {
                LocalIdentity::open(
                    config.data_dir.join("users.json"),
                    secret,
                    config.auth.jwt_ttl_hours,
                )
                .await?
            };
            Ok(Arc::new(identity.with_reset_links_logged(config.dev_mode)))
        }
    }
}
