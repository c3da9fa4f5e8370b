//! Configuration management for the automation portal.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `DEV_MODE` - Optional. Relaxes startup checks (ephemeral JWT secret). Defaults to `false`.
//! - `PORTAL_STORE` - Optional. `memory`, `sqlite` or `supabase`. Defaults to `sqlite`.
//! - `PORTAL_IDENTITY` - Optional. `local` or `supabase`. Defaults to `supabase` when the
//!   store is `supabase`, otherwise `local`.
//! - `PORTAL_DATA_DIR` - Optional. Directory for the SQLite database, local users and
//!   local object storage. Defaults to `./.portal`.
//! - `SUPABASE_URL` - Supabase project URL (required for Supabase backends).
//! - `SUPABASE_ANON_KEY` - Public/anonymous key (required for Supabase backends).
//! - `SUPABASE_SERVICE_ROLE_KEY` - Elevated key, server-side only (required for Supabase backends).
//! - `JWT_SECRET` - HS256 secret for the local identity provider.
//! - `JWT_TTL_HOURS` - Optional. Local session lifetime. Defaults to `24`.
//! - `PUBLIC_URL` - Optional. Externally visible base URL. Defaults to `http://HOST:PORT`.
//! - `RECENT_RUNS_LIMIT` - Optional. Runs shown on a tenant dashboard. Defaults to `10`.
//! - `ADMIN_EMAIL` / `ADMIN_PASSWORD` - Optional. Bootstrap admin for the local identity provider.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which identity provider issues and verifies sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityType {
    Local,
    Supabase,
}

impl IdentityType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "jwt" => Some(Self::Local),
            "supabase" | "gotrue" => Some(Self::Supabase),
            _ => None,
        }
    }
}

/// Hosted backend credentials.
#[derive(Clone, Default)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: Option<String>,

    /// Public key, safe for browser contexts
    pub anon_key: Option<String>,

    /// Elevated key; only used by server-side admin paths
    pub service_role_key: Option<String>,
}

// Hand-written so the keys never end up in logs.
impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<set>"))
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| "<set>"),
            )
            .finish()
    }
}

impl SupabaseConfig {
    /// Check if all three values are present.
    pub fn is_enabled(&self) -> bool {
        self.url.is_some() && self.anon_key.is_some() && self.service_role_key.is_some()
    }
}

/// Local session configuration.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub jwt_ttl_hours: i64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<set>"))
            .field("jwt_ttl_hours", &self.jwt_ttl_hours)
            .field("admin_email", &self.admin_email)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_ttl_hours: 24,
            admin_email: None,
            admin_password: None,
        }
    }
}

/// Portal configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Development mode
    pub dev_mode: bool,

    /// Data store backend
    pub store: StoreType,

    /// Identity provider backend
    pub identity: IdentityType,

    /// Directory for local persistence
    pub data_dir: PathBuf,

    /// Externally visible base URL (password reset links, public object URLs)
    pub public_url: String,

    /// How many runs a tenant dashboard shows by default
    pub recent_runs_limit: usize,

    pub supabase: SupabaseConfig,

    pub auth: AuthConfig,
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when a Supabase backend is selected
    /// without its credentials, or when the local identity provider has no
    /// `JWT_SECRET` outside dev mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let dev_mode = env_bool("DEV_MODE");

        let store = match std::env::var("PORTAL_STORE") {
            Ok(v) => StoreType::parse(&v)
                .ok_or_else(|| ConfigError::InvalidValue("PORTAL_STORE".to_string(), v))?,
            Err(_) => StoreType::default(),
        };

        let identity = match std::env::var("PORTAL_IDENTITY") {
            Ok(v) => IdentityType::parse(&v)
                .ok_or_else(|| ConfigError::InvalidValue("PORTAL_IDENTITY".to_string(), v))?,
            Err(_) if store == StoreType::Supabase => IdentityType::Supabase,
            Err(_) => IdentityType::Local,
        };

        let data_dir = std::env::var("PORTAL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".portal"));

        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));
        url::Url::parse(&public_url)
            .map_err(|e| ConfigError::InvalidValue("PUBLIC_URL".to_string(), e.to_string()))?;
        let public_url = public_url.trim_end_matches('/').to_string();

        let recent_runs_limit = std::env::var("RECENT_RUNS_LIMIT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("RECENT_RUNS_LIMIT".to_string(), format!("{}", e))
            })?;

        let supabase = SupabaseConfig {
            url: std::env::var("SUPABASE_URL").ok().filter(|s| !s.is_empty()),
            anon_key: std::env::var("SUPABASE_ANON_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        let jwt_ttl_hours = std::env::var("JWT_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("JWT_TTL_HOURS".to_string(), format!("{}", e)))?;

        let auth = AuthConfig {
            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            jwt_ttl_hours,
            admin_email: std::env::var("ADMIN_EMAIL").ok().filter(|s| !s.is_empty()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        let config = Self {
            host,
            port,
            dev_mode,
            store,
            identity,
            data_dir,
            public_url,
            recent_runs_limit,
            supabase,
            auth,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the selected backends have what they need.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let needs_supabase =
            self.store == StoreType::Supabase || self.identity == IdentityType::Supabase;
        if needs_supabase {
            if self.supabase.url.is_none() {
                return Err(ConfigError::MissingEnvVar("SUPABASE_URL".to_string()));
            }
            if self.supabase.anon_key.is_none() {
                return Err(ConfigError::MissingEnvVar("SUPABASE_ANON_KEY".to_string()));
            }
            if self.supabase.service_role_key.is_none() {
                return Err(ConfigError::MissingEnvVar(
                    "SUPABASE_SERVICE_ROLE_KEY".to_string(),
                ));
            }
        }
        if self.identity == IdentityType::Local && self.auth.jwt_secret.is_none() && !self.dev_mode
        {
            return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
        }
        if self.recent_runs_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "RECENT_RUNS_LIMIT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            dev_mode: true,
            store: StoreType::Memory,
            identity: IdentityType::Local,
            data_dir,
            public_url: "http://127.0.0.1:3000".to_string(),
            recent_runs_limit: 10,
            supabase: SupabaseConfig::default(),
            auth: AuthConfig {
                jwt_secret: Some("test-secret".to_string()),
                ..AuthConfig::default()
            },
        }
    }
}
