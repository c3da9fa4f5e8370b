//! Local identity provider.
//!
//! Users live in a JSON file (or only in memory), passwords are stored as
//! PBKDF2-SHA256 hashes in the `pbkdf2:iterations:hex_salt:hex_hash` format,
//! and sessions are HS256 JWTs. Password-reset links are written to the log
//! since there is no mailer.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    check_password, IdentityError, IdentityProvider, IdentityResult, NewUser, Session,
    SessionUser,
};
use crate::model::Role;

const DEFAULT_ROUNDS: u32 = 100_000;
const RECOVERY_TTL_MINUTES: i64 = 60;

pub(crate) fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

fn hash_password(password: &str, rounds: u32) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, rounds, &mut out);
    format!("pbkdf2:{}:{}:{}", rounds, hex::encode(salt), hex::encode(out))
}

fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split(':').collect();
    if parts.len() != 4 || parts[0] != "pbkdf2" {
        return false;
    }
    let (Ok(rounds), Ok(salt), Ok(expected)) = (
        parts[1].parse::<u32>(),
        hex::decode(parts[2]),
        hex::decode(parts[3]),
    ) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let mut out = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, rounds, &mut out);
    constant_time_eq(&out, &expected)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalUser {
    id: Uuid,
    email: String,
    password_hash: String,
    #[serde(default)]
    role: Role,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LocalUser {
    fn session_user(&self, recovery: bool) -> SessionUser {
        SessionUser {
            id: self.id,
            email: Some(self.email.clone()),
            app_role: Some(self.role),
            recovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenPurpose {
    Session,
    Recovery,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    role: Role,
    purpose: TokenPurpose,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
    /// Token id, used for revocation
    jti: String,
}

pub struct LocalIdentity {
    users: Arc<RwLock<HashMap<Uuid, LocalUser>>>,
    storage_path: Option<PathBuf>,
    secret: String,
    ttl: Duration,
    rounds: u32,
    /// Write reset links, token included, to the log. Dev mode only.
    log_reset_links: bool,
    /// Revoked token ids with their expiry.
    revoked: Arc<RwLock<HashMap<String, i64>>>,
}

impl LocalIdentity {
    /// Provider whose users are persisted to `storage_path`.
    pub async fn open(
        storage_path: PathBuf,
        secret: String,
        ttl_hours: i64,
    ) -> IdentityResult<Self> {
        let users = load_from_disk(&storage_path)
            .map_err(|e| IdentityError::Backend(format!("Failed to load users: {}", e)))?;
        tracing::debug!("Loaded {} local users", users.len());

        let mut identity = Self::in_memory(secret, ttl_hours);
        identity.users = Arc::new(RwLock::new(users));
        identity.storage_path = Some(storage_path);
        Ok(identity)
    }

    /// Provider that forgets its users on restart.
    pub fn in_memory(secret: String, ttl_hours: i64) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
            secret,
            ttl: Duration::hours(ttl_hours.max(1)),
            rounds: DEFAULT_ROUNDS,
            log_reset_links: false,
            revoked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the PBKDF2 iteration count for new hashes.
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Log password reset links in full. There is no mailer, so this is
    /// the only way to use the reset flow locally.
    pub fn with_reset_links_logged(mut self, enabled: bool) -> Self {
        self.log_reset_links = enabled;
        self
    }

    fn reset_link(&self, redirect_to: &str, token: &str) -> Option<String> {
        self.log_reset_links
            .then(|| format!("{}#access_token={}&type=recovery", redirect_to, token))
    }

    async fn save_to_disk(&self, users: &HashMap<Uuid, LocalUser>) -> IdentityResult<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IdentityError::Backend(e.to_string()))?;
        }
        let mut list: Vec<&LocalUser> = users.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| IdentityError::Backend(e.to_string()))?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| IdentityError::Backend(format!("Failed to save users: {}", e)))
    }

    fn issue(&self, user: &LocalUser, purpose: TokenPurpose) -> IdentityResult<(String, i64)> {
        let now = Utc::now();
        let ttl = match purpose {
            TokenPurpose::Session => self.ttl,
            TokenPurpose::Recovery => Duration::minutes(RECOVERY_TTL_MINUTES),
        };
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            purpose,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| IdentityError::Backend(e.to_string()))?;
        Ok((token, claims.exp))
    }

    async fn verify(&self, token: &str) -> IdentityResult<Claims> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| IdentityError::InvalidToken)?
        .claims;

        if self.revoked.read().await.contains_key(&claims.jti) {
            return Err(IdentityError::InvalidToken);
        }
        Ok(claims)
    }

    async fn revoke(&self, claims: &Claims) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, exp| *exp > now);
        revoked.insert(claims.jti.clone(), claims.exp);
    }

    async fn find_by_email(&self, email: &str) -> Option<LocalUser> {
        let email = normalize_email(email);
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
    }
}

fn load_from_disk(path: &Path) -> Result<HashMap<Uuid, LocalUser>, std::io::Error> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    let users: Vec<LocalUser> = serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(users.into_iter().map(|u| (u.id, u)).collect())
}

fn claims_user_id(claims: &Claims) -> IdentityResult<Uuid> {
    Uuid::parse_str(&claims.sub).map_err(|_| IdentityError::InvalidToken)
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let user = self
            .find_by_email(email)
            .await
            .ok_or(IdentityError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(IdentityError::InvalidCredentials);
        }
        let (access_token, expires_at) = self.issue(&user, TokenPurpose::Session)?;
        Ok(Session {
            access_token,
            expires_at,
            user: user.session_user(false),
        })
    }

    async fn get_user(&self, token: &str) -> IdentityResult<SessionUser> {
        let claims = self.verify(token).await?;
        let id = claims_user_id(&claims)?;
        let users = self.users.read().await;
        let user = users.get(&id).ok_or(IdentityError::InvalidToken)?;
        Ok(user.session_user(claims.purpose == TokenPurpose::Recovery))
    }

    async fn sign_out(&self, token: &str) -> IdentityResult<()> {
        let claims = self.verify(token).await?;
        self.revoke(&claims).await;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> IdentityResult<()> {
        let Some(user) = self.find_by_email(email).await else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };
        let (token, _) = self.issue(&user, TokenPurpose::Recovery)?;
        match self.reset_link(redirect_to, &token) {
            Some(link) => tracing::info!(user_id = %user.id, "Password reset link: {}", link),
            None => tracing::info!(user_id = %user.id, "Password reset issued"),
        }
        Ok(())
    }

    async fn update_password(&self, token: &str, new_password: &str) -> IdentityResult<()> {
        check_password(new_password)?;
        let claims = self.verify(token).await?;
        let id = claims_user_id(&claims)?;

        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(IdentityError::InvalidToken)?;
        user.password_hash = hash_password(new_password, self.rounds);
        user.updated_at = Utc::now();
        self.save_to_disk(&users).await?;
        drop(users);

        if claims.purpose == TokenPurpose::Recovery {
            self.revoke(&claims).await;
        }
        Ok(())
    }

    async fn create_user(&self, new_user: &NewUser) -> IdentityResult<SessionUser> {
        let email = normalize_email(&new_user.email);
        if email.is_empty() || !email.contains('@') {
            return Err(IdentityError::Invalid(format!(
                "Invalid email address: {}",
                new_user.email
            )));
        }
        check_password(&new_user.password)?;

        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(IdentityError::AlreadyExists(email));
        }
        let now = Utc::now();
        let user = LocalUser {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(&new_user.password, self.rounds),
            role: new_user.role,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        self.save_to_disk(&users).await?;

        tracing::info!(user_id = %user.id, role = %user.role, "Created local user");
        Ok(user.session_user(false))
    }
}
