//! GoTrue (Supabase Auth) identity provider.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    check_password, IdentityError, IdentityProvider, IdentityResult, NewUser, Session,
    SessionUser,
};
use crate::model::Role;
use crate::supabase::{SupabaseClient, SupabaseError};

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: serde_json::Value,
}

impl GoTrueUser {
    fn into_session_user(self) -> SessionUser {
        let app_role = self
            .app_metadata
            .get("role")
            .and_then(|r| r.as_str())
            .and_then(Role::parse);
        SessionUser {
            id: self.id,
            email: self.email,
            app_role,
            recovery: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

fn token_error(e: SupabaseError) -> IdentityError {
    match e.status() {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            IdentityError::InvalidToken
        }
        Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
            IdentityError::Invalid(e.to_string())
        }
        _ => IdentityError::Backend(e.to_string()),
    }
}

pub struct SupabaseIdentity {
    client: SupabaseClient,
}

impl SupabaseIdentity {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let url = format!("{}/token?grant_type=password", self.client.auth_url());
        let request = self
            .client
            .user_request(Method::POST, &url, None)
            .json(&json!({ "email": email.trim(), "password": password }));

        let resp: TokenResponse = SupabaseClient::send_json(request)
            .await
            .map_err(|e| match e.status() {
                Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNAUTHORIZED) => {
                    IdentityError::InvalidCredentials
                }
                _ => IdentityError::Backend(e.to_string()),
            })?;

        let expires_at = resp
            .expires_at
            .or_else(|| resp.expires_in.map(|s| Utc::now().timestamp() + s))
            .unwrap_or_else(|| Utc::now().timestamp() + 3600);

        Ok(Session {
            access_token: resp.access_token,
            expires_at,
            user: resp.user.into_session_user(),
        })
    }

    async fn get_user(&self, token: &str) -> IdentityResult<SessionUser> {
        let url = format!("{}/user", self.client.auth_url());
        let user: GoTrueUser =
            SupabaseClient::send_json(self.client.user_request(Method::GET, &url, Some(token)))
                .await
                .map_err(token_error)?;
        Ok(user.into_session_user())
    }

    async fn sign_out(&self, token: &str) -> IdentityResult<()> {
        let url = format!("{}/logout", self.client.auth_url());
        SupabaseClient::send(self.client.user_request(Method::POST, &url, Some(token)))
            .await
            .map_err(token_error)?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> IdentityResult<()> {
        let url = format!(
            "{}/recover?redirect_to={}",
            self.client.auth_url(),
            urlencoding::encode(redirect_to)
        );
        let request = self
            .client
            .user_request(Method::POST, &url, None)
            .json(&json!({ "email": email.trim() }));
        SupabaseClient::send(request)
            .await
            .map_err(|e| IdentityError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update_password(&self, token: &str, new_password: &str) -> IdentityResult<()> {
        check_password(new_password)?;
        let url = format!("{}/user", self.client.auth_url());
        let request = self
            .client
            .user_request(Method::PUT, &url, Some(token))
            .json(&json!({ "password": new_password }));
        SupabaseClient::send(request).await.map_err(token_error)?;
        Ok(())
    }

    async fn create_user(&self, new_user: &NewUser) -> IdentityResult<SessionUser> {
        check_password(&new_user.password)?;
        let url = format!("{}/admin/users", self.client.auth_url());
        let body = json!({
            "email": new_user.email.trim(),
            "password": new_user.password,
            "email_confirm": true,
            "user_metadata": { "role": new_user.role },
            "app_metadata": { "role": new_user.role },
        });
        let request = self.client.service_request(Method::POST, &url).json(&body);

        let user: GoTrueUser = SupabaseClient::send_json(request).await.map_err(|e| {
            let message = e.to_string();
            match e.status() {
                Some(StatusCode::UNPROCESSABLE_ENTITY) | Some(StatusCode::CONFLICT)
                    if message.contains("already") =>
                {
                    IdentityError::AlreadyExists(new_user.email.clone())
                }
                Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
                    IdentityError::Invalid(message)
                }
                _ => IdentityError::Backend(message),
            }
        })?;

        tracing::info!(user_id = %user.id, "Created Supabase auth user");
        Ok(user.into_session_user())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_user_reads_app_metadata_role() {
        let user: GoTrueUser = serde_json::from_value(json!({
            "id": "6a1f4a7e-3c1b-4a57-9a8e-0d1f5e0c2b11",
            "email": "a@x.com",
            "app_metadata": { "provider": "email", "role": "client" },
            "user_metadata": {}
        }))
        .unwrap();
        let session_user = user.into_session_user();
        assert_eq!(session_user.app_role, Some(Role::Client));
        assert_eq!(session_user.email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn test_missing_metadata_is_tolerated() {
        let user: GoTrueUser =
            serde_json::from_value(json!({ "id": "6a1f4a7e-3c1b-4a57-9a8e-0d1f5e0c2b11" }))
                .unwrap();
        assert_eq!(user.into_session_user().app_role, None);
    }

    #[test]
    fn test_token_errors() {
        let expired = SupabaseError::Status {
            status: StatusCode::UNAUTHORIZED,
            message: "JWT expired".to_string(),
        };
        assert!(matches!(token_error(expired), IdentityError::InvalidToken));

        let weak = SupabaseError::Status {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "Password should be at least 6 characters".to_string(),
        };
        assert!(matches!(token_error(weak), IdentityError::Invalid(_)));
    }
}
