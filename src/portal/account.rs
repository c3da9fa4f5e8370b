//! Sign-in, sign-out, password flows and the caller's own profile.

use bytes::Bytes;
use serde::Serialize;
use std::path::Path;

use super::{Caller, Portal, PortalError, PortalResult, AVATAR_BUCKET};
use crate::identity::Session;
use crate::model::{Profile, ProfileUpdate};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

const AVATAR_TYPES: [(&str, &str); 5] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub session: Session,
    pub profile: Profile,
    /// Page the caller lands on
    pub redirect: String,
}

/// File extension and content type for an uploaded avatar, preferring the
/// file name's extension.
fn avatar_type(file_name: Option<&str>, content_type: Option<&str>) -> Option<(String, String)> {
    let from_name = file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .and_then(|ext| {
            AVATAR_TYPES
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(e, ct)| (e.to_string(), ct.to_string()))
        });
    from_name.or_else(|| {
        let ct = content_type?.to_lowercase();
        AVATAR_TYPES
            .iter()
            .find(|(_, t)| *t == ct)
            .map(|(e, t)| (e.to_string(), t.to_string()))
    })
}

impl Portal {
    /// Password sign-in. Runs the gate so a first login creates the profile.
    pub async fn login(&self, email: &str, password: &str) -> PortalResult<LoginOutcome> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(PortalError::BadRequest(
                "Email and password are required".to_string(),
            ));
        }
        let session = self.identity.sign_in_with_password(email, password).await?;
        let caller = self.resolve_caller(session.user.clone()).await?;
        tracing::info!(user_id = %caller.user.id, role = %caller.profile.role, "Signed in");

        Ok(LoginOutcome {
            redirect: caller.landing_path(),
            profile: caller.profile,
            session,
        })
    }

    pub async fn logout(&self, token: &str) -> PortalResult<()> {
        Ok(self.identity.sign_out(token).await?)
    }

    /// Start a password reset. Succeeds whether or not the email is known.
    pub async fn request_password_reset(&self, email: &str) -> PortalResult<()> {
        if email.trim().is_empty() {
            return Err(PortalError::BadRequest("Email is required".to_string()));
        }
        let redirect_to = format!("{}/reset-password", self.public_url);
        if let Err(e) = self
            .identity
            .send_password_reset(email.trim(), &redirect_to)
            .await
        {
            tracing::warn!("Password reset request failed: {}", e);
        }
        Ok(())
    }

    pub async fn update_password(&self, token: &str, password: &str) -> PortalResult<()> {
        self.identity.update_password(token, password).await?;
        Ok(())
    }

    /// Update contact fields of the caller's own profile. Role and tenant are
    /// not editable here; the avatar goes through `upload_avatar`.
    pub async fn update_own_profile(
        &self,
        caller: &Caller,
        mut update: ProfileUpdate,
    ) -> PortalResult<Profile> {
        update.avatar_url = None;
        if update.is_empty() {
            return Err(PortalError::BadRequest("No fields to update".to_string()));
        }
        Ok(self.store.update_profile(caller.profile.id, &update).await?)
    }

    /// Store an avatar at `<user id>/avatar.<ext>`, replacing the previous
    /// one, and point the profile at its public URL.
    pub async fn upload_avatar(
        &self,
        caller: &Caller,
        file_name: Option<&str>,
        content_type: Option<&str>,
        data: Bytes,
    ) -> PortalResult<Profile> {
        if data.is_empty() {
            return Err(PortalError::BadRequest("Avatar file is empty".to_string()));
        }
        if data.len() > MAX_AVATAR_BYTES {
            return Err(PortalError::BadRequest(format!(
                "Avatar exceeds {} bytes",
                MAX_AVATAR_BYTES
            )));
        }
        let (ext, content_type) = avatar_type(file_name, content_type).ok_or_else(|| {
            PortalError::BadRequest("Avatar must be a PNG, JPEG, GIF or WebP image".to_string())
        })?;

        let path = format!("{}/avatar.{}", caller.user.id, ext);
        self.storage
            .upload(AVATAR_BUCKET, &path, data, &content_type)
            .await?;
        let url = self.storage.public_url(AVATAR_BUCKET, &path);

        let profile = self
            .store
            .update_profile(
                caller.profile.id,
                &ProfileUpdate {
                    avatar_url: Some(url),
                    ..ProfileUpdate::default()
                },
            )
            .await?;
        tracing::info!(user_id = %caller.user.id, "Avatar updated");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::identity::IdentityError;
    use crate::model::Role;

    #[test]
    fn test_avatar_type() {
        assert_eq!(
            avatar_type(Some("me.PNG"), None),
            Some(("png".to_string(), "image/png".to_string()))
        );
        assert_eq!(
            avatar_type(Some("blob"), Some("image/jpeg")),
            Some(("jpg".to_string(), "image/jpeg".to_string()))
        );
        assert_eq!(avatar_type(Some("notes.txt"), Some("text/plain")), None);
        assert_eq!(avatar_type(None, None), None);
    }

    #[tokio::test]
    async fn test_login_creates_profile_and_redirects() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let client = portal
            .create_client(
                &admin,
                super::super::NewClient {
                    email: "a@x.com".to_string(),
                    password: "password123".to_string(),
                    company_name: None,
                    contact_name: None,
                    contact_email: None,
                    phone: None,
                    tenant_id: None,
                },
            )
            .await
            .unwrap();

        let outcome = portal.login("a@x.com", "password123").await.unwrap();
        assert_eq!(outcome.profile.id, client.id);
        assert_eq!(outcome.profile.role, Role::Client);
        assert_eq!(outcome.redirect, format!("/dashboard/{}/automations", client.id));

        let outcome = portal.login("admin@portal.test", "password123").await.unwrap();
        assert_eq!(outcome.redirect, "/admin");

        assert!(matches!(
            portal.login("a@x.com", "wrong-password").await,
            Err(PortalError::Identity(IdentityError::InvalidCredentials))
        ));
    }

    #[tokio::test]
    async fn test_reset_for_unknown_email_succeeds() {
        let (portal, _dir) = testing::portal();
        assert!(portal.request_password_reset("ghost@x.com").await.is_ok());
        assert!(matches!(
            portal.request_password_reset("  ").await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_own_profile_update_ignores_avatar() {
        let (portal, _dir) = testing::portal();
        let caller = testing::client(&portal, "a@x.com").await;

        let profile = portal
            .update_own_profile(
                &caller,
                ProfileUpdate {
                    phone: Some("555-0100".to_string()),
                    avatar_url: Some("http://evil.test/x.png".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(profile.phone.as_deref(), Some("555-0100"));
        assert_eq!(profile.avatar_url, None);

        assert!(matches!(
            portal
                .update_own_profile(&caller, ProfileUpdate::default())
                .await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_avatar_upload_sets_public_url() {
        let (portal, dir) = testing::portal();
        let caller = testing::client(&portal, "a@x.com").await;

        let profile = portal
            .upload_avatar(
                &caller,
                Some("me.png"),
                Some("image/png"),
                Bytes::from_static(b"\x89PNG fake"),
            )
            .await
            .unwrap();

        let expected = format!(
            "http://localhost:3000/storage/v1/object/public/avatars/{}/avatar.png",
            caller.user.id
        );
        assert_eq!(profile.avatar_url.as_deref(), Some(expected.as_str()));
        assert!(dir
            .path()
            .join(format!("storage/avatars/{}/avatar.png", caller.user.id))
            .exists());

        assert!(matches!(
            portal
                .upload_avatar(&caller, Some("me.png"), None, Bytes::new())
                .await,
            Err(PortalError::BadRequest(_))
        ));
    }
}
