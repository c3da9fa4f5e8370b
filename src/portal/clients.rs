//! Client onboarding and tenant management (admin), plus the optional
//! bootstrap admin account.

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::{Caller, Portal, PortalError, PortalResult};
use crate::identity::{IdentityError, NewUser};
use crate::model::{Profile, ProfileUpdate, Role, Tenant, DEFAULT_COMPANY_NAME};
use crate::store::StoreError;

/// Admin request to create a client login.
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Tenant to join; defaults to a tenant keyed by the new user id.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap())
}

/// Tenant ids are lowercase slugs (`uber-eats`) or UUIDs.
fn check_tenant_id(id: &str) -> PortalResult<()> {
    if tenant_id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(PortalError::BadRequest(format!(
            "Invalid tenant id '{}': use lowercase letters, digits and dashes",
            id
        )))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Portal {
    /// Create a confirmed client login, its profile and its tenant.
    pub async fn create_client(&self, caller: &Caller, req: NewClient) -> PortalResult<Profile> {
        self.require_admin(caller)?;
        let tenant_id = non_empty(req.tenant_id);
        if let Some(id) = &tenant_id {
            check_tenant_id(id)?;
        }

        let user = self
            .identity
            .create_user(&NewUser {
                email: req.email.trim().to_string(),
                password: req.password,
                role: Role::Client,
            })
            .await?;

        let email = user.email.clone().unwrap_or_else(|| req.email.trim().to_string());
        let company_name = non_empty(req.company_name);
        let contact_name = non_empty(req.contact_name);
        let contact_email = non_empty(req.contact_email);
        let phone = non_empty(req.phone);

        // A database trigger may already have created a bare profile row.
        let profile = match self.store.get_profile(user.id).await? {
            Some(existing) => {
                let update = ProfileUpdate {
                    company_name: company_name.clone(),
                    contact_name,
                    contact_email: contact_email.or(Some(email)),
                    phone,
                    avatar_url: None,
                };
                self.store.update_profile(user.id, &update).await?;
                if existing.role != Role::Client {
                    self.store.set_profile_role(user.id, Role::Client).await?;
                }
                let tenant = tenant_id
                    .clone()
                    .or(existing.tenant_id)
                    .unwrap_or_else(|| user.id.to_string());
                self.store.set_profile_tenant(user.id, &tenant).await?
            }
            None => {
                let now = Utc::now();
                let draft = Profile {
                    id: user.id,
                    company_name: Some(
                        company_name
                            .clone()
                            .unwrap_or_else(|| DEFAULT_COMPANY_NAME.to_string()),
                    ),
                    contact_name,
                    contact_email: contact_email.or(Some(email)),
                    phone,
                    avatar_url: None,
                    role: Role::Client,
                    tenant_id: Some(tenant_id.clone().unwrap_or_else(|| user.id.to_string())),
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert_profile_if_absent(&draft).await?
            }
        };

        let tenant_id = profile.own_tenant_id();
        self.store
            .ensure_tenant(&Tenant {
                id: tenant_id.clone(),
                name: company_name.unwrap_or_else(|| DEFAULT_COMPANY_NAME.to_string()),
                created_by: Some(caller.user.id),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(user_id = %user.id, tenant = %tenant_id, "Created client");
        Ok(profile)
    }

    /// Client profiles, newest first.
    pub async fn list_clients(&self, caller: &Caller) -> PortalResult<Vec<Profile>> {
        self.require_admin(caller)?;
        Ok(self.store.list_profiles(Some(Role::Client), None).await?)
    }

    pub async fn list_tenants(&self, caller: &Caller) -> PortalResult<Vec<Tenant>> {
        self.require_admin(caller)?;
        Ok(self.store.list_tenants().await?)
    }

    pub async fn create_tenant(&self, caller: &Caller, id: &str, name: &str) -> PortalResult<Tenant> {
        self.require_admin(caller)?;
        let id = id.trim();
        check_tenant_id(id)?;
        if name.trim().is_empty() {
            return Err(PortalError::BadRequest(
                "Tenant name must not be empty".to_string(),
            ));
        }
        if self.store.get_tenant(id).await?.is_some() {
            return Err(StoreError::Conflict(format!("Tenant {} already exists", id)).into());
        }
        let tenant = self
            .store
            .ensure_tenant(&Tenant {
                id: id.to_string(),
                name: name.trim().to_string(),
                created_by: Some(caller.user.id),
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(tenant = %tenant.id, "Created tenant");
        Ok(tenant)
    }

    /// Make sure an admin login exists for `email`. Safe to call on every start.
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> PortalResult<Profile> {
        let created = self
            .identity
            .create_user(&NewUser {
                email: email.to_string(),
                password: password.to_string(),
                role: Role::Admin,
            })
            .await;
        let user = match created {
            Ok(user) => user,
            Err(IdentityError::AlreadyExists(_)) => {
                self.identity
                    .sign_in_with_password(email, password)
                    .await?
                    .user
            }
            Err(e) => return Err(e.into()),
        };

        let caller = self.resolve_caller(user).await?;
        if caller.is_admin() {
            return Ok(caller.profile);
        }
        let profile = self.store.set_profile_role(caller.user.id, Role::Admin).await?;
        tracing::info!(user_id = %profile.id, "Bootstrap admin ready");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::identity::{IdentityProvider, IdentityResult, LocalIdentity, Session, SessionUser};
    use crate::storage::LocalStorage;
    use crate::store::{InMemoryPortalStore, SharedStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_client(email: &str) -> NewClient {
        NewClient {
            email: email.to_string(),
            password: "password123".to_string(),
            company_name: None,
            contact_name: Some("Ada".to_string()),
            contact_email: None,
            phone: None,
            tenant_id: None,
        }
    }

    #[test]
    fn test_tenant_id_rules() {
        assert!(check_tenant_id("uber-eats").is_ok());
        assert!(check_tenant_id("6a1f4a7e-3c1b-4a57-9a8e-0d1f5e0c2b11").is_ok());
        assert!(check_tenant_id("Uber Eats").is_err());
        assert!(check_tenant_id("-leading").is_err());
        assert!(check_tenant_id("").is_err());
    }

    #[tokio::test]
    async fn test_create_client_defaults() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let before = portal.store().count_profiles(Some(Role::Client)).await.unwrap();

        let profile = portal.create_client(&admin, new_client("a@x.com")).await.unwrap();

        assert_eq!(
            portal.store().count_profiles(Some(Role::Client)).await.unwrap(),
            before + 1
        );
        assert_eq!(profile.role, Role::Client);
        assert_eq!(profile.company_name.as_deref(), Some(DEFAULT_COMPANY_NAME));
        assert_eq!(profile.contact_email.as_deref(), Some("a@x.com"));
        assert_eq!(profile.own_tenant_id(), profile.id.to_string());
        assert!(portal
            .store()
            .get_tenant(&profile.id.to_string())
            .await
            .unwrap()
            .is_some());

        let session = portal
            .identity()
            .sign_in_with_password("a@x.com", "password123")
            .await
            .unwrap();
        assert_eq!(session.user.id, profile.id);
    }

    #[tokio::test]
    async fn test_create_client_into_named_tenant() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let mut req = new_client("ops@ubereats.test");
        req.tenant_id = Some("uber-eats".to_string());
        req.company_name = Some("Uber Eats".to_string());

        let profile = portal.create_client(&admin, req).await.unwrap();

        assert_eq!(profile.own_tenant_id(), "uber-eats");
        let tenant = portal.store().get_tenant("uber-eats").await.unwrap().unwrap();
        assert_eq!(tenant.name, "Uber Eats");
    }

    /// Identity provider that writes a bare profile row on user creation,
    /// the way a database trigger on the auth users table does.
    struct TriggerIdentity {
        inner: LocalIdentity,
        store: SharedStore,
    }

    #[async_trait]
    impl IdentityProvider for TriggerIdentity {
        fn name(&self) -> &'static str {
            "trigger"
        }

        async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Session> {
            self.inner.sign_in_with_password(email, password).await
        }

        async fn get_user(&self, token: &str) -> IdentityResult<SessionUser> {
            self.inner.get_user(token).await
        }

        async fn sign_out(&self, token: &str) -> IdentityResult<()> {
            self.inner.sign_out(token).await
        }

        async fn send_password_reset(&self, email: &str, redirect_to: &str) -> IdentityResult<()> {
            self.inner.send_password_reset(email, redirect_to).await
        }

        async fn update_password(&self, token: &str, new_password: &str) -> IdentityResult<()> {
            self.inner.update_password(token, new_password).await
        }

        async fn create_user(&self, user: &NewUser) -> IdentityResult<SessionUser> {
            let created = self.inner.create_user(user).await?;
            let bare = Profile {
                company_name: None,
                tenant_id: None,
                ..Profile::default_client(created.id, created.email.as_deref())
            };
            self.store.insert_profile_if_absent(&bare).await.unwrap();
            Ok(created)
        }
    }

    fn trigger_portal() -> (Portal, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: SharedStore = Arc::new(InMemoryPortalStore::new());
        let identity = TriggerIdentity {
            inner: LocalIdentity::in_memory("test-secret".to_string(), 24).with_rounds(1_000),
            store: Arc::clone(&store),
        };
        let portal = Portal::new(
            store,
            Arc::new(identity),
            Arc::new(LocalStorage::new(
                dir.path().join("storage"),
                "http://localhost:3000",
            )),
            10,
            "http://localhost:3000",
        );
        (portal, dir)
    }

    #[tokio::test]
    async fn test_create_client_over_trigger_profile_keeps_tenant() {
        let (portal, _dir) = trigger_portal();
        let admin = testing::admin(&portal).await;
        let mut req = new_client("ops@ubereats.test");
        req.tenant_id = Some("uber-eats".to_string());
        req.company_name = Some("Uber Eats".to_string());
        req.phone = Some("555-0100".to_string());

        let profile = portal.create_client(&admin, req).await.unwrap();

        assert_eq!(profile.role, Role::Client);
        assert_eq!(profile.own_tenant_id(), "uber-eats");
        assert_eq!(profile.company_name.as_deref(), Some("Uber Eats"));
        assert_eq!(profile.phone.as_deref(), Some("555-0100"));
        let stored = portal.store().get_profile(profile.id).await.unwrap().unwrap();
        assert_eq!(stored.tenant_id.as_deref(), Some("uber-eats"));
        assert!(portal.store().get_tenant("uber-eats").await.unwrap().is_some());
        assert!(portal
            .store()
            .get_tenant(&profile.id.to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_client_over_trigger_profile_defaults_tenant() {
        let (portal, _dir) = trigger_portal();
        let admin = testing::admin(&portal).await;

        let profile = portal.create_client(&admin, new_client("a@x.com")).await.unwrap();

        assert_eq!(profile.tenant_id, Some(profile.id.to_string()));
        assert!(portal
            .store()
            .get_tenant(&profile.id.to_string())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_reported() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        portal.create_client(&admin, new_client("a@x.com")).await.unwrap();

        assert!(matches!(
            portal.create_client(&admin, new_client("a@x.com")).await,
            Err(PortalError::Identity(IdentityError::AlreadyExists(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_tenant_rejects_duplicates() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;

        portal.create_tenant(&admin, "uber-eats", "Uber Eats").await.unwrap();
        assert!(portal.create_tenant(&admin, "uber-eats", "Again").await.is_err());
        assert!(matches!(
            portal.create_tenant(&admin, "Bad Id", "x").await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_idempotent() {
        let (portal, _dir) = testing::portal();

        let first = portal
            .bootstrap_admin("root@portal.test", "password123")
            .await
            .unwrap();
        let second = portal
            .bootstrap_admin("root@portal.test", "password123")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Role::Admin);
        assert_eq!(portal.store().count_profiles(Some(Role::Admin)).await.unwrap(), 1);
    }
}
