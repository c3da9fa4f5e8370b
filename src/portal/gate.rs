//! Role gate: resolves the caller's profile and decides what it may see.

use chrono::Utc;
use serde::Serialize;

use super::{Portal, PortalError, PortalResult, ADMIN_OVERVIEW_PATH, DASHBOARD_PATH};
use crate::identity::SessionUser;
use crate::model::{Profile, Tenant};

/// An authenticated user together with its profile row.
#[derive(Debug, Clone, Serialize)]
pub struct Caller {
    pub user: SessionUser,
    pub profile: Profile,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.profile.is_admin()
    }

    /// Tenant a client is confined to.
    pub fn tenant_id(&self) -> String {
        self.profile.own_tenant_id()
    }

    /// Landing page after sign-in.
    pub fn landing_path(&self) -> String {
        if self.is_admin() {
            "/admin".to_string()
        } else {
            format!("/dashboard/{}/automations", self.tenant_id())
        }
    }

    /// API route `GET /api/dashboard` forwards to.
    pub fn dashboard_redirect(&self) -> String {
        if self.is_admin() {
            ADMIN_OVERVIEW_PATH.to_string()
        } else {
            format!("{}/{}/automations", DASHBOARD_PATH, self.tenant_id())
        }
    }
}

impl Portal {
    /// Load the caller's profile, creating a default client profile and its
    /// tenant the first time an identity is seen.
    pub async fn resolve_caller(&self, user: SessionUser) -> PortalResult<Caller> {
        if let Some(profile) = self.store.get_profile(user.id).await? {
            return Ok(Caller { user, profile });
        }

        let draft = Profile::default_client(user.id, user.email.as_deref());
        // Concurrent first loads race here; the store keeps the first row.
        let profile = self.store.insert_profile_if_absent(&draft).await?;

        let tenant_id = profile.own_tenant_id();
        self.store
            .ensure_tenant(&Tenant {
                id: tenant_id.clone(),
                name: profile
                    .company_name
                    .clone()
                    .or_else(|| user.email.clone())
                    .unwrap_or_else(|| tenant_id.clone()),
                created_by: Some(user.id),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(user_id = %user.id, tenant = %tenant_id, "Created default client profile");
        Ok(Caller { user, profile })
    }

    /// Admins see every tenant; clients only their own. Anyone else is sent
    /// back to the dashboard root.
    pub fn authorize_tenant(&self, caller: &Caller, tenant_id: &str) -> PortalResult<()> {
        if caller.is_admin() || caller.tenant_id() == tenant_id {
            return Ok(());
        }
        tracing::warn!(
            user_id = %caller.user.id,
            tenant = %tenant_id,
            "Client requested another tenant; redirecting"
        );
        Err(PortalError::Redirect(DASHBOARD_PATH.to_string()))
    }

    pub fn require_admin(&self, caller: &Caller) -> PortalResult<()> {
        if caller.is_admin() {
            Ok(())
        } else {
            Err(PortalError::Forbidden("Admin access required".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::model::{Role, DEFAULT_COMPANY_NAME};
    use uuid::Uuid;

    fn session_user(email: &str) -> SessionUser {
        SessionUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            app_role: None,
            recovery: false,
        }
    }

    #[tokio::test]
    async fn test_first_load_creates_client_profile_and_tenant() {
        let (portal, _dir) = testing::portal();
        let user = session_user("new@x.com");

        let caller = portal.resolve_caller(user.clone()).await.unwrap();

        assert_eq!(caller.profile.role, Role::Client);
        assert_eq!(caller.profile.contact_email.as_deref(), Some("new@x.com"));
        assert_eq!(
            caller.profile.company_name.as_deref(),
            Some(DEFAULT_COMPANY_NAME)
        );
        let tenant = portal
            .store()
            .get_tenant(&user.id.to_string())
            .await
            .unwrap()
            .expect("tenant row");
        assert_eq!(tenant.created_by, Some(user.id));
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_leave_one_profile() {
        let (portal, _dir) = testing::portal();
        let user = session_user("race@x.com");

        let (a, b) = tokio::join!(
            portal.resolve_caller(user.clone()),
            portal.resolve_caller(user.clone())
        );
        assert_eq!(a.unwrap().profile.id, b.unwrap().profile.id);
        assert_eq!(portal.store().count_profiles(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_client_is_redirected_from_other_tenants() {
        let (portal, _dir) = testing::portal();
        let caller = testing::client(&portal, "a@x.com").await;

        assert!(portal.authorize_tenant(&caller, &caller.tenant_id()).is_ok());
        match portal.authorize_tenant(&caller, "someone-else") {
            Err(PortalError::Redirect(to)) => assert_eq!(to, DASHBOARD_PATH),
            other => panic!("expected redirect, got {:?}", other),
        }
        assert!(matches!(
            portal.require_admin(&caller),
            Err(PortalError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_sees_every_tenant() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;

        assert!(portal.authorize_tenant(&admin, "uber-eats").is_ok());
        assert!(portal.require_admin(&admin).is_ok());
        assert_eq!(admin.landing_path(), "/admin");
        assert_eq!(admin.dashboard_redirect(), ADMIN_OVERVIEW_PATH);
    }

    #[tokio::test]
    async fn test_client_landing_paths() {
        let (portal, _dir) = testing::portal();
        let caller = testing::client(&portal, "a@x.com").await;
        let tenant = caller.tenant_id();

        assert_eq!(caller.landing_path(), format!("/dashboard/{}/automations", tenant));
        assert_eq!(
            caller.dashboard_redirect(),
            format!("/api/dashboard/{}/automations", tenant)
        );
    }
}
