//! Assignment reconciliation between automations and tenants.

use std::collections::BTreeSet;
use uuid::Uuid;

use super::{Caller, Portal, PortalError, PortalResult};
use crate::model::Assignment;
use crate::store::{AssignmentKey, AssignmentPlan, AssignmentScope};

impl Portal {
    /// Make `tenant_ids` the complete set of tenants assigned to an
    /// automation. Tenants missing from the list lose the assignment.
    pub async fn assign_automation(
        &self,
        caller: &Caller,
        automation_id: Uuid,
        tenant_ids: &[String],
    ) -> PortalResult<AssignmentPlan> {
        self.require_admin(caller)?;
        if self.store.get_automation(automation_id).await?.is_none() {
            return Err(PortalError::NotFound(format!("Automation {}", automation_id)));
        }

        let tenants: BTreeSet<String> = tenant_ids
            .iter()
            .map(|t| t.trim().to_string())
            .collect();
        let mut unknown = Vec::new();
        for tenant in &tenants {
            if tenant.is_empty() || self.store.get_tenant(tenant).await?.is_none() {
                unknown.push(tenant.clone());
            }
        }
        if !unknown.is_empty() {
            return Err(PortalError::BadRequest(format!(
                "Unknown tenants: {}",
                unknown.join(", ")
            )));
        }

        let desired: Vec<AssignmentKey> = tenants
            .into_iter()
            .map(|t| AssignmentKey::new(t, automation_id))
            .collect();
        let plan = self
            .store
            .replace_assignments(&AssignmentScope::Automation(automation_id), &desired)
            .await?;

        tracing::info!(
            automation_id = %automation_id,
            added = plan.insert.len(),
            removed = plan.remove.len(),
            "Reconciled automation assignments"
        );
        Ok(plan)
    }

    /// Make `automation_ids` the complete set of automations assigned to a
    /// tenant.
    pub async fn assign_to_tenant(
        &self,
        caller: &Caller,
        tenant_id: &str,
        automation_ids: &[Uuid],
    ) -> PortalResult<AssignmentPlan> {
        self.require_admin(caller)?;
        if self.store.get_tenant(tenant_id).await?.is_none() {
            return Err(PortalError::NotFound(format!("Tenant {}", tenant_id)));
        }

        let automations: BTreeSet<Uuid> = automation_ids.iter().copied().collect();
        let mut unknown = Vec::new();
        for id in &automations {
            if self.store.get_automation(*id).await?.is_none() {
                unknown.push(id.to_string());
            }
        }
        if !unknown.is_empty() {
            return Err(PortalError::BadRequest(format!(
                "Unknown automations: {}",
                unknown.join(", ")
            )));
        }

        let desired: Vec<AssignmentKey> = automations
            .into_iter()
            .map(|id| AssignmentKey::new(tenant_id, id))
            .collect();
        let plan = self
            .store
            .replace_assignments(&AssignmentScope::Tenant(tenant_id.to_string()), &desired)
            .await?;

        tracing::info!(
            tenant = %tenant_id,
            added = plan.insert.len(),
            removed = plan.remove.len(),
            "Reconciled tenant assignments"
        );
        Ok(plan)
    }

    /// Every assignment of one automation (admin automation detail page).
    pub async fn automation_assignments(
        &self,
        caller: &Caller,
        automation_id: Uuid,
    ) -> PortalResult<Vec<Assignment>> {
        self.require_admin(caller)?;
        if self.store.get_automation(automation_id).await?.is_none() {
            return Err(PortalError::NotFound(format!("Automation {}", automation_id)));
        }
        Ok(self
            .store
            .list_assignments(&AssignmentScope::Automation(automation_id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::model::{NewAutomation, Tenant};
    use chrono::Utc;

    async fn setup(portal: &Portal, tenants: &[&str]) -> Uuid {
        for id in tenants {
            portal
                .store()
                .ensure_tenant(&Tenant {
                    id: id.to_string(),
                    name: id.to_string(),
                    created_by: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let automation = NewAutomation {
            name: "Daily Sales Report".to_string(),
            ..Default::default()
        }
        .into_automation();
        portal.store().create_automation(&automation).await.unwrap();
        automation.id
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_assign_replaces_tenant_set() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let automation = setup(&portal, &["acme", "globex", "uber-eats"]).await;

        portal
            .assign_automation(&admin, automation, &ids(&["acme", "globex"]))
            .await
            .unwrap();
        let plan = portal
            .assign_automation(&admin, automation, &ids(&["globex", "uber-eats", "uber-eats"]))
            .await
            .unwrap();

        assert_eq!(plan.insert, vec![AssignmentKey::new("uber-eats", automation)]);
        assert_eq!(plan.remove, vec![AssignmentKey::new("acme", automation)]);
        let mut tenants: Vec<String> = portal
            .automation_assignments(&admin, automation)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.tenant_id)
            .collect();
        tenants.sort();
        assert_eq!(tenants, ids(&["globex", "uber-eats"]));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_rejected_before_writing() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let automation = setup(&portal, &["acme"]).await;

        let err = portal
            .assign_automation(&admin, automation, &ids(&["acme", "nobody"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::BadRequest(m) if m.contains("nobody")));
        assert!(portal
            .automation_assignments(&admin, automation)
            .await
            .unwrap()
            .is_empty());

        let err = portal
            .assign_automation(&admin, Uuid::new_v4(), &ids(&["acme"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_assign_to_tenant_uses_same_diff() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let automation = setup(&portal, &["acme"]).await;

        let plan = portal
            .assign_to_tenant(&admin, "acme", &[automation, automation])
            .await
            .unwrap();
        assert_eq!(plan.insert.len(), 1);

        let plan = portal.assign_to_tenant(&admin, "acme", &[]).await.unwrap();
        assert_eq!(plan.remove.len(), 1);

        assert!(matches!(
            portal.assign_to_tenant(&admin, "ghost", &[automation]).await,
            Err(PortalError::NotFound(_))
        ));
        assert!(matches!(
            portal.assign_to_tenant(&admin, "acme", &[Uuid::new_v4()]).await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_clients_cannot_assign() {
        let (portal, _dir) = testing::portal();
        let client = testing::client(&portal, "a@x.com").await;
        let automation = setup(&portal, &["acme"]).await;

        assert!(matches!(
            portal
                .assign_automation(&client, automation, &ids(&["acme"]))
                .await,
            Err(PortalError::Forbidden(_))
        ));
    }
}
