//! Automation catalog and tenant reports, both admin-managed.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{Caller, Portal, PortalError, PortalResult};
use crate::model::{Automation, AutomationUpdate, NewAutomation, Report};

#[derive(Debug, Clone, Deserialize)]
pub struct NewReport {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub automation_id: Option<Uuid>,
}

fn require_name(name: &str) -> PortalResult<()> {
    if name.trim().is_empty() {
        return Err(PortalError::BadRequest(
            "Automation name must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl Portal {
    pub async fn create_automation(
        &self,
        caller: &Caller,
        new: NewAutomation,
    ) -> PortalResult<Automation> {
        self.require_admin(caller)?;
        require_name(&new.name)?;
        let automation = self.store.create_automation(&new.into_automation()).await?;
        tracing::info!(automation_id = %automation.id, name = %automation.name, "Created automation");
        Ok(automation)
    }

    pub async fn list_automations(&self, caller: &Caller) -> PortalResult<Vec<Automation>> {
        self.require_admin(caller)?;
        Ok(self.store.list_automations().await?)
    }

    pub async fn get_automation(&self, caller: &Caller, id: Uuid) -> PortalResult<Automation> {
        self.require_admin(caller)?;
        self.store
            .get_automation(id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Automation {}", id)))
    }

    pub async fn update_automation(
        &self,
        caller: &Caller,
        id: Uuid,
        update: AutomationUpdate,
    ) -> PortalResult<Automation> {
        self.require_admin(caller)?;
        if let Some(name) = &update.name {
            require_name(name)?;
        }
        Ok(self.store.update_automation(id, &update).await?)
    }

    /// Delete an automation together with its assignments.
    pub async fn delete_automation(&self, caller: &Caller, id: Uuid) -> PortalResult<()> {
        self.require_admin(caller)?;
        if !self.store.delete_automation(id).await? {
            return Err(PortalError::NotFound(format!("Automation {}", id)));
        }
        tracing::info!(automation_id = %id, "Deleted automation");
        Ok(())
    }

    pub async fn create_report(
        &self,
        caller: &Caller,
        tenant_id: &str,
        new: NewReport,
    ) -> PortalResult<Report> {
        self.require_admin(caller)?;
        if new.title.trim().is_empty() {
            return Err(PortalError::BadRequest(
                "Report title must not be empty".to_string(),
            ));
        }
        if self.store.get_tenant(tenant_id).await?.is_none() {
            return Err(PortalError::NotFound(format!("Tenant {}", tenant_id)));
        }
        if let Some(automation_id) = new.automation_id {
            if self.store.get_automation(automation_id).await?.is_none() {
                return Err(PortalError::BadRequest(format!(
                    "Unknown automation: {}",
                    automation_id
                )));
            }
        }

        let report = Report {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            automation_id: new.automation_id,
            title: new.title.trim().to_string(),
            content: new.content,
            created_at: Utc::now(),
        };
        Ok(self.store.insert_report(&report).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::store::{AssignmentKey, AssignmentScope};

    fn draft(name: &str) -> NewAutomation {
        NewAutomation {
            name: name.to_string(),
            description: Some("Pulls yesterday's orders".to_string()),
            automation_type: Some("Report Generation".to_string()),
            schedule: Some("Daily at 2:00 PM".to_string()),
            script_content: None,
        }
    }

    #[tokio::test]
    async fn test_automation_lifecycle() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;

        let created = portal
            .create_automation(&admin, draft("  Daily Sales Report "))
            .await
            .unwrap();
        assert_eq!(created.name, "Daily Sales Report");

        let updated = portal
            .update_automation(
                &admin,
                created.id,
                AutomationUpdate {
                    schedule: Some("Hourly".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.schedule.as_deref(), Some("Hourly"));

        portal
            .store()
            .replace_assignments(
                &AssignmentScope::Automation(created.id),
                &[AssignmentKey::new(admin.tenant_id(), created.id)],
            )
            .await
            .unwrap();
        portal.delete_automation(&admin, created.id).await.unwrap();

        assert!(matches!(
            portal.get_automation(&admin, created.id).await,
            Err(PortalError::NotFound(_))
        ));
        assert!(portal
            .store()
            .list_assignments(&AssignmentScope::Tenant(admin.tenant_id()))
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            portal.delete_automation(&admin, created.id).await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_names_are_rejected() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;

        assert!(matches!(
            portal.create_automation(&admin, draft("   ")).await,
            Err(PortalError::BadRequest(_))
        ));

        let created = portal.create_automation(&admin, draft("Sync")).await.unwrap();
        assert!(matches!(
            portal
                .update_automation(
                    &admin,
                    created.id,
                    AutomationUpdate {
                        name: Some(String::new()),
                        ..Default::default()
                    },
                )
                .await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_is_admin_only() {
        let (portal, _dir) = testing::portal();
        let client = testing::client(&portal, "a@x.com").await;

        assert!(matches!(
            portal.list_automations(&client).await,
            Err(PortalError::Forbidden(_))
        ));
        assert!(matches!(
            portal.create_automation(&client, draft("Sync")).await,
            Err(PortalError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_reports_reach_their_tenant() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let client = testing::client(&portal, "a@x.com").await;
        let tenant = client.tenant_id();

        portal
            .create_report(
                &admin,
                &tenant,
                NewReport {
                    title: "March summary".to_string(),
                    content: Some("All green".to_string()),
                    automation_id: None,
                },
            )
            .await
            .unwrap();

        let reports = portal.tenant_reports(&client, &tenant).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].title, "March summary");

        assert!(matches!(
            portal
                .create_report(
                    &admin,
                    "ghost",
                    NewReport {
                        title: "x".to_string(),
                        content: None,
                        automation_id: None,
                    },
                )
                .await,
            Err(PortalError::NotFound(_))
        ));
    }
}
