//! Assignment status, run history and "Run Now" requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Caller, Portal, PortalError, PortalResult};
use crate::model::{Assignment, AssignmentUpdate, Run, RunStatus};

/// Answer to a "Run Now" request. Nothing is executed.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub assignment_id: Uuid,
    pub automation_id: Uuid,
    pub tenant_id: String,
    pub requested_by: Uuid,
    pub requested_at: DateTime<Utc>,
    pub executed: bool,
}

impl Portal {
    pub async fn update_assignment(
        &self,
        caller: &Caller,
        id: Uuid,
        update: AssignmentUpdate,
    ) -> PortalResult<Assignment> {
        self.require_admin(caller)?;
        Ok(self.store.update_assignment(id, &update).await?)
    }

    /// Record a new running run for an assignment.
    pub async fn start_run(&self, caller: &Caller, assignment_id: Uuid) -> PortalResult<Run> {
        self.require_admin(caller)?;
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Assignment {}", assignment_id)))?;
        let run = self.store.insert_run(&Run::start(&assignment)).await?;
        tracing::info!(run_id = %run.id, assignment_id = %assignment_id, "Run started");
        Ok(run)
    }

    /// Close a running run as completed or failed.
    pub async fn finish_run(
        &self,
        caller: &Caller,
        run_id: Uuid,
        status: RunStatus,
        log: Option<String>,
    ) -> PortalResult<Run> {
        self.require_admin(caller)?;
        if !status.is_terminal() {
            return Err(PortalError::BadRequest(
                "A run can only finish as completed or failed".to_string(),
            ));
        }
        let run = self
            .store
            .finish_run(run_id, status, log.as_deref(), Utc::now())
            .await?;
        tracing::info!(run_id = %run.id, status = %run.status, "Run finished");
        Ok(run)
    }

    /// "Run Now": authorized like the tenant's dashboard, logged, not executed.
    pub async fn request_run(
        &self,
        caller: &Caller,
        tenant_id: &str,
        assignment_id: Uuid,
    ) -> PortalResult<RunRequest> {
        self.authorize_tenant(caller, tenant_id)?;
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| PortalError::NotFound(format!("Assignment {}", assignment_id)))?;

        tracing::info!(
            user_id = %caller.user.id,
            tenant = %tenant_id,
            automation_id = %assignment.automation_id,
            "Run requested (no executor configured)"
        );

        Ok(RunRequest {
            assignment_id: assignment.id,
            automation_id: assignment.automation_id,
            tenant_id: tenant_id.to_string(),
            requested_by: caller.user.id,
            requested_at: Utc::now(),
            executed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::model::{AssignmentStatus, NewAutomation};
    use crate::store::{AssignmentKey, AssignmentScope, StoreError};

    async fn assignment_for(portal: &Portal, tenant: &str) -> Assignment {
        let automation = NewAutomation {
            name: "Nightly Backup".to_string(),
            ..Default::default()
        }
        .into_automation();
        portal.store().create_automation(&automation).await.unwrap();
        let scope = AssignmentScope::Automation(automation.id);
        portal
            .store()
            .replace_assignments(&scope, &[AssignmentKey::new(tenant, automation.id)])
            .await
            .unwrap();
        portal.store().list_assignments(&scope).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let assignment = assignment_for(&portal, &admin.tenant_id()).await;

        let run = portal.start_run(&admin, assignment.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let done = portal
            .finish_run(&admin, run.id, RunStatus::Failed, Some("timeout".to_string()))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.log.as_deref(), Some("timeout"));

        assert!(matches!(
            portal
                .finish_run(&admin, run.id, RunStatus::Completed, None)
                .await,
            Err(PortalError::Store(StoreError::Conflict(_)))
        ));
        assert!(matches!(
            portal
                .finish_run(&admin, run.id, RunStatus::Running, None)
                .await,
            Err(PortalError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_assignment_status_update() {
        let (portal, _dir) = testing::portal();
        let admin = testing::admin(&portal).await;
        let assignment = assignment_for(&portal, &admin.tenant_id()).await;

        let updated = portal
            .update_assignment(
                &admin,
                assignment.id,
                AssignmentUpdate {
                    status: Some(AssignmentStatus::Error),
                    next_run_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, AssignmentStatus::Error);
    }

    #[tokio::test]
    async fn test_request_run_is_logged_not_executed() {
        let (portal, _dir) = testing::portal();
        let client = testing::client(&portal, "a@x.com").await;
        let tenant = client.tenant_id();
        let assignment = assignment_for(&portal, &tenant).await;

        let request = portal
            .request_run(&client, &tenant, assignment.id)
            .await
            .unwrap();
        assert!(!request.executed);
        assert_eq!(request.requested_by, client.user.id);
        assert_eq!(portal.store().count_runs(None).await.unwrap(), 0);

        let other = testing::client(&portal, "b@x.com").await;
        assert!(matches!(
            portal
                .request_run(&other, &other.tenant_id(), assignment.id)
                .await,
            Err(PortalError::NotFound(_))
        ));
        assert!(matches!(
            portal.request_run(&other, &tenant, assignment.id).await,
            Err(PortalError::Redirect(_))
        ));
    }
}
