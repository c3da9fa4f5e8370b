//! Tenant dashboards and the admin overview.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::{Caller, Portal, PortalError, PortalResult, MAX_RUNS_LIMIT, OVERVIEW_RECENT_LIMIT};
use crate::model::{AssignmentStatus, Automation, Profile, Report, Role, Run, RunStatus, Tenant};
use crate::store::AssignmentScope;

/// One row of a tenant's automation list.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssignedAutomation {
    pub assignment_id: Uuid,
    pub automation_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub automation_type: Option<String>,
    pub schedule: Option<String>,
    pub status: AssignmentStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantDashboard {
    pub tenant_id: String,
    pub tenant: Option<Tenant>,
    pub automations: Vec<AssignedAutomation>,
    pub recent_runs: Vec<Run>,
    pub reports: Vec<Report>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminOverview {
    pub client_count: usize,
    pub automation_count: usize,
    pub running_count: usize,
    pub recent_clients: Vec<Profile>,
    pub recent_automations: Vec<Automation>,
}

impl Portal {
    fn runs_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.recent_runs_limit)
            .clamp(1, MAX_RUNS_LIMIT)
    }

    async fn load_assigned(&self, tenant_id: &str) -> PortalResult<Vec<AssignedAutomation>> {
        let scope = AssignmentScope::Tenant(tenant_id.to_string());
        let (assignments, automations) = futures::try_join!(
            self.store.list_assignments(&scope),
            self.store.list_automations(),
        )?;
        let by_id: HashMap<Uuid, Automation> =
            automations.into_iter().map(|a| (a.id, a)).collect();

        let mut rows: Vec<AssignedAutomation> = assignments
            .into_iter()
            .filter_map(|assignment| {
                // An automation deleted between the two reads drops out.
                let automation = by_id.get(&assignment.automation_id)?;
                Some(AssignedAutomation {
                    assignment_id: assignment.id,
                    automation_id: automation.id,
                    name: automation.name.clone(),
                    description: automation.description.clone(),
                    automation_type: automation.automation_type.clone(),
                    schedule: automation.schedule.clone(),
                    status: assignment.status,
                    last_run_at: assignment.last_run_at,
                    next_run_at: assignment.next_run_at,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    /// Automations assigned to a tenant, joined with their definitions.
    pub async fn tenant_automations(
        &self,
        caller: &Caller,
        tenant_id: &str,
    ) -> PortalResult<Vec<AssignedAutomation>> {
        self.authorize_tenant(caller, tenant_id)?;
        self.load_assigned(tenant_id).await
    }

    /// Most recent runs for a tenant, newest first.
    pub async fn tenant_runs(
        &self,
        caller: &Caller,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> PortalResult<Vec<Run>> {
        self.authorize_tenant(caller, tenant_id)?;
        Ok(self
            .store
            .recent_runs(tenant_id, self.runs_limit(limit))
            .await?)
    }

    pub async fn tenant_reports(&self, caller: &Caller, tenant_id: &str) -> PortalResult<Vec<Report>> {
        self.authorize_tenant(caller, tenant_id)?;
        Ok(self.store.list_reports(tenant_id).await?)
    }

    /// Everything a tenant's dashboard shows. The reads are independent and
    /// may reflect slightly different moments.
    pub async fn tenant_dashboard(
        &self,
        caller: &Caller,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> PortalResult<TenantDashboard> {
        self.authorize_tenant(caller, tenant_id)?;
        let limit = self.runs_limit(limit);

        let (tenant, automations, recent_runs, reports) = futures::try_join!(
            async { self.store.get_tenant(tenant_id).await.map_err(PortalError::from) },
            self.load_assigned(tenant_id),
            async {
                self.store
                    .recent_runs(tenant_id, limit)
                    .await
                    .map_err(PortalError::from)
            },
            async { self.store.list_reports(tenant_id).await.map_err(PortalError::from) },
        )?;

        Ok(TenantDashboard {
            tenant_id: tenant_id.to_string(),
            tenant,
            automations,
            recent_runs,
            reports,
        })
    }

    pub async fn admin_overview(&self, caller: &Caller) -> PortalResult<AdminOverview> {
        self.require_admin(caller)?;

        let (client_count, automation_count, running_count, recent_clients, recent_automations) =
            futures::try_join!(
                self.store.count_profiles(Some(Role::Client)),
                self.store.count_automations(),
                self.store.count_runs(Some(RunStatus::Running)),
                self.store
                    .list_profiles(Some(Role::Client), Some(OVERVIEW_RECENT_LIMIT)),
                self.store.recent_automations(OVERVIEW_RECENT_LIMIT),
            )?;

        Ok(AdminOverview {
            client_count,
            automation_count,
            running_count,
            recent_clients,
            recent_automations,
        })
    }
}
