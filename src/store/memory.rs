//! In-memory portal store (non-persistent).

use super::{
    check_scope, AssignmentKey, AssignmentPlan, AssignmentScope, PortalStore, StoreError,
    StoreResult,
};
use crate::model::{
    Assignment, AssignmentUpdate, Automation, AutomationUpdate, Profile, ProfileUpdate, Report,
    Role, Run, RunStatus, Tenant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    tenants: HashMap<String, Tenant>,
    automations: HashMap<Uuid, Automation>,
    assignments: HashMap<Uuid, Assignment>,
    runs: HashMap<Uuid, Run>,
    reports: HashMap<Uuid, Report>,
}

/// All tables live behind one lock, so every call is atomic.
#[derive(Clone)]
pub struct InMemoryPortalStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryPortalStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryPortalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortalStore for InMemoryPortalStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&id).cloned())
    }

    async fn insert_profile_if_absent(&self, profile: &Profile) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .profiles
            .entry(profile.id)
            .or_insert_with(|| profile.clone());
        Ok(stored.clone())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
        update.apply(profile);
        Ok(profile.clone())
    }

    async fn set_profile_role(&self, id: Uuid, role: Role) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
        profile.role = role;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn set_profile_tenant(&self, id: Uuid, tenant_id: &str) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
        profile.tenant_id = Some(tenant_id.to_string());
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn list_profiles(
        &self,
        role: Option<Role>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Profile>> {
        let tables = self.tables.read().await;
        let mut profiles: Vec<Profile> = tables
            .profiles
            .values()
            .filter(|p| role.map_or(true, |r| p.role == r))
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            profiles.truncate(limit);
        }
        Ok(profiles)
    }

    async fn count_profiles(&self, role: Option<Role>) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .filter(|p| role.map_or(true, |r| p.role == r))
            .count())
    }

    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>> {
        Ok(self.tables.read().await.tenants.get(id).cloned())
    }

    async fn ensure_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .tenants
            .entry(tenant.id.clone())
            .or_insert_with(|| tenant.clone());
        Ok(stored.clone())
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tables.read().await.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(tenants)
    }

    async fn create_automation(&self, automation: &Automation) -> StoreResult<Automation> {
        let mut tables = self.tables.write().await;
        if tables.automations.contains_key(&automation.id) {
            return Err(StoreError::Conflict(format!(
                "Automation {} already exists",
                automation.id
            )));
        }
        tables
            .automations
            .insert(automation.id, automation.clone());
        Ok(automation.clone())
    }

    async fn get_automation(&self, id: Uuid) -> StoreResult<Option<Automation>> {
        Ok(self.tables.read().await.automations.get(&id).cloned())
    }

    async fn list_automations(&self) -> StoreResult<Vec<Automation>> {
        let mut automations: Vec<Automation> = self
            .tables
            .read()
            .await
            .automations
            .values()
            .cloned()
            .collect();
        automations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(automations)
    }

    async fn recent_automations(&self, limit: usize) -> StoreResult<Vec<Automation>> {
        let mut automations: Vec<Automation> = self
            .tables
            .read()
            .await
            .automations
            .values()
            .cloned()
            .collect();
        automations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        automations.truncate(limit);
        Ok(automations)
    }

    async fn update_automation(
        &self,
        id: Uuid,
        update: &AutomationUpdate,
    ) -> StoreResult<Automation> {
        let mut tables = self.tables.write().await;
        let automation = tables
            .automations
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Automation {}", id)))?;
        update.apply(automation);
        Ok(automation.clone())
    }

    async fn delete_automation(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.automations.remove(&id).is_none() {
            return Ok(false);
        }
        tables.assignments.retain(|_, a| a.automation_id != id);
        Ok(true)
    }

    async fn count_automations(&self) -> StoreResult<usize> {
        Ok(self.tables.read().await.automations.len())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.tables.read().await.assignments.get(&id).cloned())
    }

    async fn list_assignments(&self, scope: &AssignmentScope) -> StoreResult<Vec<Assignment>> {
        let tables = self.tables.read().await;
        let mut assignments: Vec<Assignment> = tables
            .assignments
            .values()
            .filter(|a| scope.contains(&AssignmentKey::from(*a)))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(assignments)
    }

    async fn replace_assignments(
        &self,
        scope: &AssignmentScope,
        desired: &[AssignmentKey],
    ) -> StoreResult<AssignmentPlan> {
        check_scope(scope, desired)?;

        let mut tables = self.tables.write().await;
        let existing: Vec<AssignmentKey> = tables
            .assignments
            .values()
            .map(AssignmentKey::from)
            .filter(|k| scope.contains(k))
            .collect();
        let plan = AssignmentPlan::compute(&existing, desired);

        if !plan.remove.is_empty() {
            let removed: HashSet<&AssignmentKey> = plan.remove.iter().collect();
            tables
                .assignments
                .retain(|_, a| !removed.contains(&AssignmentKey::from(&*a)));
        }
        for key in &plan.insert {
            let assignment = Assignment::new(&key.tenant_id, key.automation_id);
            tables.assignments.insert(assignment.id, assignment);
        }
        Ok(plan)
    }

    async fn update_assignment(
        &self,
        id: Uuid,
        update: &AssignmentUpdate,
    ) -> StoreResult<Assignment> {
        let mut tables = self.tables.write().await;
        let assignment = tables
            .assignments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", id)))?;
        update.apply(assignment);
        Ok(assignment.clone())
    }

    async fn insert_run(&self, run: &Run) -> StoreResult<Run> {
        let mut tables = self.tables.write().await;
        let assignment = tables
            .assignments
            .get_mut(&run.assignment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", run.assignment_id)))?;
        assignment.last_run_at = Some(run.started_at);
        tables.runs.insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        Ok(self.tables.read().await.runs.get(&id).cloned())
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        log: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<Run> {
        if !status.is_terminal() {
            return Err(StoreError::Invalid(format!(
                "{} is not a terminal run status",
                status
            )));
        }
        let mut tables = self.tables.write().await;
        let run = tables
            .runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", id)))?;
        if run.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "Run {} already finished ({})",
                id, run.status
            )));
        }
        run.status = status;
        run.ended_at = Some(ended_at);
        run.log = log.map(|s| s.to_string());
        Ok(run.clone())
    }

    async fn recent_runs(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<Run>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<Run> = tables
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn count_runs(&self, status: Option<RunStatus>) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .runs
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .count())
    }

    async fn insert_report(&self, report: &Report) -> StoreResult<Report> {
        self.tables
            .write()
            .await
            .reports
            .insert(report.id, report.clone());
        Ok(report.clone())
    }

    async fn list_reports(&self, tenant_id: &str) -> StoreResult<Vec<Report>> {
        let tables = self.tables.read().await;
        let mut reports: Vec<Report> = tables
            .reports
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }
}
