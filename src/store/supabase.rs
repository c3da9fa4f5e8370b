//! Portal store on hosted PostgREST tables.
//!
//! All calls use the service-role key; tenant scoping is enforced by the
//! portal gate before a call reaches the store.

use super::{
    check_scope, AssignmentKey, AssignmentPlan, AssignmentScope, PortalStore, StoreError,
    StoreResult,
};
use crate::model::{
    Assignment, AssignmentUpdate, Automation, AutomationUpdate, Profile, ProfileUpdate, Report,
    Role, Run, RunStatus, Tenant,
};
use crate::supabase::{eq, in_list, SupabaseClient, SupabaseError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const PROFILES: &str = "profiles";
const TEAMS: &str = "teams";
const AUTOMATIONS: &str = "automations";
const ASSIGNMENTS: &str = "client_automations";
const RUNS: &str = "automation_runs";
const REPORTS: &str = "reports";

impl From<SupabaseError> for StoreError {
    fn from(e: SupabaseError) -> Self {
        match e.status() {
            Some(StatusCode::CONFLICT) => StoreError::Conflict(e.to_string()),
            Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
                StoreError::Invalid(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

pub struct SupabasePortalStore {
    client: SupabaseClient,
}

impl SupabasePortalStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn first<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        filter: &str,
    ) -> StoreResult<Option<T>> {
        let rows: Vec<T> = self
            .client
            .select(table, &format!("select=*&{}&limit=1", filter))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Delete rows by id. Used to undo a partial reconciliation.
    async fn delete_ids(&self, table: &str, ids: &[Uuid]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let filter = format!("id={}", in_list(ids.iter().map(|id| id.to_string())));
        Ok(self.client.delete(table, &filter).await?)
    }
}

/// Column filter selecting the rows inside a scope.
fn scope_filter(scope: &AssignmentScope) -> String {
    match scope {
        AssignmentScope::Automation(id) => format!("automation_id={}", eq(&id.to_string())),
        AssignmentScope::Tenant(id) => format!("tenant_id={}", eq(id)),
    }
}

/// Filter for the rows of `keys` inside `scope`: the scope column is fixed,
/// the other column varies.
fn keys_filter(scope: &AssignmentScope, keys: &[AssignmentKey]) -> String {
    match scope {
        AssignmentScope::Automation(_) => format!(
            "{}&tenant_id={}",
            scope_filter(scope),
            in_list(keys.iter().map(|k| k.tenant_id.as_str()))
        ),
        AssignmentScope::Tenant(_) => format!(
            "{}&automation_id={}",
            scope_filter(scope),
            in_list(keys.iter().map(|k| k.automation_id.to_string()))
        ),
    }
}

fn role_filter(role: Option<Role>) -> String {
    role.map(|r| format!("role={}", eq(r.as_str())))
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct KeyRow {
    tenant_id: String,
    automation_id: Uuid,
}

#[async_trait]
impl PortalStore for SupabasePortalStore {
    fn backend_name(&self) -> &'static str {
        "supabase"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        self.first(PROFILES, &format!("id={}", eq(&id.to_string())))
            .await
    }

    async fn insert_profile_if_absent(&self, profile: &Profile) -> StoreResult<Profile> {
        let _: Vec<Profile> = self
            .client
            .insert(
                PROFILES,
                "on_conflict=id",
                &[profile],
                Some("resolution=ignore-duplicates"),
            )
            .await?;
        // Re-read: an ignored duplicate returns no rows.
        self.get_profile(profile.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", profile.id)))
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<Profile> {
        let mut body = serde_json::to_value(update)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        body["updated_at"] = json!(Utc::now());
        let rows: Vec<Profile> = self
            .client
            .update(PROFILES, &format!("id={}", eq(&id.to_string())), &body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))
    }

    async fn set_profile_role(&self, id: Uuid, role: Role) -> StoreResult<Profile> {
        let body = json!({ "role": role, "updated_at": Utc::now() });
        let rows: Vec<Profile> = self
            .client
            .update(PROFILES, &format!("id={}", eq(&id.to_string())), &body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))
    }

    async fn set_profile_tenant(&self, id: Uuid, tenant_id: &str) -> StoreResult<Profile> {
        let body = json!({ "tenant_id": tenant_id, "updated_at": Utc::now() });
        let rows: Vec<Profile> = self
            .client
            .update(PROFILES, &format!("id={}", eq(&id.to_string())), &body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))
    }

    async fn list_profiles(
        &self,
        role: Option<Role>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Profile>> {
        let mut query = "select=*&order=created_at.desc".to_string();
        if role.is_some() {
            query.push('&');
            query.push_str(&role_filter(role));
        }
        if let Some(limit) = limit {
            query.push_str(&format!("&limit={}", limit));
        }
        Ok(self.client.select(PROFILES, &query).await?)
    }

    async fn count_profiles(&self, role: Option<Role>) -> StoreResult<usize> {
        Ok(self.client.count(PROFILES, &role_filter(role)).await?)
    }

    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>> {
        self.first(TEAMS, &format!("id={}", eq(id))).await
    }

    async fn ensure_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant> {
        let _: Vec<Tenant> = self
            .client
            .insert(
                TEAMS,
                "on_conflict=id",
                &[tenant],
                Some("resolution=ignore-duplicates"),
            )
            .await?;
        self.get_tenant(&tenant.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Tenant {}", tenant.id)))
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        Ok(self
            .client
            .select(TEAMS, "select=*&order=name.asc,id.asc")
            .await?)
    }

    async fn create_automation(&self, automation: &Automation) -> StoreResult<Automation> {
        let rows: Vec<Automation> = self
            .client
            .insert(AUTOMATIONS, "", &[automation], None)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("No automation returned".to_string()))
    }

    async fn get_automation(&self, id: Uuid) -> StoreResult<Option<Automation>> {
        self.first(AUTOMATIONS, &format!("id={}", eq(&id.to_string())))
            .await
    }

    async fn list_automations(&self) -> StoreResult<Vec<Automation>> {
        Ok(self
            .client
            .select(AUTOMATIONS, "select=*&order=name.asc")
            .await?)
    }

    async fn recent_automations(&self, limit: usize) -> StoreResult<Vec<Automation>> {
        Ok(self
            .client
            .select(
                AUTOMATIONS,
                &format!("select=*&order=created_at.desc&limit={}", limit),
            )
            .await?)
    }

    async fn update_automation(
        &self,
        id: Uuid,
        update: &AutomationUpdate,
    ) -> StoreResult<Automation> {
        let mut update = update.clone();
        if let Some(name) = update.name.as_mut() {
            *name = name.trim().to_string();
        }
        let mut body =
            serde_json::to_value(&update).map_err(|e| StoreError::Invalid(e.to_string()))?;
        body["updated_at"] = json!(Utc::now());
        let rows: Vec<Automation> = self
            .client
            .update(AUTOMATIONS, &format!("id={}", eq(&id.to_string())), &body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("Automation {}", id)))
    }

    async fn delete_automation(&self, id: Uuid) -> StoreResult<bool> {
        let filter = eq(&id.to_string());
        self.client
            .delete(ASSIGNMENTS, &format!("automation_id={}", filter))
            .await?;
        let deleted = self
            .client
            .delete(AUTOMATIONS, &format!("id={}", filter))
            .await?;
        Ok(deleted > 0)
    }

    async fn count_automations(&self) -> StoreResult<usize> {
        Ok(self.client.count(AUTOMATIONS, "").await?)
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        self.first(ASSIGNMENTS, &format!("id={}", eq(&id.to_string())))
            .await
    }

    async fn list_assignments(&self, scope: &AssignmentScope) -> StoreResult<Vec<Assignment>> {
        Ok(self
            .client
            .select(
                ASSIGNMENTS,
                &format!("select=*&{}&order=created_at.asc", scope_filter(scope)),
            )
            .await?)
    }

    async fn replace_assignments(
        &self,
        scope: &AssignmentScope,
        desired: &[AssignmentKey],
    ) -> StoreResult<AssignmentPlan> {
        check_scope(scope, desired)?;

        let existing: Vec<KeyRow> = self
            .client
            .select(
                ASSIGNMENTS,
                &format!("select=tenant_id,automation_id&{}", scope_filter(scope)),
            )
            .await?;
        let existing: Vec<AssignmentKey> = existing
            .into_iter()
            .map(|r| AssignmentKey::new(r.tenant_id, r.automation_id))
            .collect();
        let plan = AssignmentPlan::compute(&existing, desired);

        // Upsert first; rows a concurrent caller already wrote are skipped
        // and not returned, so `inserted` holds only this call's rows.
        let mut inserted: Vec<Uuid> = Vec::new();
        if !plan.insert.is_empty() {
            let rows: Vec<Assignment> = plan
                .insert
                .iter()
                .map(|k| Assignment::new(&k.tenant_id, k.automation_id))
                .collect();
            let written: Vec<Assignment> = self
                .client
                .insert(
                    ASSIGNMENTS,
                    "on_conflict=tenant_id,automation_id",
                    &rows,
                    Some("resolution=ignore-duplicates"),
                )
                .await?;
            inserted = written.into_iter().map(|a| a.id).collect();
        }

        if !plan.remove.is_empty() {
            if let Err(e) = self
                .client
                .delete(ASSIGNMENTS, &keys_filter(scope, &plan.remove))
                .await
            {
                tracing::warn!(
                    "Pruning assignments failed, undoing {} inserted rows: {}",
                    inserted.len(),
                    e
                );
                if let Err(undo) = self.delete_ids(ASSIGNMENTS, &inserted).await {
                    tracing::error!("Failed to undo inserted assignments: {}", undo);
                }
                return Err(e.into());
            }
        }

        Ok(plan)
    }

    async fn update_assignment(
        &self,
        id: Uuid,
        update: &AssignmentUpdate,
    ) -> StoreResult<Assignment> {
        let rows: Vec<Assignment> = self
            .client
            .update(ASSIGNMENTS, &format!("id={}", eq(&id.to_string())), update)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", id)))
    }

    async fn insert_run(&self, run: &Run) -> StoreResult<Run> {
        // Stamping first doubles as the existence check for the assignment.
        let stamped: Vec<Assignment> = self
            .client
            .update(
                ASSIGNMENTS,
                &format!("id={}", eq(&run.assignment_id.to_string())),
                &json!({ "last_run_at": run.started_at }),
            )
            .await?;
        if stamped.is_empty() {
            return Err(StoreError::NotFound(format!(
                "Assignment {}",
                run.assignment_id
            )));
        }

        let rows: Vec<Run> = self.client.insert(RUNS, "", &[run], None).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("No run returned".to_string()))
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        self.first(RUNS, &format!("id={}", eq(&id.to_string())))
            .await
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
        let body = json!({ "status": status, "ended_at": ended_at, "log": log });
        let rows: Vec<Run> = self
            .client
            .update(
                RUNS,
                &format!("id={}&status=eq.running", eq(&id.to_string())),
                &body,
            )
            .await?;
        if let Some(run) = rows.into_iter().next() {
            return Ok(run);
        }
        match self.get_run(id).await? {
            Some(run) => Err(StoreError::Conflict(format!(
                "Run {} already finished ({})",
                id, run.status
            ))),
            None => Err(StoreError::NotFound(format!("Run {}", id))),
        }
    }

    async fn recent_runs(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<Run>> {
        Ok(self
            .client
            .select(
                RUNS,
                &format!(
                    "select=*&tenant_id={}&order=started_at.desc&limit={}",
                    eq(tenant_id),
                    limit
                ),
            )
            .await?)
    }

    async fn count_runs(&self, status: Option<RunStatus>) -> StoreResult<usize> {
        let filter = status
            .map(|s| format!("status={}", eq(s.as_str())))
            .unwrap_or_default();
        Ok(self.client.count(RUNS, &filter).await?)
    }

    async fn insert_report(&self, report: &Report) -> StoreResult<Report> {
        let rows: Vec<Report> = self.client.insert(REPORTS, "", &[report], None).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("No report returned".to_string()))
    }

    async fn list_reports(&self, tenant_id: &str) -> StoreResult<Vec<Report>> {
        Ok(self
            .client
            .select(
                REPORTS,
                &format!(
                    "select=*&tenant_id={}&order=created_at.desc",
                    eq(tenant_id)
                ),
            )
            .await?)
    }
}
