//! Portal data store with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: Embedded SQLite database
//! - `supabase`: Hosted PostgREST tables

#[cfg(test)]
mod contract_tests;
mod memory;
mod sqlite;
mod supabase;

pub use memory::InMemoryPortalStore;
pub use sqlite::SqlitePortalStore;
pub use supabase::SupabasePortalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::model::{
    Assignment, AssignmentUpdate, Automation, AutomationUpdate, Profile, ProfileUpdate, Report,
    Role, Run, RunStatus, Tenant,
};
use crate::supabase::SupabaseClient;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Identifies one assignment row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AssignmentKey {
    pub tenant_id: String,
    pub automation_id: Uuid,
}

impl AssignmentKey {
    pub fn new(tenant_id: impl Into<String>, automation_id: Uuid) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            automation_id,
        }
    }
}

impl From<&Assignment> for AssignmentKey {
    fn from(a: &Assignment) -> Self {
        Self::new(a.tenant_id.clone(), a.automation_id)
    }
}

/// The set of assignments a full-replace operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentScope {
    /// Every tenant assigned to one automation.
    Automation(Uuid),
    /// Every automation assigned to one tenant.
    Tenant(String),
}

impl AssignmentScope {
    pub fn contains(&self, key: &AssignmentKey) -> bool {
        match self {
            AssignmentScope::Automation(id) => key.automation_id == *id,
            AssignmentScope::Tenant(id) => key.tenant_id == *id,
        }
    }
}

/// Rows to add and rows to drop so that storage matches a desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentPlan {
    pub insert: Vec<AssignmentKey>,
    pub remove: Vec<AssignmentKey>,
}

impl AssignmentPlan {
    /// Symmetric difference of `existing` against `desired`. Duplicates collapse
    /// and the output is sorted.
    pub fn compute(existing: &[AssignmentKey], desired: &[AssignmentKey]) -> Self {
        let existing: BTreeSet<&AssignmentKey> = existing.iter().collect();
        let desired: BTreeSet<&AssignmentKey> = desired.iter().collect();
        Self {
            insert: desired
                .difference(&existing)
                .map(|k| (*k).clone())
                .collect(),
            remove: existing
                .difference(&desired)
                .map(|k| (*k).clone())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }
}

/// Check that every desired key falls inside the scope being replaced.
pub(crate) fn check_scope(scope: &AssignmentScope, desired: &[AssignmentKey]) -> StoreResult<()> {
    match desired.iter().find(|k| !scope.contains(k)) {
        Some(k) => Err(StoreError::Invalid(format!(
            "assignment ({}, {}) is outside {:?}",
            k.tenant_id, k.automation_id, scope
        ))),
        None => Ok(()),
    }
}

/// Portal store trait - implemented by all storage backends.
#[async_trait]
pub trait PortalStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    // === Profiles ===

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>>;

    /// Insert the profile unless a row with the same id exists. Returns the
    /// stored row either way.
    async fn insert_profile_if_absent(&self, profile: &Profile) -> StoreResult<Profile>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<Profile>;

    async fn set_profile_role(&self, id: Uuid, role: Role) -> StoreResult<Profile>;

    /// Move a profile into a tenant. The tenant row is not created here.
    async fn set_profile_tenant(&self, id: Uuid, tenant_id: &str) -> StoreResult<Profile>;

    /// Profiles newest first, optionally filtered by role.
    async fn list_profiles(&self, role: Option<Role>, limit: Option<usize>)
        -> StoreResult<Vec<Profile>>;

    async fn count_profiles(&self, role: Option<Role>) -> StoreResult<usize>;

    // === Tenants ===

    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>>;

    /// Insert the tenant unless it exists. Returns the stored row.
    async fn ensure_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant>;

    /// Tenants ordered by name.
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>>;

    // === Automations ===

    async fn create_automation(&self, automation: &Automation) -> StoreResult<Automation>;

    async fn get_automation(&self, id: Uuid) -> StoreResult<Option<Automation>>;

    /// Automations ordered by name.
    async fn list_automations(&self) -> StoreResult<Vec<Automation>>;

    /// Newest automations first.
    async fn recent_automations(&self, limit: usize) -> StoreResult<Vec<Automation>>;

    async fn update_automation(
        &self,
        id: Uuid,
        update: &AutomationUpdate,
    ) -> StoreResult<Automation>;

    /// Delete an automation and its assignments. Runs are history and stay.
    async fn delete_automation(&self, id: Uuid) -> StoreResult<bool>;

    async fn count_automations(&self) -> StoreResult<usize>;

    // === Assignments ===

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn list_assignments(&self, scope: &AssignmentScope) -> StoreResult<Vec<Assignment>>;

    /// Make the stored assignments inside `scope` equal `desired`, atomically
    /// where the backend allows it. Returns what changed.
    async fn replace_assignments(
        &self,
        scope: &AssignmentScope,
        desired: &[AssignmentKey],
    ) -> StoreResult<AssignmentPlan>;

    async fn update_assignment(
        &self,
        id: Uuid,
        update: &AssignmentUpdate,
    ) -> StoreResult<Assignment>;

    // === Runs ===

    /// Append a run and stamp the assignment's `last_run_at`.
    async fn insert_run(&self, run: &Run) -> StoreResult<Run>;

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>>;

    /// Move a running run to a terminal status. Fails with `Conflict` when the
    /// run already finished.
    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        log: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<Run>;

    /// Most recent runs for a tenant, newest first.
    async fn recent_runs(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<Run>>;

    async fn count_runs(&self, status: Option<RunStatus>) -> StoreResult<usize>;

    // === Reports ===

    async fn insert_report(&self, report: &Report) -> StoreResult<Report>;

    /// Reports for a tenant, newest first.
    async fn list_reports(&self, tenant_id: &str) -> StoreResult<Vec<Report>>;
}

pub type SharedStore = Arc<dyn PortalStore>;

/// Store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    #[default]
    Sqlite,
    Supabase,
}

impl StoreType {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "db" => Some(Self::Sqlite),
            "supabase" | "postgrest" => Some(Self::Supabase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Supabase => "supabase",
        }
    }
}

/// Create a store based on configuration.
pub async fn create_store(config: &Config) -> StoreResult<SharedStore> {
    match config.store {
        StoreType::Memory => Ok(Arc::new(InMemoryPortalStore::new())),
        StoreType::Sqlite => {
            let path: PathBuf = config.data_dir.join("portal.db");
            let store = SqlitePortalStore::open(path).await?;
            Ok(Arc::new(store))
        }
        StoreType::Supabase => {
            let client = SupabaseClient::new(&config.supabase)
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
            Ok(Arc::new(SupabasePortalStore::new(client)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tenant: &str, automation: Uuid) -> AssignmentKey {
        AssignmentKey::new(tenant, automation)
    }

    #[test]
    fn test_plan_inserts_missing_and_removes_extra() {
        let a = Uuid::new_v4();
        let existing = vec![key("acme", a), key("globex", a)];
        let desired = vec![key("globex", a), key("uber-eats", a)];

        let plan = AssignmentPlan::compute(&existing, &desired);

        assert_eq!(plan.insert, vec![key("uber-eats", a)]);
        assert_eq!(plan.remove, vec![key("acme", a)]);
    }

    #[test]
    fn test_plan_collapses_duplicates() {
        let a = Uuid::new_v4();
        let desired = vec![key("acme", a), key("acme", a)];

        let plan = AssignmentPlan::compute(&[], &desired);

        assert_eq!(plan.insert, vec![key("acme", a)]);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_plan_is_empty_when_sets_match() {
        let a = Uuid::new_v4();
        let rows = vec![key("acme", a)];
        assert!(AssignmentPlan::compute(&rows, &rows).is_empty());
    }

    #[test]
    fn test_empty_desired_removes_everything() {
        let a = Uuid::new_v4();
        let existing = vec![key("acme", a), key("globex", a)];

        let plan = AssignmentPlan::compute(&existing, &[]);

        assert!(plan.insert.is_empty());
        assert_eq!(plan.remove.len(), 2);
    }

    #[test]
    fn test_check_scope_rejects_foreign_keys() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let scope = AssignmentScope::Automation(a);
        assert!(check_scope(&scope, &[key("acme", a)]).is_ok());
        assert!(matches!(
            check_scope(&scope, &[key("acme", b)]),
            Err(StoreError::Invalid(_))
        ));

        let scope = AssignmentScope::Tenant("acme".to_string());
        assert!(check_scope(&scope, &[key("acme", b)]).is_ok());
        assert!(check_scope(&scope, &[key("globex", b)]).is_err());
    }

    #[test]
    fn test_store_type_parse() {
        assert_eq!(StoreType::parse("memory"), Some(StoreType::Memory));
        assert_eq!(StoreType::parse("SQLite"), Some(StoreType::Sqlite));
        assert_eq!(StoreType::parse("supabase"), Some(StoreType::Supabase));
        assert_eq!(StoreType::parse("file"), None);
    }
}
