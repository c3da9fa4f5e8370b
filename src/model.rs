//! Portal records as they are stored in the data store.
//!
//! Column names follow the hosted tables (`profiles`, `teams`, `automations`,
//! `client_automations`, `automation_runs`, `reports`) so rows written by any
//! backend stay compatible with existing data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Company name given to profiles created without one.
pub const DEFAULT_COMPANY_NAME: &str = "Default Company";

/// Caller role, gating visible data and routes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    #[serde(alias = "user")]
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }

    /// Parse a stored role. Older rows used `user` for tenant users.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "client" | "user" => Some(Role::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// Matches the session subject
    pub id: Uuid,
    pub company_name: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Tenant this profile belongs to; `None` means the tenant keyed by the profile id
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Default client profile for an identity seen for the first time.
    pub fn default_client(id: Uuid, email: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id,
            company_name: Some(DEFAULT_COMPANY_NAME.to_string()),
            contact_name: None,
            contact_email: email.map(|s| s.to_string()),
            phone: None,
            avatar_url: None,
            role: Role::Client,
            tenant_id: Some(id.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// The tenant all of this profile's client queries are scoped to.
    pub fn own_tenant_id(&self) -> String {
        self.tenant_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Contact fields a user may change on their own profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.company_name.is_none()
            && self.contact_name.is_none()
            && self.contact_email.is_none()
            && self.phone.is_none()
            && self.avatar_url.is_none()
    }

    pub fn apply(&self, profile: &mut Profile) {
        if let Some(v) = &self.company_name {
            profile.company_name = Some(v.clone());
        }
        if let Some(v) = &self.contact_name {
            profile.contact_name = Some(v.clone());
        }
        if let Some(v) = &self.contact_email {
            profile.contact_email = Some(v.clone());
        }
        if let Some(v) = &self.phone {
            profile.phone = Some(v.clone());
        }
        if let Some(v) = &self.avatar_url {
            profile.avatar_url = Some(v.clone());
        }
        profile.updated_at = Utc::now();
    }
}

/// An operator-managed customer account (`teams` table).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An operator-defined job template. Never executed by this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Automation {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub automation_type: Option<String>,
    pub schedule: Option<String>,
    pub script_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAutomation {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub automation_type: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub script_content: Option<String>,
}

impl NewAutomation {
    pub fn into_automation(self) -> Automation {
        let now = Utc::now();
        Automation {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            automation_type: self.automation_type,
            schedule: self.schedule,
            script_content: self.script_content,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of an automation definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_content: Option<String>,
}

impl AutomationUpdate {
    pub fn apply(&self, automation: &mut Automation) {
        if let Some(v) = &self.name {
            automation.name = v.trim().to_string();
        }
        if let Some(v) = &self.description {
            automation.description = Some(v.clone());
        }
        if let Some(v) = &self.automation_type {
            automation.automation_type = Some(v.clone());
        }
        if let Some(v) = &self.schedule {
            automation.schedule = Some(v.clone());
        }
        if let Some(v) = &self.script_content {
            automation.script_content = Some(v.clone());
        }
        automation.updated_at = Utc::now();
    }
}

/// Run status of an assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Active,
    Paused,
    Error,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Paused => "paused",
            AssignmentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link between one tenant and one automation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: Uuid,
    pub tenant_id: String,
    pub automation_id: Uuid,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(tenant_id: &str, automation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            automation_id,
            status: AssignmentStatus::Active,
            last_run_at: None,
            next_run_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AssignmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl AssignmentUpdate {
    pub fn apply(&self, assignment: &mut Assignment) {
        if let Some(status) = self.status {
            assignment.status = status;
        }
        if let Some(next) = self.next_run_at {
            assignment.next_run_at = Some(next);
        }
    }
}

/// Status of a historical run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution record for one assignment. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub tenant_id: String,
    pub automation_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub log: Option<String>,
}

impl Run {
    pub fn start(assignment: &Assignment) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id: assignment.id,
            tenant_id: assignment.tenant_id.clone(),
            automation_id: assignment.automation_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            log: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub tenant_id: String,
    pub automation_id: Option<Uuid>,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_legacy_user() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("client"), Some(Role::Client));
        assert_eq!(Role::parse("user"), Some(Role::Client));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn test_default_client_profile_owns_its_tenant() {
        let id = Uuid::new_v4();
        let profile = Profile::default_client(id, Some("a@x.com"));
        assert_eq!(profile.role, Role::Client);
        assert_eq!(profile.own_tenant_id(), id.to_string());
        assert_eq!(profile.company_name.as_deref(), Some(DEFAULT_COMPANY_NAME));
        assert_eq!(profile.contact_email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn test_own_tenant_falls_back_to_profile_id() {
        let id = Uuid::new_v4();
        let mut profile = Profile::default_client(id, None);
        profile.tenant_id = None;
        assert_eq!(profile.own_tenant_id(), id.to_string());
        profile.tenant_id = Some("uber-eats".to_string());
        assert_eq!(profile.own_tenant_id(), "uber-eats");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&AssignmentStatus::Paused).unwrap(),
            "\"paused\""
        );
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"failed\"");
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
