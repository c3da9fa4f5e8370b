//! SQLite-based portal store.

use super::{
    check_scope, AssignmentKey, AssignmentPlan, AssignmentScope, PortalStore, StoreError,
    StoreResult,
};
use crate::model::{
    Assignment, AssignmentStatus, AssignmentUpdate, Automation, AutomationUpdate, Profile,
    ProfileUpdate, Report, Role, Run, RunStatus, Tenant,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY NOT NULL,
    company_name TEXT,
    contact_name TEXT,
    contact_email TEXT,
    phone TEXT,
    avatar_url TEXT,
    role TEXT NOT NULL DEFAULT 'client',
    tenant_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_role_created ON profiles(role, created_at DESC);

CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    created_by TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS automations (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    automation_type TEXT,
    schedule TEXT,
    script_content TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_automations_created ON automations(created_at DESC);

CREATE TABLE IF NOT EXISTS client_automations (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    automation_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    last_run_at TEXT,
    next_run_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (tenant_id, automation_id),
    FOREIGN KEY (tenant_id) REFERENCES teams(id),
    FOREIGN KEY (automation_id) REFERENCES automations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_assignments_automation ON client_automations(automation_id);

CREATE TABLE IF NOT EXISTS automation_runs (
    id TEXT PRIMARY KEY NOT NULL,
    assignment_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    automation_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    log TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_tenant_started ON automation_runs(tenant_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_runs_status ON automation_runs(status);

CREATE TABLE IF NOT EXISTS reports (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    automation_id TEXT,
    title TEXT NOT NULL,
    content TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_tenant_created ON reports(tenant_id, created_at DESC);
"#;

const PROFILE_COLUMNS: &str = "id, company_name, contact_name, contact_email, phone, avatar_url, \
                               role, tenant_id, created_at, updated_at";
const AUTOMATION_COLUMNS: &str =
    "id, name, description, automation_type, schedule, script_content, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, tenant_id, automation_id, status, last_run_at, next_run_at, created_at";
const RUN_COLUMNS: &str =
    "id, assignment_id, tenant_id, automation_id, status, started_at, ended_at, log";

pub struct SqlitePortalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePortalStore {
    pub async fn open(db_path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to create store dir: {}", e)))?;
        }

        // Open database in blocking task
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(|e| {
                StoreError::Backend(format!("Failed to open SQLite database: {}", e))
            })?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::Backend(format!("Failed to run schema: {}", e)))?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))??;

        tracing::debug!("SQLite portal store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))?
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order matches time order.
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(t: &Option<DateTime<Utc>>) -> Option<String> {
    t.as_ref().map(ts)
}

#[derive(Debug, thiserror::Error)]
#[error("unexpected {0} value: {1}")]
struct UnknownValue(&'static str, String);

fn conv_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn get_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conv_err(idx, e))
}

fn get_opt_uuid(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conv_err(idx, e)))
        .transpose()
}

fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, e))
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conv_err(idx, e))
    })
    .transpose()
}

fn profile_from_row(row: &Row) -> rusqlite::Result<Profile> {
    let role: String = row.get(6)?;
    Ok(Profile {
        id: get_uuid(row, 0)?,
        company_name: row.get(1)?,
        contact_name: row.get(2)?,
        contact_email: row.get(3)?,
        phone: row.get(4)?,
        avatar_url: row.get(5)?,
        role: Role::parse(&role).ok_or_else(|| conv_err(6, UnknownValue("role", role.clone())))?,
        tenant_id: row.get(7)?,
        created_at: get_ts(row, 8)?,
        updated_at: get_ts(row, 9)?,
    })
}

fn tenant_from_row(row: &Row) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: get_opt_uuid(row, 2)?,
        created_at: get_ts(row, 3)?,
    })
}

fn automation_from_row(row: &Row) -> rusqlite::Result<Automation> {
    Ok(Automation {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        automation_type: row.get(3)?,
        schedule: row.get(4)?,
        script_content: row.get(5)?,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

fn assignment_from_row(row: &Row) -> rusqlite::Result<Assignment> {
    let status: String = row.get(3)?;
    Ok(Assignment {
        id: get_uuid(row, 0)?,
        tenant_id: row.get(1)?,
        automation_id: get_uuid(row, 2)?,
        status: AssignmentStatus::parse(&status)
            .ok_or_else(|| conv_err(3, UnknownValue("assignment status", status.clone())))?,
        last_run_at: get_opt_ts(row, 4)?,
        next_run_at: get_opt_ts(row, 5)?,
        created_at: get_ts(row, 6)?,
    })
}

fn run_from_row(row: &Row) -> rusqlite::Result<Run> {
    let status: String = row.get(4)?;
    Ok(Run {
        id: get_uuid(row, 0)?,
        assignment_id: get_uuid(row, 1)?,
        tenant_id: row.get(2)?,
        automation_id: get_uuid(row, 3)?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| conv_err(4, UnknownValue("run status", status.clone())))?,
        started_at: get_ts(row, 5)?,
        ended_at: get_opt_ts(row, 6)?,
        log: row.get(7)?,
    })
}

fn report_from_row(row: &Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: get_uuid(row, 0)?,
        tenant_id: row.get(1)?,
        automation_id: get_opt_uuid(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn load_profile(conn: &Connection, id: Uuid) -> StoreResult<Option<Profile>> {
    conn.query_row(
        &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
        params![id.to_string()],
        profile_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn load_automation(conn: &Connection, id: Uuid) -> StoreResult<Option<Automation>> {
    conn.query_row(
        &format!("SELECT {} FROM automations WHERE id = ?1", AUTOMATION_COLUMNS),
        params![id.to_string()],
        automation_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn load_assignment(conn: &Connection, id: Uuid) -> StoreResult<Option<Assignment>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM client_automations WHERE id = ?1",
            ASSIGNMENT_COLUMNS
        ),
        params![id.to_string()],
        assignment_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn load_run(conn: &Connection, id: Uuid) -> StoreResult<Option<Run>> {
    conn.query_row(
        &format!("SELECT {} FROM automation_runs WHERE id = ?1", RUN_COLUMNS),
        params![id.to_string()],
        run_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn write_profile(conn: &Connection, p: &Profile) -> StoreResult<()> {
    conn.execute(
        "UPDATE profiles SET company_name = ?2, contact_name = ?3, contact_email = ?4, phone = ?5,
                avatar_url = ?6, role = ?7, tenant_id = ?8, updated_at = ?9
         WHERE id = ?1",
        params![
            p.id.to_string(),
            p.company_name,
            p.contact_name,
            p.contact_email,
            p.phone,
            p.avatar_url,
            p.role.as_str(),
            p.tenant_id,
            ts(&p.updated_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn scope_filter(scope: &AssignmentScope) -> (&'static str, String) {
    match scope {
        AssignmentScope::Automation(id) => ("automation_id", id.to_string()),
        AssignmentScope::Tenant(id) => ("tenant_id", id.clone()),
    }
}

fn count(conn: &Connection, sql: &str, param: Option<&str>) -> StoreResult<usize> {
    let n: i64 = match param {
        Some(p) => conn.query_row(sql, params![p], |row| row.get(0)),
        None => conn.query_row(sql, [], |row| row.get(0)),
    }
    .map_err(db_err)?;
    Ok(n.max(0) as usize)
}

#[async_trait]
impl PortalStore for SqlitePortalStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        self.with_conn(move |conn| load_profile(conn, id)).await
    }

    async fn insert_profile_if_absent(&self, profile: &Profile) -> StoreResult<Profile> {
        let p = profile.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO profiles (id, company_name, contact_name, contact_email, phone,
                        avatar_url, role, tenant_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    p.id.to_string(),
                    p.company_name,
                    p.contact_name,
                    p.contact_email,
                    p.phone,
                    p.avatar_url,
                    p.role.as_str(),
                    p.tenant_id,
                    ts(&p.created_at),
                    ts(&p.updated_at),
                ],
            )
            .map_err(db_err)?;
            load_profile(conn, p.id)?
                .ok_or_else(|| StoreError::NotFound(format!("Profile {}", p.id)))
        })
        .await
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<Profile> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let mut profile = load_profile(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
            update.apply(&mut profile);
            write_profile(conn, &profile)?;
            Ok(profile)
        })
        .await
    }

    async fn set_profile_role(&self, id: Uuid, role: Role) -> StoreResult<Profile> {
        self.with_conn(move |conn| {
            let mut profile = load_profile(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
            profile.role = role;
            profile.updated_at = Utc::now();
            write_profile(conn, &profile)?;
            Ok(profile)
        })
        .await
    }

    async fn set_profile_tenant(&self, id: Uuid, tenant_id: &str) -> StoreResult<Profile> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let mut profile = load_profile(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Profile {}", id)))?;
            profile.tenant_id = Some(tenant_id);
            profile.updated_at = Utc::now();
            write_profile(conn, &profile)?;
            Ok(profile)
        })
        .await
    }

    async fn list_profiles(
        &self,
        role: Option<Role>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Profile>> {
        self.with_conn(move |conn| {
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM profiles
                     WHERE (?1 IS NULL OR role = ?1)
                     ORDER BY created_at DESC LIMIT ?2",
                    PROFILE_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![role.map(|r| r.as_str()), limit], profile_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn count_profiles(&self, role: Option<Role>) -> StoreResult<usize> {
        self.with_conn(move |conn| match role {
            Some(role) => count(
                conn,
                "SELECT COUNT(*) FROM profiles WHERE role = ?1",
                Some(role.as_str()),
            ),
            None => count(conn, "SELECT COUNT(*) FROM profiles", None),
        })
        .await
    }

    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM teams WHERE id = ?1",
                params![id],
                tenant_from_row,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn ensure_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant> {
        let t = tenant.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO teams (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    t.id,
                    t.name,
                    t.created_by.map(|u| u.to_string()),
                    ts(&t.created_at)
                ],
            )
            .map_err(db_err)?;
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM teams WHERE id = ?1",
                params![t.id],
                tenant_from_row,
            )
            .map_err(db_err)
        })
        .await
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, created_by, created_at FROM teams ORDER BY name, id")
                .map_err(db_err)?;
            let rows = stmt.query_map([], tenant_from_row).map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn create_automation(&self, automation: &Automation) -> StoreResult<Automation> {
        let a = automation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO automations (id, name, description, automation_type, schedule,
                        script_content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    a.id.to_string(),
                    a.name,
                    a.description,
                    a.automation_type,
                    a.schedule,
                    a.script_content,
                    ts(&a.created_at),
                    ts(&a.updated_at),
                ],
            )
            .map_err(db_err)?;
            Ok(a)
        })
        .await
    }

    async fn get_automation(&self, id: Uuid) -> StoreResult<Option<Automation>> {
        self.with_conn(move |conn| load_automation(conn, id)).await
    }

    async fn list_automations(&self) -> StoreResult<Vec<Automation>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM automations ORDER BY name",
                    AUTOMATION_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt.query_map([], automation_from_row).map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn recent_automations(&self, limit: usize) -> StoreResult<Vec<Automation>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM automations ORDER BY created_at DESC LIMIT ?1",
                    AUTOMATION_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], automation_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn update_automation(
        &self,
        id: Uuid,
        update: &AutomationUpdate,
    ) -> StoreResult<Automation> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let mut a = load_automation(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Automation {}", id)))?;
            update.apply(&mut a);
            conn.execute(
                "UPDATE automations SET name = ?2, description = ?3, automation_type = ?4,
                        schedule = ?5, script_content = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    a.id.to_string(),
                    a.name,
                    a.description,
                    a.automation_type,
                    a.schedule,
                    a.script_content,
                    ts(&a.updated_at),
                ],
            )
            .map_err(db_err)?;
            Ok(a)
        })
        .await
    }

    async fn delete_automation(&self, id: Uuid) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "DELETE FROM client_automations WHERE automation_id = ?1",
                params![id.to_string()],
            )
            .map_err(db_err)?;
            let deleted = tx
                .execute("DELETE FROM automations WHERE id = ?1", params![id.to_string()])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn count_automations(&self) -> StoreResult<usize> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM automations", None))
            .await
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        self.with_conn(move |conn| load_assignment(conn, id)).await
    }

    async fn list_assignments(&self, scope: &AssignmentScope) -> StoreResult<Vec<Assignment>> {
        let (column, value) = scope_filter(scope);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM client_automations WHERE {} = ?1 ORDER BY created_at",
                    ASSIGNMENT_COLUMNS, column
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![value], assignment_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn replace_assignments(
        &self,
        scope: &AssignmentScope,
        desired: &[AssignmentKey],
    ) -> StoreResult<AssignmentPlan> {
        check_scope(scope, desired)?;
        let (column, value) = scope_filter(scope);
        let desired = desired.to_vec();

        self.with_conn(move |conn| {
            // Read, insert and delete commit together or not at all.
            let tx = conn.transaction().map_err(db_err)?;
            let existing = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT tenant_id, automation_id FROM client_automations WHERE {} = ?1",
                        column
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![value], |row| {
                        Ok(AssignmentKey::new(row.get::<_, String>(0)?, get_uuid(row, 1)?))
                    })
                    .map_err(db_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?
            };

            let plan = AssignmentPlan::compute(&existing, &desired);
            let now = ts(&Utc::now());

            for key in &plan.insert {
                tx.execute(
                    "INSERT INTO client_automations (id, tenant_id, automation_id, status, created_at)
                     VALUES (?1, ?2, ?3, 'active', ?4)
                     ON CONFLICT(tenant_id, automation_id) DO NOTHING",
                    params![
                        Uuid::new_v4().to_string(),
                        key.tenant_id,
                        key.automation_id.to_string(),
                        now
                    ],
                )
                .map_err(db_err)?;
            }
            for key in &plan.remove {
                tx.execute(
                    "DELETE FROM client_automations WHERE tenant_id = ?1 AND automation_id = ?2",
                    params![key.tenant_id, key.automation_id.to_string()],
                )
                .map_err(db_err)?;
            }

            tx.commit().map_err(db_err)?;
            Ok(plan)
        })
        .await
    }

    async fn update_assignment(
        &self,
        id: Uuid,
        update: &AssignmentUpdate,
    ) -> StoreResult<Assignment> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let mut a = load_assignment(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", id)))?;
            update.apply(&mut a);
            conn.execute(
                "UPDATE client_automations SET status = ?2, next_run_at = ?3 WHERE id = ?1",
                params![a.id.to_string(), a.status.as_str(), opt_ts(&a.next_run_at)],
            )
            .map_err(db_err)?;
            Ok(a)
        })
        .await
    }

    async fn insert_run(&self, run: &Run) -> StoreResult<Run> {
        let run = run.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let touched = tx
                .execute(
                    "UPDATE client_automations SET last_run_at = ?2 WHERE id = ?1",
                    params![run.assignment_id.to_string(), ts(&run.started_at)],
                )
                .map_err(db_err)?;
            if touched == 0 {
                return Err(StoreError::NotFound(format!(
                    "Assignment {}",
                    run.assignment_id
                )));
            }
            tx.execute(
                "INSERT INTO automation_runs (id, assignment_id, tenant_id, automation_id, status,
                        started_at, ended_at, log)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.id.to_string(),
                    run.assignment_id.to_string(),
                    run.tenant_id,
                    run.automation_id.to_string(),
                    run.status.as_str(),
                    ts(&run.started_at),
                    opt_ts(&run.ended_at),
                    run.log,
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(run)
        })
        .await
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        self.with_conn(move |conn| load_run(conn, id)).await
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
        let log = log.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE automation_runs SET status = ?2, ended_at = ?3, log = ?4
                     WHERE id = ?1 AND status = 'running'",
                    params![id.to_string(), status.as_str(), ts(&ended_at), log],
                )
                .map_err(db_err)?;
            let run =
                load_run(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("Run {}", id)))?;
            if changed == 0 {
                return Err(StoreError::Conflict(format!(
                    "Run {} already finished ({})",
                    id, run.status
                )));
            }
            Ok(run)
        })
        .await
    }

    async fn recent_runs(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<Run>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM automation_runs WHERE tenant_id = ?1
                     ORDER BY started_at DESC LIMIT ?2",
                    RUN_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![tenant_id, limit as i64], run_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn count_runs(&self, status: Option<RunStatus>) -> StoreResult<usize> {
        self.with_conn(move |conn| match status {
            Some(status) => count(
                conn,
                "SELECT COUNT(*) FROM automation_runs WHERE status = ?1",
                Some(status.as_str()),
            ),
            None => count(conn, "SELECT COUNT(*) FROM automation_runs", None),
        })
        .await
    }

    async fn insert_report(&self, report: &Report) -> StoreResult<Report> {
        let r = report.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO reports (id, tenant_id, automation_id, title, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.id.to_string(),
                    r.tenant_id,
                    r.automation_id.map(|u| u.to_string()),
                    r.title,
                    r.content,
                    ts(&r.created_at),
                ],
            )
            .map_err(db_err)?;
            Ok(r)
        })
        .await
    }

    async fn list_reports(&self, tenant_id: &str) -> StoreResult<Vec<Report>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, tenant_id, automation_id, title, content, created_at
                     FROM reports WHERE tenant_id = ?1 ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![tenant_id], report_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }
}
