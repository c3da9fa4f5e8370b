//! Behaviour every store backend must share. Each backend's test module
//! calls `run_all` with a fresh store.

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{AssignmentKey, AssignmentScope, PortalStore, StoreError};
use crate::model::{
    Assignment, AssignmentStatus, AssignmentUpdate, AutomationUpdate, NewAutomation, Profile,
    ProfileUpdate, Report, Role, Run, RunStatus, Tenant,
};

pub(crate) async fn run_all(store: &dyn PortalStore) {
    profile_insert_is_idempotent(store).await;
    profile_listing_filters_by_role(store).await;
    tenant_ensure_keeps_first_row(store).await;
    automation_crud(store).await;
    assign_then_unassign_leaves_no_row(store).await;
    assign_twice_keeps_one_row(store).await;
    tenant_scope_replacement(store).await;
    runs_are_append_only(store).await;
    reports_are_scoped_to_tenant(store).await;
}

fn tenant(id: &str, name: &str) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: name.to_string(),
        created_by: None,
        created_at: Utc::now(),
    }
}

async fn new_automation(store: &dyn PortalStore, name: &str) -> Uuid {
    let automation = NewAutomation {
        name: name.to_string(),
        description: Some(format!("{} description", name)),
        automation_type: Some("Report Generation".to_string()),
        schedule: Some("Daily at 2:00 PM".to_string()),
        script_content: None,
    }
    .into_automation();
    store
        .create_automation(&automation)
        .await
        .expect("create automation")
        .id
}

async fn profile_insert_is_idempotent(store: &dyn PortalStore) {
    let id = Uuid::new_v4();
    let first = Profile::default_client(id, Some("first@x.com"));
    let second = Profile::default_client(id, Some("second@x.com"));

    store.insert_profile_if_absent(&first).await.unwrap();
    let stored = store.insert_profile_if_absent(&second).await.unwrap();

    assert_eq!(stored.contact_email.as_deref(), Some("first@x.com"));
    let fetched = store.get_profile(id).await.unwrap().expect("profile");
    assert_eq!(fetched.role, Role::Client);

    let updated = store
        .update_profile(
            id,
            &ProfileUpdate {
                phone: Some("555-0100".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.phone.as_deref(), Some("555-0100"));
    assert_eq!(updated.contact_email.as_deref(), Some("first@x.com"));

    let missing = store
        .update_profile(Uuid::new_v4(), &ProfileUpdate::default())
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    let moved = store.set_profile_tenant(id, "uber-eats").await.unwrap();
    assert_eq!(moved.own_tenant_id(), "uber-eats");
    assert_eq!(moved.phone.as_deref(), Some("555-0100"));
    assert_eq!(
        store.get_profile(id).await.unwrap().unwrap().tenant_id.as_deref(),
        Some("uber-eats")
    );
    assert!(matches!(
        store.set_profile_tenant(Uuid::new_v4(), "uber-eats").await,
        Err(StoreError::NotFound(_))
    ));
}

async fn profile_listing_filters_by_role(store: &dyn PortalStore) {
    let before_clients = store.count_profiles(Some(Role::Client)).await.unwrap();
    let before_admins = store.count_profiles(Some(Role::Admin)).await.unwrap();

    let admin_id = Uuid::new_v4();
    store
        .insert_profile_if_absent(&Profile::default_client(admin_id, None))
        .await
        .unwrap();
    let admin = store.set_profile_role(admin_id, Role::Admin).await.unwrap();
    assert!(admin.is_admin());

    let mut newest = Profile::default_client(Uuid::new_v4(), None);
    newest.created_at = Utc::now() + Duration::seconds(60);
    newest.updated_at = newest.created_at;
    store.insert_profile_if_absent(&newest).await.unwrap();

    assert_eq!(
        store.count_profiles(Some(Role::Admin)).await.unwrap(),
        before_admins + 1
    );
    assert_eq!(
        store.count_profiles(Some(Role::Client)).await.unwrap(),
        before_clients + 1
    );

    let recent = store
        .list_profiles(Some(Role::Client), Some(1))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, newest.id);
}

async fn tenant_ensure_keeps_first_row(store: &dyn PortalStore) {
    store.ensure_tenant(&tenant("uber-eats", "Uber Eats")).await.unwrap();
    let again = store
        .ensure_tenant(&tenant("uber-eats", "Renamed"))
        .await
        .unwrap();
    assert_eq!(again.name, "Uber Eats");
    assert!(store.get_tenant("uber-eats").await.unwrap().is_some());
    assert!(store.get_tenant("nobody").await.unwrap().is_none());

    let names: Vec<String> = store
        .list_tenants()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

async fn automation_crud(store: &dyn PortalStore) {
    let before = store.count_automations().await.unwrap();
    let id = new_automation(store, "Weekly Digest").await;
    assert_eq!(store.count_automations().await.unwrap(), before + 1);

    let updated = store
        .update_automation(
            id,
            &AutomationUpdate {
                description: Some("Sends the weekly digest".to_string()),
                ..AutomationUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Weekly Digest");
    assert_eq!(updated.description.as_deref(), Some("Sends the weekly digest"));

    store.ensure_tenant(&tenant("digest-co", "Digest Co")).await.unwrap();
    store
        .replace_assignments(
            &AssignmentScope::Automation(id),
            &[AssignmentKey::new("digest-co", id)],
        )
        .await
        .unwrap();

    assert!(store.delete_automation(id).await.unwrap());
    assert!(!store.delete_automation(id).await.unwrap());
    assert!(store.get_automation(id).await.unwrap().is_none());
    assert!(store
        .list_assignments(&AssignmentScope::Tenant("digest-co".to_string()))
        .await
        .unwrap()
        .is_empty());
}

async fn assign_then_unassign_leaves_no_row(store: &dyn PortalStore) {
    store.ensure_tenant(&tenant("acme", "Acme")).await.unwrap();
    let automation = new_automation(store, "Inventory Sync").await;
    let scope = AssignmentScope::Automation(automation);

    let plan = store
        .replace_assignments(&scope, &[AssignmentKey::new("acme", automation)])
        .await
        .unwrap();
    assert_eq!(plan.insert.len(), 1);
    assert_eq!(store.list_assignments(&scope).await.unwrap().len(), 1);

    let plan = store.replace_assignments(&scope, &[]).await.unwrap();
    assert_eq!(plan.remove, vec![AssignmentKey::new("acme", automation)]);
    assert!(store.list_assignments(&scope).await.unwrap().is_empty());
}

async fn assign_twice_keeps_one_row(store: &dyn PortalStore) {
    store.ensure_tenant(&tenant("globex", "Globex")).await.unwrap();
    let automation = new_automation(store, "Daily Sales Report").await;
    let scope = AssignmentScope::Automation(automation);
    let desired = [AssignmentKey::new("globex", automation)];

    store.replace_assignments(&scope, &desired).await.unwrap();
    let second = store.replace_assignments(&scope, &desired).await.unwrap();

    assert!(second.is_empty());
    let rows = store.list_assignments(&scope).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AssignmentStatus::Active);

    let foreign = store
        .replace_assignments(&scope, &[AssignmentKey::new("globex", Uuid::new_v4())])
        .await;
    assert!(matches!(foreign, Err(StoreError::Invalid(_))));
}

async fn tenant_scope_replacement(store: &dyn PortalStore) {
    store.ensure_tenant(&tenant("initech", "Initech")).await.unwrap();
    let a = new_automation(store, "TPS Reports").await;
    let b = new_automation(store, "Stapler Audit").await;
    let scope = AssignmentScope::Tenant("initech".to_string());

    store
        .replace_assignments(
            &scope,
            &[AssignmentKey::new("initech", a), AssignmentKey::new("initech", b)],
        )
        .await
        .unwrap();
    store
        .replace_assignments(&scope, &[AssignmentKey::new("initech", b)])
        .await
        .unwrap();

    let rows = store.list_assignments(&scope).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].automation_id, b);
}

async fn runs_are_append_only(store: &dyn PortalStore) {
    store.ensure_tenant(&tenant("hooli", "Hooli")).await.unwrap();
    let automation = new_automation(store, "Nightly Backup").await;
    store
        .replace_assignments(
            &AssignmentScope::Automation(automation),
            &[AssignmentKey::new("hooli", automation)],
        )
        .await
        .unwrap();
    let assignment: Assignment = store
        .list_assignments(&AssignmentScope::Automation(automation))
        .await
        .unwrap()
        .remove(0);

    let paused = store
        .update_assignment(
            assignment.id,
            &AssignmentUpdate {
                status: Some(AssignmentStatus::Paused),
                next_run_at: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(paused.status, AssignmentStatus::Paused);

    let running_before = store.count_runs(Some(RunStatus::Running)).await.unwrap();
    let run = store.insert_run(&Run::start(&assignment)).await.unwrap();
    assert_eq!(
        store.count_runs(Some(RunStatus::Running)).await.unwrap(),
        running_before + 1
    );
    let stamped = store.get_assignment(assignment.id).await.unwrap().unwrap();
    assert!(stamped.last_run_at.is_some());

    let finished = store
        .finish_run(run.id, RunStatus::Completed, Some("ok"), Utc::now())
        .await
        .unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.ended_at.is_some());
    assert_eq!(finished.log.as_deref(), Some("ok"));

    let again = store
        .finish_run(run.id, RunStatus::Failed, None, Utc::now())
        .await;
    assert!(matches!(again, Err(StoreError::Conflict(_))));

    let missing = store
        .finish_run(Uuid::new_v4(), RunStatus::Failed, None, Utc::now())
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    let mut later = Run::start(&assignment);
    later.started_at = Utc::now() + Duration::seconds(30);
    store.insert_run(&later).await.unwrap();

    let recent = store.recent_runs("hooli", 1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, later.id);
    assert_eq!(store.recent_runs("hooli", 10).await.unwrap().len(), 2);
    assert!(store.recent_runs("nobody", 10).await.unwrap().is_empty());
}

async fn reports_are_scoped_to_tenant(store: &dyn PortalStore) {
    let report = Report {
        id: Uuid::new_v4(),
        tenant_id: "acme".to_string(),
        automation_id: None,
        title: "March summary".to_string(),
        content: Some("All green".to_string()),
        created_at: Utc::now(),
    };
    store.insert_report(&report).await.unwrap();

    let reports = store.list_reports("acme").await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].title, "March summary");
    assert!(store.list_reports("globex").await.unwrap().is_empty());
}
