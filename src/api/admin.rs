//! Admin endpoints: overview, clients, tenants, the automation catalog,
//! assignments and run bookkeeping. Every handler is admin-only; the portal
//! answers 403 for clients.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use uuid::Uuid;

use crate::model::{
    Assignment, AssignmentUpdate, Automation, AutomationUpdate, NewAutomation, Profile, Report,
    Run, Tenant,
};
use crate::portal::{AdminOverview, Caller, NewClient, NewReport};
use crate::store::AssignmentPlan;

use super::error::ApiResult;
use super::routes::AppState;
use super::types::{
    AssignAutomationsRequest, AssignTenantsRequest, CreateTenantRequest, FinishRunRequest,
    StatusResponse,
};

/// Create the admin routes (nested under `/api/admin`).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/overview", get(overview))
        .route("/clients", get(list_clients).post(create_client))
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/:tenant_id/automations", put(assign_to_tenant))
        .route("/tenants/:tenant_id/reports", post(create_report))
        .route("/automations", get(list_automations).post(create_automation))
        .route(
            "/automations/:id",
            get(get_automation)
                .patch(update_automation)
                .delete(delete_automation),
        )
        .route(
            "/automations/:id/assignments",
            get(automation_assignments).put(assign_automation),
        )
        .route("/assignments/:id", patch(update_assignment))
        .route("/assignments/:id/runs", post(start_run))
        .route("/runs/:id/finish", post(finish_run))
}

/// GET /api/admin/overview
async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<AdminOverview>> {
    Ok(Json(state.portal.admin_overview(&caller).await?))
}

/// GET /api/admin/clients
async fn list_clients(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<Profile>>> {
    Ok(Json(state.portal.list_clients(&caller).await?))
}

/// POST /api/admin/clients
async fn create_client(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<NewClient>,
) -> ApiResult<(StatusCode, Json<Profile>)> {
    let profile = state.portal.create_client(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /api/admin/tenants
async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<Tenant>>> {
    Ok(Json(state.portal.list_tenants(&caller).await?))
}

/// POST /api/admin/tenants
async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    let tenant = state
        .portal
        .create_tenant(&caller, &req.id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// PUT /api/admin/tenants/:tenant_id/automations
/// Replaces the tenant's full automation list.
async fn assign_to_tenant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
    Json(req): Json<AssignAutomationsRequest>,
) -> ApiResult<Json<AssignmentPlan>> {
    Ok(Json(
        state
            .portal
            .assign_to_tenant(&caller, &tenant_id, &req.automation_ids)
            .await?,
    ))
}

/// POST /api/admin/tenants/:tenant_id/reports
async fn create_report(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
    Json(req): Json<NewReport>,
) -> ApiResult<(StatusCode, Json<Report>)> {
    let report = state.portal.create_report(&caller, &tenant_id, req).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /api/admin/automations
async fn list_automations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<Automation>>> {
    Ok(Json(state.portal.list_automations(&caller).await?))
}

/// POST /api/admin/automations
async fn create_automation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<NewAutomation>,
) -> ApiResult<(StatusCode, Json<Automation>)> {
    let automation = state.portal.create_automation(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(automation)))
}

/// GET /api/admin/automations/:id
async fn get_automation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Automation>> {
    Ok(Json(state.portal.get_automation(&caller, id).await?))
}

/// PATCH /api/admin/automations/:id
async fn update_automation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<AutomationUpdate>,
) -> ApiResult<Json<Automation>> {
    Ok(Json(state.portal.update_automation(&caller, id, req).await?))
}

/// DELETE /api/admin/automations/:id
async fn delete_automation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    state.portal.delete_automation(&caller, id).await?;
    Ok(Json(StatusResponse::ok("Automation deleted")))
}

/// GET /api/admin/automations/:id/assignments
async fn automation_assignments(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Assignment>>> {
    Ok(Json(state.portal.automation_assignments(&caller, id).await?))
}

/// PUT /api/admin/automations/:id/assignments
/// Replaces the automation's full tenant list.
async fn assign_automation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTenantsRequest>,
) -> ApiResult<Json<AssignmentPlan>> {
    Ok(Json(
        state
            .portal
            .assign_automation(&caller, id, &req.tenant_ids)
            .await?,
    ))
}

/// PATCH /api/admin/assignments/:id
async fn update_assignment(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignmentUpdate>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(state.portal.update_assignment(&caller, id, req).await?))
}

/// POST /api/admin/assignments/:id/runs
async fn start_run(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = state.portal.start_run(&caller, id).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// POST /api/admin/runs/:id/finish
async fn finish_run(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinishRunRequest>,
) -> ApiResult<Json<Run>> {
    Ok(Json(
        state
            .portal
            .finish_run(&caller, id, req.status, req.log)
            .await?,
    ))
}
