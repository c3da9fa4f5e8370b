//! Tenant dashboard endpoints, open to admins and the tenant's own clients.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::model::{Report, Run};
use crate::portal::{AssignedAutomation, Caller, RunRequest, TenantDashboard};

use super::error::ApiResult;
use super::routes::AppState;
use super::types::RunsQuery;

/// Create the dashboard routes (nested under `/api/dashboard`).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(landing))
        .route("/:tenant_id", get(overview))
        .route("/:tenant_id/automations", get(automations))
        .route("/:tenant_id/automations/:assignment_id/run", post(run_now))
        .route("/:tenant_id/runs", get(runs))
        .route("/:tenant_id/reports", get(reports))
}

/// GET /api/dashboard
/// Sends admins to the overview and clients to their own tenant.
async fn landing(Extension(caller): Extension<Caller>) -> Redirect {
    Redirect::to(&caller.dashboard_redirect())
}

/// GET /api/dashboard/:tenant_id
async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<TenantDashboard>> {
    let dashboard = state
        .portal
        .tenant_dashboard(&caller, &tenant_id, query.limit)
        .await?;
    Ok(Json(dashboard))
}

/// GET /api/dashboard/:tenant_id/automations
async fn automations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Vec<AssignedAutomation>>> {
    Ok(Json(
        state.portal.tenant_automations(&caller, &tenant_id).await?,
    ))
}

/// GET /api/dashboard/:tenant_id/runs?limit=N
async fn runs(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<Run>>> {
    Ok(Json(
        state
            .portal
            .tenant_runs(&caller, &tenant_id, query.limit)
            .await?,
    ))
}

/// GET /api/dashboard/:tenant_id/reports
async fn reports(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Vec<Report>>> {
    Ok(Json(state.portal.tenant_reports(&caller, &tenant_id).await?))
}

/// POST /api/dashboard/:tenant_id/automations/:assignment_id/run
/// Accepted and logged; no executor is attached.
async fn run_now(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((tenant_id, assignment_id)): Path<(String, Uuid)>,
) -> ApiResult<(StatusCode, Json<RunRequest>)> {
    let request = state
        .portal
        .request_run(&caller, &tenant_id, assignment_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}
