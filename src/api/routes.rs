//! Router assembly and the HTTP server.

use std::sync::Arc;

use axum::{extract::State, middleware, response::Json, routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::identity::create_identity;
use crate::portal::Portal;
use crate::storage::{create_storage, PUBLIC_OBJECT_PREFIX};
use crate::store::create_store;

use super::admin;
use super::auth;
use super::dashboard;
use super::me;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub portal: Portal,
}

impl AppState {
    /// Open the configured store, identity provider and object storage.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = create_store(&config).await?;
        let identity = create_identity(&config).await?;
        let storage = create_storage(&config)?;
        tracing::info!(
            store = config.store.as_str(),
            identity = identity.name(),
            storage = storage.name(),
            "Backends ready"
        );

        let portal = Portal::new(
            store,
            identity,
            storage,
            config.recent_runs_limit,
            &config.public_url,
        );
        Ok(Self { config, portal })
    }
}

/// Build the full router for a prepared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/reset-password", post(auth::reset_password));

    if let Some(root) = state.portal.storage().local_root() {
        public_routes = public_routes.nest_service(PUBLIC_OBJECT_PREFIX, ServeDir::new(root));
    }

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route(auth::UPDATE_PASSWORD_PATH, post(auth::update_password))
        .nest("/api/me", me::routes())
        .nest("/api/dashboard", dashboard::routes())
        .nest("/api/admin", admin::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config.clone()).await?);

    if let (Some(email), Some(password)) = (
        config.auth.admin_email.as_deref(),
        config.auth.admin_password.as_deref(),
    ) {
        let profile = state.portal.bootstrap_admin(email, password).await?;
        tracing::info!(user_id = %profile.id, "Admin account {} is ready", email);
    }

    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
        store: state.config.store.as_str().to_string(),
        identity: state.portal.identity().name().to_string(),
        storage: state.portal.storage().name().to_string(),
    })
}
