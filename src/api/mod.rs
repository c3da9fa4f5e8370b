//! HTTP API for the automation portal.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/auth/login` - Password sign-in, returns a bearer token
//! - `POST /api/auth/logout` - Revoke the current token
//! - `POST /api/auth/reset-password` - Send a password reset link
//! - `POST /api/auth/update-password` - Set a new password (recovery token)
//! - `GET|PATCH /api/me` - Own profile
//! - `POST /api/me/avatar` - Upload an avatar (multipart `file`)
//! - `GET /api/dashboard` - Redirect to the caller's landing page
//! - `GET /api/dashboard/{tenant}` - Tenant dashboard
//! - `GET /api/dashboard/{tenant}/automations|runs|reports`
//! - `POST /api/dashboard/{tenant}/automations/{assignment}/run` - "Run Now"
//! - `/api/admin/...` - Overview, clients, tenants, automations, assignments, runs
//! - `GET /storage/v1/object/public/{bucket}/{path}` - Local object storage

mod admin;
mod auth;
mod dashboard;
pub mod error;
mod me;
mod routes;
pub mod types;

pub use routes::{build_router, serve, AppState};
