//! # Automation Portal
//!
//! Multi-tenant admin/client portal for managed automations.
//!
//! This library provides:
//! - A role gate that confines clients to their own tenant and lets admins
//!   see everything
//! - Assignment reconciliation between automations and tenants
//! - Tenant dashboards (assigned automations, run history, reports) and an
//!   admin overview
//! - Pluggable backends: in-memory, SQLite or Supabase (PostgREST) for data,
//!   local JWT or Supabase Auth (GoTrue) for identity, and local disk or
//!   Supabase Storage for avatars
//!
//! ## Request Flow
//! 1. `api` authenticates the bearer token through the identity provider
//! 2. `portal` resolves the caller's profile (creating it on first sight)
//! 3. The portal operation checks the role and tenant, then reads or writes
//!    through the store
//!
//! ## Modules
//! - `api`: axum router, auth middleware and handlers
//! - `portal`: the operations behind every endpoint
//! - `store`: `PortalStore` trait and its backends
//! - `identity`: `IdentityProvider` trait and its backends
//! - `storage`: object storage for avatars
//! - `supabase`: shared PostgREST/GoTrue/Storage HTTP client

pub mod api;
pub mod config;
pub mod identity;
pub mod model;
pub mod portal;
pub mod storage;
pub mod store;
pub mod supabase;

pub use config::Config;
pub use portal::{Portal, PortalError};
