//! Portal operations: the role gate, assignment reconciliation, dashboards
//! and the admin/self-service actions built on top of the store, identity
//! and storage backends.

mod account;
mod assign;
mod catalog;
mod clients;
mod dashboard;
mod gate;
mod runs;

pub use account::{LoginOutcome, MAX_AVATAR_BYTES};
pub use catalog::NewReport;
pub use clients::NewClient;
pub use dashboard::{AdminOverview, AssignedAutomation, TenantDashboard};
pub use gate::Caller;
pub use runs::RunRequest;

use thiserror::Error;

use crate::identity::{IdentityError, SharedIdentity};
use crate::storage::{SharedStorage, StorageError};
use crate::store::{SharedStore, StoreError};

/// Where `GET /api/dashboard` and denied tenant routes send the caller.
pub const DASHBOARD_PATH: &str = "/api/dashboard";
pub const ADMIN_OVERVIEW_PATH: &str = "/api/admin/overview";

/// Upper bound for `?limit=` on run listings.
pub const MAX_RUNS_LIMIT: usize = 100;

/// Clients and automations shown on the admin overview.
pub const OVERVIEW_RECENT_LIMIT: usize = 5;

pub const AVATAR_BUCKET: &str = "avatars";

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Send the caller elsewhere instead of answering.
    #[error("redirect to {0}")]
    Redirect(String),
}

pub type PortalResult<T> = Result<T, PortalError>;

pub struct Portal {
    store: SharedStore,
    identity: SharedIdentity,
    storage: SharedStorage,
    recent_runs_limit: usize,
    public_url: String,
}

impl Portal {
    pub fn new(
        store: SharedStore,
        identity: SharedIdentity,
        storage: SharedStorage,
        recent_runs_limit: usize,
        public_url: &str,
    ) -> Self {
        Self {
            store,
            identity,
            storage,
            recent_runs_limit: recent_runs_limit.max(1),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn identity(&self) -> &SharedIdentity {
        &self.identity
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }
}
