//! WellFlow Store - JSON-file persistence
//!
//! Accounts with per-user model state, the approval queue with the
//! manager's counters, and saved sessions. Each document is a JSON file
//! under one data directory, updated as an atomic read-modify-write.
//!
//! [`UserStore`] implements [`wellflow_core::ModelStateStore`] and
//! [`ReportStore`] implements [`wellflow_core::ApprovalSink`], so both plug
//! straight into the engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use wellflow_store::{StoreConfig, Stores};
//!
//! let stores = Stores::open(StoreConfig::new("data"))?;
//! let role = stores.users.authenticate("user", "123")?;
//! for record in stores.reports.pending()? {
//!     println!("{} {}", record.id, record.task_name);
//! }
//! ```

#![warn(unreachable_pub)]

pub mod atomic;
pub mod config;
pub mod error;
pub mod history;
pub mod reports;
pub mod users;

pub use config::StoreConfig;
pub use error::{RegistrationError, StoreError};
pub use history::{session_title, HistoryStore};
pub use reports::{ManagerStats, ReportStore, DEFAULT_FEEDBACK};
pub use users::{HistoryEntry, Role, UserRecord, UserStore, ADMIN_USER};

use std::sync::Arc;

/// All stores over one data directory
#[derive(Debug, Clone)]
pub struct Stores {
    /// Accounts and model state
    pub users: Arc<UserStore>,
    /// Approval queue
    pub reports: Arc<ReportStore>,
    /// Saved sessions
    pub history: HistoryStore,
}

impl Stores {
    /// Open every store, seeding the user file if needed
    ///
    /// # Errors
    /// The user file cannot be read or written.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let users = Arc::new(UserStore::open(&config)?);
        let reports = Arc::new(ReportStore::open(&config));
        let history = HistoryStore::new(users.clone(), config);
        Ok(Self {
            users,
            reports,
            history,
        })
    }
}
