//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Location of the JSON stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding every store file
    pub data_dir: PathBuf,
    /// User records
    pub users_file: String,
    /// Approval queue
    pub reports_file: String,
    /// Manager counters
    pub stats_file: String,
    /// Per-user session snapshots
    pub history_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            users_file: "users.json".to_string(),
            reports_file: "reports.json".to_string(),
            stats_file: "manager_stats.json".to_string(),
            history_dir: "user_history".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create default configuration rooted at `data_dir`
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::default().with_data_dir(data_dir)
    }

    /// With data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Path of the user records
    #[must_use]
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(&self.users_file)
    }

    /// Path of the approval queue
    #[must_use]
    pub fn reports_path(&self) -> PathBuf {
        self.data_dir.join(&self.reports_file)
    }

    /// Path of the manager counters
    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join(&self.stats_file)
    }

    /// Snapshot directory of one user
    #[must_use]
    pub fn user_history_dir(&self, user: &str) -> PathBuf {
        self.data_dir.join(&self.history_dir).join(user)
    }

    /// Data directory
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
