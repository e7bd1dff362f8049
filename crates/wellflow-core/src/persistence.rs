//! Persistence seams
//!
//! The engine never touches files directly. Model records and approval
//! records are reached through these traits; `wellflow-store` implements
//! them over JSON files and the in-memory versions here back the tests.

use crate::error::PersistenceError;
use crate::types::{ModelKey, ModelStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-user model record access
pub trait ModelStateStore: Send + Sync {
    /// Persisted status, defaulting to untrained
    fn model_status(&self, user: &str, key: ModelKey) -> Result<ModelStatus, PersistenceError>;

    /// Mark the model private for this user
    fn save_private(&self, user: &str, key: ModelKey) -> Result<(), PersistenceError>;

    /// Record a new fine-tuned version; returns the new version number
    fn bump_version(&self, user: &str, key: ModelKey) -> Result<u32, PersistenceError>;
}

/// Destination of submitted approval records
pub trait ApprovalSink: Send + Sync {
    /// Store a new record (newest first)
    fn submit(&self, record: ApprovalRecord) -> Result<(), PersistenceError>;
}

/// Review status of a submitted report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Waiting for the manager
    #[default]
    Pending,
    /// Sent back with feedback
    Rejected,
}

/// A submitted task awaiting managerial approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Record id (`TASK-{unix}-{nnn}`)
    pub id: String,
    /// Submitting user
    pub submitter: String,
    /// Task label
    pub task_name: String,
    /// Submission time (`%Y-%m-%d %H:%M:%S`)
    pub submit_time: String,
    /// Data file the analysis ran on
    #[serde(default)]
    pub file_path: String,
    /// Algorithm conclusion
    #[serde(default)]
    pub summary: String,
    /// Review status
    #[serde(default)]
    pub status: ApprovalStatus,
    /// Manager feedback on rejection
    #[serde(default)]
    pub feedback: String,
}

/// In-memory model store
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    states: Mutex<HashMap<(String, ModelKey), (ModelStatus, u32)>>,
}

impl MemoryModelStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a model
    #[must_use]
    pub fn version(&self, user: &str, key: ModelKey) -> u32 {
        self.states
            .lock()
            .get(&(user.to_string(), key))
            .map_or(0, |(_, version)| *version)
    }
}

impl ModelStateStore for MemoryModelStore {
    fn model_status(&self, user: &str, key: ModelKey) -> Result<ModelStatus, PersistenceError> {
        Ok(self
            .states
            .lock()
            .get(&(user.to_string(), key))
            .map_or(ModelStatus::Untrained, |(status, _)| *status))
    }

    fn save_private(&self, user: &str, key: ModelKey) -> Result<(), PersistenceError> {
        self.states
            .lock()
            .entry((user.to_string(), key))
            .or_insert((ModelStatus::Untrained, 0))
            .0 = ModelStatus::Private;
        Ok(())
    }

    fn bump_version(&self, user: &str, key: ModelKey) -> Result<u32, PersistenceError> {
        let mut states = self.states.lock();
        let entry = states
            .entry((user.to_string(), key))
            .or_insert((ModelStatus::Untrained, 0));
        entry.1 += 1;
        Ok(entry.1)
    }
}

/// In-memory approval queue
#[derive(Debug, Default)]
pub struct MemoryApprovalSink {
    records: Mutex<Vec<ApprovalRecord>>,
}

impl MemoryApprovalSink {
    /// Create an empty queue
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queue, newest first
    #[must_use]
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.lock().clone()
    }

    /// Number of queued records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ApprovalSink for MemoryApprovalSink {
    fn submit(&self, record: ApprovalRecord) -> Result<(), PersistenceError> {
        self.records.lock().insert(0, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_defaults_untrained() {
        let store = MemoryModelStore::new();
        assert_eq!(
            store.model_status("user", ModelKey::Risk).unwrap(),
            ModelStatus::Untrained
        );
    }

    #[test]
    fn memory_store_is_per_user() {
        let store = MemoryModelStore::new();
        store.save_private("alice", ModelKey::Trend).unwrap();
        assert_eq!(
            store.model_status("alice", ModelKey::Trend).unwrap(),
            ModelStatus::Private
        );
        assert_eq!(
            store.model_status("bob", ModelKey::Trend).unwrap(),
            ModelStatus::Untrained
        );
        assert_eq!(
            store.model_status("alice", ModelKey::Water).unwrap(),
            ModelStatus::Untrained
        );
    }

    #[test]
    fn sink_keeps_newest_first() {
        let sink = MemoryApprovalSink::new();
        for id in ["a", "b"] {
            sink.submit(ApprovalRecord {
                id: id.to_string(),
                submitter: "user".into(),
                task_name: "风险预测".into(),
                submit_time: String::new(),
                file_path: String::new(),
                summary: String::new(),
                status: ApprovalStatus::Pending,
                feedback: String::new(),
            })
            .unwrap();
        }
        let ids: Vec<_> = sink.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
