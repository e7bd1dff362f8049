//! Approval queue and manager counters

use crate::atomic::JsonFile;
use crate::config::StoreConfig;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use wellflow_core::{ApprovalRecord, ApprovalSink, ApprovalStatus, PersistenceError};

/// Feedback attached to a rejection without an explicit message
pub const DEFAULT_FEEDBACK: &str = "数据特征工程存在异常，请重新检查相关性分析结果。";

const INITIAL_PROCESSED: u64 = 15;

/// `manager_stats.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    /// Reviews completed
    #[serde(default = "initial_processed")]
    pub processed_count: u64,
}

fn initial_processed() -> u64 {
    INITIAL_PROCESSED
}

impl Default for ManagerStats {
    fn default() -> Self {
        Self {
            processed_count: INITIAL_PROCESSED,
        }
    }
}

/// `reports.json`, newest first
pub struct ReportStore {
    reports: JsonFile<Vec<ApprovalRecord>>,
    stats: JsonFile<ManagerStats>,
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore")
            .field("reports", &self.reports.path())
            .field("stats", &self.stats.path())
            .finish()
    }
}

impl ReportStore {
    /// Open the queue and the counters
    #[must_use]
    pub fn open(config: &StoreConfig) -> Self {
        Self {
            reports: JsonFile::new(config.reports_path()),
            stats: JsonFile::new(config.stats_path()),
        }
    }

    /// Every record, newest first
    ///
    /// # Errors
    /// Read failure.
    pub fn list(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        self.reports.read()
    }

    /// Records still awaiting review
    ///
    /// # Errors
    /// Read failure.
    pub fn pending(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .collect())
    }

    /// Approve a pending record, removing it from the queue
    ///
    /// # Errors
    /// `UnknownReport` or `NotPending`, or a storage failure.
    pub fn approve(&self, id: &str) -> Result<ApprovalRecord, StoreError> {
        let record = self.reports.update(|reports| {
            let pos = pending_position(reports, id)?;
            Ok(reports.remove(pos))
        })?;
        let processed = self.count_processed()?;
        tracing::info!(id, submitter = %record.submitter, processed, "report approved");
        Ok(record)
    }

    /// Reject a pending record; it stays queued as a notification
    ///
    /// # Errors
    /// `UnknownReport` or `NotPending`, or a storage failure.
    pub fn reject(&self, id: &str, feedback: Option<&str>) -> Result<ApprovalRecord, StoreError> {
        let feedback = feedback
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_FEEDBACK);
        let record = self.reports.update(|reports| {
            let pos = pending_position(reports, id)?;
            let record = &mut reports[pos];
            record.status = ApprovalStatus::Rejected;
            record.feedback = feedback.to_string();
            Ok(record.clone())
        })?;
        let processed = self.count_processed()?;
        tracing::info!(id, submitter = %record.submitter, processed, "report rejected");
        Ok(record)
    }

    /// Rejections addressed to a submitter
    ///
    /// # Errors
    /// Read failure.
    pub fn rejected_for(&self, user: &str) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| is_rejection_for(r, user))
            .collect())
    }

    /// Drop a submitter's rejections; returns how many were removed
    ///
    /// # Errors
    /// Storage failure.
    pub fn clear_notifications(&self, user: &str) -> Result<usize, StoreError> {
        self.reports.update(|reports| {
            let before = reports.len();
            reports.retain(|r| !is_rejection_for(r, user));
            Ok(before - reports.len())
        })
    }

    /// Manager counters
    ///
    /// # Errors
    /// Read failure.
    pub fn stats(&self) -> Result<ManagerStats, StoreError> {
        self.stats.read()
    }

    fn count_processed(&self) -> Result<u64, StoreError> {
        self.stats.update(|stats| {
            stats.processed_count += 1;
            Ok(stats.processed_count)
        })
    }
}

fn is_rejection_for(record: &ApprovalRecord, user: &str) -> bool {
    record.submitter == user && record.status == ApprovalStatus::Rejected
}

fn pending_position(reports: &[ApprovalRecord], id: &str) -> Result<usize, StoreError> {
    let pos = reports
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| StoreError::UnknownReport(id.to_string()))?;
    if reports[pos].status != ApprovalStatus::Pending {
        return Err(StoreError::NotPending(id.to_string()));
    }
    Ok(pos)
}

impl ApprovalSink for ReportStore {
    fn submit(&self, record: ApprovalRecord) -> Result<(), PersistenceError> {
        let id = record.id.clone();
        self.reports.update(|reports| {
            reports.insert(0, record);
            Ok(())
        })?;
        tracing::info!(id = %id, "report queued for approval");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, submitter: &str) -> ApprovalRecord {
        ApprovalRecord {
            id: id.to_string(),
            submitter: submitter.to_string(),
            task_name: "风险预测".to_string(),
            submit_time: "2024-07-01 09:00:00".to_string(),
            file_path: "7月+风险预测.csv".to_string(),
            summary: "ok".to_string(),
            status: ApprovalStatus::Pending,
            feedback: String::new(),
        }
    }

    #[test]
    fn stats_default_to_fifteen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(&StoreConfig::new(dir.path()));
        assert_eq!(store.stats().unwrap().processed_count, 15);
        std::fs::write(dir.path().join("manager_stats.json"), "{}").unwrap();
        assert_eq!(store.stats().unwrap().processed_count, 15);
    }

    #[test]
    fn newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(&StoreConfig::new(dir.path()));
        store.submit(record("A", "user")).unwrap();
        store.submit(record("B", "user")).unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn reviewing_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(&StoreConfig::new(dir.path()));
        store.submit(record("A", "user")).unwrap();
        store.reject("A", None).unwrap();
        assert!(matches!(store.reject("A", None), Err(StoreError::NotPending(_))));
        assert!(matches!(store.approve("A"), Err(StoreError::NotPending(_))));
        assert!(matches!(store.approve("Z"), Err(StoreError::UnknownReport(_))));
        assert_eq!(store.stats().unwrap().processed_count, 16);
    }
}
