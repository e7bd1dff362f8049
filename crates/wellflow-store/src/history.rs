//! Saved sessions
//!
//! A snapshot is the serialized [`WorkflowSession`] under
//! `history_dir/<user>/<id>.json`; the index lives in the user's record,
//! newest first. Archive entries carry no snapshot.

use crate::atomic::{read_json, write_json};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::users::{HistoryEntry, UserStore};
use std::sync::Arc;
use wellflow_core::WorkflowSession;

const UNTITLED: &str = "未命名会话";
const TITLE_CHARS: usize = 10;

/// Title body for a session: its task, else the head of the request
#[must_use]
pub fn session_title(task: Option<&str>, request: &str) -> String {
    if let Some(task) = task.filter(|t| !t.is_empty()) {
        return task.to_string();
    }
    let request = request.trim();
    if request.is_empty() {
        return UNTITLED.to_string();
    }
    let head: String = request.chars().take(TITLE_CHARS).collect();
    format!("{head}...")
}

fn now_minutes() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}

fn allocate_id(history: &[HistoryEntry]) -> String {
    id_after(history, chrono::Utc::now().timestamp())
}

/// `secs` as an id, suffixed with a counter when it is taken
fn id_after(history: &[HistoryEntry], secs: i64) -> String {
    let base = secs.to_string();
    let taken = |id: &str| history.iter().any(|e| e.id == id);
    if !taken(&base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let id = format!("{base}-{n}");
        if !taken(&id) {
            return id;
        }
        n += 1;
    }
}

/// Per-user session history
#[derive(Debug, Clone)]
pub struct HistoryStore {
    users: Arc<UserStore>,
    config: StoreConfig,
}

impl HistoryStore {
    /// History over an open user store
    #[must_use]
    pub fn new(users: Arc<UserStore>, config: StoreConfig) -> Self {
        Self { users, config }
    }

    /// Snapshot a session and index it
    ///
    /// Without `id` a fresh one is allocated. Saving an existing id replaces
    /// the snapshot and moves its entry to the front. Returns the id.
    ///
    /// # Errors
    /// `UnknownUser` when the session's user has no account, otherwise a
    /// storage failure. The index is left as it was when the snapshot
    /// cannot be written.
    pub fn save_session(
        &self,
        session: &WorkflowSession,
        id: Option<&str>,
        title: Option<&str>,
    ) -> Result<String, StoreError> {
        let user = session.user();
        let dir = self.config.user_history_dir(user);
        let title = title.map_or_else(
            || session_title(session.context().task_name(), session.request()),
            str::to_string,
        );
        let updated_at = now_minutes();

        let (entry, previous) = self.users.update_user(user, |record| {
            let id = id.map_or_else(|| allocate_id(&record.history), str::to_string);
            let previous = record
                .history
                .iter()
                .position(|e| e.id == id)
                .map(|pos| (pos, record.history.remove(pos)));
            let entry = HistoryEntry {
                file_path: dir.join(format!("{id}.json")).display().to_string(),
                id,
                title: format!("📅 {updated_at} | {title}"),
                updated_at,
            };
            record.history.insert(0, entry.clone());
            (entry, previous)
        })?;

        if let Err(err) = write_json(std::path::Path::new(&entry.file_path), session) {
            let restored = self.users.update_user(user, |record| {
                record.history.retain(|e| e.id != entry.id);
                if let Some((pos, old)) = previous {
                    record.history.insert(pos.min(record.history.len()), old);
                }
            });
            if let Err(rollback) = restored {
                tracing::error!(user, id = %entry.id, error = %rollback, "history index rollback failed");
            }
            return Err(err);
        }
        tracing::info!(user, id = %entry.id, "session saved");
        Ok(entry.id)
    }

    /// Index an entry without a snapshot under a fresh id
    ///
    /// # Errors
    /// `UnknownUser` or a storage failure.
    pub fn archive(&self, user: &str, title: &str) -> Result<String, StoreError> {
        let updated_at = now_minutes();
        let id = self.users.update_user(user, |record| {
            let id = allocate_id(&record.history);
            record.history.insert(
                0,
                HistoryEntry {
                    id: id.clone(),
                    title: format!("📅 {updated_at} | {title}"),
                    file_path: String::new(),
                    updated_at,
                },
            );
            id
        })?;
        tracing::info!(user, id = %id, "session archived");
        Ok(id)
    }

    /// Index of a user's saved sessions, newest first
    ///
    /// # Errors
    /// `UnknownUser` or a read failure.
    pub fn list(&self, user: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        self.users
            .get(user)?
            .map(|record| record.history)
            .ok_or_else(|| StoreError::UnknownUser(user.to_string()))
    }

    /// Restore a saved session
    ///
    /// `Ok(None)` when the id is not indexed, has no snapshot or the
    /// snapshot file is gone.
    ///
    /// # Errors
    /// The snapshot exists but cannot be read or parsed.
    pub fn load_session(&self, user: &str, id: &str) -> Result<Option<WorkflowSession>, StoreError> {
        let Some(record) = self.users.get(user)? else {
            return Ok(None);
        };
        let Some(entry) = record.history.into_iter().find(|e| e.id == id) else {
            return Ok(None);
        };
        if entry.file_path.is_empty() {
            return Ok(None);
        }
        let session = read_json(std::path::Path::new(&entry.file_path))?;
        if session.is_none() {
            tracing::warn!(user, id, path = %entry.file_path, "history snapshot missing");
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_task() {
        assert_eq!(session_title(Some("风险预测"), "七月的风险预测"), "风险预测");
        assert_eq!(
            session_title(None, "请帮我分析一下七月份的注水情况"),
            "请帮我分析一下七月份..."
        );
        assert_eq!(session_title(Some(""), "  "), "未命名会话");
    }

    #[test]
    fn allocated_ids_skip_taken_ones() {
        let entry = |id: &str| HistoryEntry {
            id: id.to_string(),
            title: String::new(),
            file_path: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(id_after(&[], 1_700_000_000), "1700000000");
        let taken = [entry("1700000000"), entry("1700000000-1")];
        assert_eq!(id_after(&taken[..1], 1_700_000_000), "1700000000-1");
        assert_eq!(id_after(&taken, 1_700_000_000), "1700000000-2");
    }

    #[test]
    fn archive_entries_have_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let users = Arc::new(UserStore::open(&config).unwrap());
        let history = HistoryStore::new(users, config);

        let id = history.archive("user", "注水调配").unwrap();
        let entries = history.list("user").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].title.ends_with("| 注水调配"));
        assert!(entries[0].file_path.is_empty());
        assert!(history.load_session("user", &id).unwrap().is_none());

        let second = history.archive("user", "注水调配").unwrap();
        assert_ne!(second, id);
        assert_eq!(history.list("user").unwrap().len(), 2);
        assert!(matches!(
            history.archive("ghost", "x"),
            Err(StoreError::UnknownUser(_))
        ));
    }
}
