//! User accounts and per-user model state

use crate::atomic::JsonFile;
use crate::config::StoreConfig;
use crate::error::{RegistrationError, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wellflow_core::{ModelKey, ModelStateStore, ModelStatus, PersistenceError};

/// Built-in manager account
pub const ADMIN_USER: &str = "mr.gong";
const ADMIN_PASSWORD: &str = "123456";
const DEMO_USER: &str = "user";
const DEMO_PASSWORD: &str = "123";
const RESERVED_NAME: &str = "mr.wang";

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Reviews approvals
    Admin,
    /// Runs workflows
    #[default]
    User,
}

/// Index entry of a saved session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Session id
    pub id: String,
    /// Display title
    pub title: String,
    /// Snapshot file; empty for archive-only entries
    #[serde(default)]
    pub file_path: String,
    /// Last save time (`%Y-%m-%d %H:%M`)
    #[serde(default)]
    pub updated_at: String,
}

/// One account
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRecord {
    /// Plain-text password
    pub password: String,
    /// Role
    #[serde(default)]
    pub role: Role,
    /// Model key to status
    #[serde(default)]
    pub model_states: BTreeMap<String, ModelStatus>,
    /// Model key to saved version
    #[serde(default)]
    pub model_versions: BTreeMap<String, u32>,
    /// Saved sessions, newest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Private model directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

impl UserRecord {
    fn new(password: impl Into<String>, role: Role) -> Self {
        Self {
            password: password.into(),
            role,
            ..Self::default()
        }
    }
}

pub(crate) type Users = BTreeMap<String, UserRecord>;

/// `users.json`
pub struct UserStore {
    file: JsonFile<Users>,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("path", &self.file.path())
            .finish()
    }
}

impl UserStore {
    /// Open the user file, seeding the built-in accounts
    ///
    /// An existing file keeps its accounts; the manager account is added
    /// when missing and absent fields are filled with defaults.
    ///
    /// # Errors
    /// The file cannot be read, parsed or written.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self {
            file: JsonFile::new(config.users_path()),
        };
        let existed = config.users_path().exists();
        store.file.update(|users| {
            if !existed {
                users.insert(
                    DEMO_USER.to_string(),
                    UserRecord::new(DEMO_PASSWORD, Role::User),
                );
            }
            users
                .entry(ADMIN_USER.to_string())
                .or_insert_with(|| UserRecord::new(ADMIN_PASSWORD, Role::Admin));
            Ok(())
        })?;
        tracing::debug!(path = %store.file.path().display(), "user store opened");
        Ok(store)
    }

    /// Create an account with the user role
    ///
    /// # Errors
    /// `StoreError::Registration` for reserved, duplicate or empty names.
    pub fn register(&self, user: &str, password: &str) -> Result<(), StoreError> {
        let user = user.trim();
        if user.is_empty() || password.is_empty() {
            return Err(RegistrationError::EmptyCredentials.into());
        }
        if user == RESERVED_NAME || user.contains("admin") {
            return Err(RegistrationError::Reserved(user.to_string()).into());
        }
        self.file.update(|users| {
            if users.contains_key(user) {
                return Err(RegistrationError::AlreadyExists(user.to_string()).into());
            }
            let mut record = UserRecord::new(password, Role::User);
            record.model_path = Some(format!("/usr/local/ai_models/{user}/"));
            users.insert(user.to_string(), record);
            Ok(())
        })?;
        tracing::info!(user, "user registered");
        Ok(())
    }

    /// Check credentials and return the role
    ///
    /// # Errors
    /// `StoreError::InvalidCredentials` on unknown user or wrong password.
    pub fn authenticate(&self, user: &str, password: &str) -> Result<Role, StoreError> {
        let users = self.file.read()?;
        match users.get(user) {
            Some(record) if record.password == password => Ok(record.role),
            _ => {
                tracing::warn!(user, "authentication failed");
                Err(StoreError::InvalidCredentials)
            }
        }
    }

    /// Record of one user
    ///
    /// # Errors
    /// Read failure.
    pub fn get(&self, user: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.file.read()?.remove(user))
    }

    /// All user names, sorted
    ///
    /// # Errors
    /// Read failure.
    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.file.read()?.into_keys().collect())
    }

    /// Saved version of a private model, 0 when never versioned
    ///
    /// # Errors
    /// Read failure.
    pub fn model_version(&self, user: &str, key: ModelKey) -> Result<u32, StoreError> {
        Ok(self
            .file
            .read()?
            .get(user)
            .and_then(|r| r.model_versions.get(key.as_str()).copied())
            .unwrap_or(0))
    }

    /// Mutate one existing user record
    pub(crate) fn update_user<R>(
        &self,
        user: &str,
        f: impl FnOnce(&mut UserRecord) -> R,
    ) -> Result<R, StoreError> {
        self.file.update(|users| {
            let record = users
                .get_mut(user)
                .ok_or_else(|| StoreError::UnknownUser(user.to_string()))?;
            Ok(f(record))
        })
    }
}

impl ModelStateStore for UserStore {
    fn model_status(&self, user: &str, key: ModelKey) -> Result<ModelStatus, PersistenceError> {
        let users = self.file.read()?;
        Ok(users
            .get(user)
            .and_then(|r| r.model_states.get(key.as_str()).copied())
            .unwrap_or_default())
    }

    fn save_private(&self, user: &str, key: ModelKey) -> Result<(), PersistenceError> {
        self.update_user(user, |record| {
            record
                .model_states
                .insert(key.as_str().to_string(), ModelStatus::Private);
        })?;
        tracing::info!(user, model = key.as_str(), "model saved to private library");
        Ok(())
    }

    fn bump_version(&self, user: &str, key: ModelKey) -> Result<u32, PersistenceError> {
        let version = self.update_user(user, |record| {
            let version = record
                .model_versions
                .entry(key.as_str().to_string())
                .or_insert(0);
            *version += 1;
            *version
        })?;
        tracing::info!(user, model = key.as_str(), version, "model version bumped");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn open() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(&StoreConfig::new(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn seeds_builtin_accounts() {
        let (_dir, store) = open();
        assert_eq!(store.names().unwrap(), vec!["mr.gong", "user"]);
        assert_eq!(store.authenticate("mr.gong", "123456").unwrap(), Role::Admin);
        assert_eq!(store.authenticate("user", "123").unwrap(), Role::User);
        assert!(matches!(
            store.authenticate("user", "nope"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn reopening_adds_missing_manager_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("users.json"),
            r#"{"alice": {"password": "pw", "role": "user"}}"#,
        )
        .unwrap();
        let store = UserStore::open(&StoreConfig::new(dir.path())).unwrap();
        assert_eq!(store.names().unwrap(), vec!["alice", "mr.gong"]);
        let alice = store.get("alice").unwrap().unwrap();
        assert!(alice.model_states.is_empty());
        assert!(alice.history.is_empty());
    }

    #[test]
    fn registration_rules() {
        let (_dir, store) = open();
        store.register("alice", "pw").unwrap();
        assert_eq!(
            store.get("alice").unwrap().unwrap().model_path.as_deref(),
            Some("/usr/local/ai_models/alice/")
        );

        for (name, password) in [("mr.wang", "x"), ("myadmin", "x")] {
            assert!(matches!(
                store.register(name, password),
                Err(StoreError::Registration(RegistrationError::Reserved(_)))
            ));
        }
        assert!(matches!(
            store.register("alice", "other"),
            Err(StoreError::Registration(RegistrationError::AlreadyExists(_)))
        ));
        assert!(matches!(
            store.register("bob", ""),
            Err(StoreError::Registration(RegistrationError::EmptyCredentials))
        ));
    }

    #[test]
    fn model_state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let store = UserStore::open(&config).unwrap();
        assert_eq!(
            store.model_status("user", ModelKey::Risk).unwrap(),
            ModelStatus::Untrained
        );
        store.save_private("user", ModelKey::Risk).unwrap();
        assert_eq!(store.bump_version("user", ModelKey::Risk).unwrap(), 1);
        assert_eq!(store.bump_version("user", ModelKey::Risk).unwrap(), 2);

        let reopened = UserStore::open(&config).unwrap();
        assert_eq!(
            reopened.model_status("user", ModelKey::Risk).unwrap(),
            ModelStatus::Private
        );
        assert_eq!(reopened.model_version("user", ModelKey::Risk).unwrap(), 2);
        assert_eq!(reopened.model_version("user", ModelKey::Trend).unwrap(), 0);
    }

    #[test]
    fn unknown_user_reads_untrained_but_cannot_save() {
        let (_dir, store) = open();
        assert_eq!(
            store.model_status("ghost", ModelKey::Water).unwrap(),
            ModelStatus::Untrained
        );
        assert_eq!(
            store.save_private("ghost", ModelKey::Water),
            Err(PersistenceError::UnknownUser("ghost".into()))
        );
    }
}
