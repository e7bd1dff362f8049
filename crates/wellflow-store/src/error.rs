//! Error types for WellFlow stores

use std::path::PathBuf;
use wellflow_core::PersistenceError;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or replacing a file failed
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A store file is not valid JSON for its schema
    #[error("malformed store file {path}: {source}")]
    Json {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// No such user
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// No such approval record
    #[error("unknown report: {0}")]
    UnknownReport(String),

    /// The record was already reviewed
    #[error("report {0} is not pending")]
    NotPending(String),

    /// Registration refused
    #[error("registration refused: {0}")]
    Registration(#[from] RegistrationError),

    /// Wrong user name or password
    #[error("invalid user name or password")]
    InvalidCredentials,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if the error comes from the file system rather than the caller
    #[inline]
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Json { .. })
    }
}

/// Why a registration was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Management account names cannot be self-registered
    #[error("management account {0} cannot be registered")]
    Reserved(String),

    /// Name taken
    #[error("user {0} already exists")]
    AlreadyExists(String),

    /// Empty user name or password
    #[error("user name and password are required")]
    EmptyCredentials,
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(user) => PersistenceError::UnknownUser(user),
            other => PersistenceError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_persistence_error() {
        let err: PersistenceError = StoreError::UnknownUser("bob".into()).into();
        assert_eq!(err, PersistenceError::UnknownUser("bob".into()));

        let io = StoreError::io("users.json", std::io::Error::other("disk full"));
        assert!(io.is_storage_failure());
        let err: PersistenceError = io.into();
        assert!(matches!(err, PersistenceError::Unavailable(ref m) if m.contains("disk full")));
    }
}
