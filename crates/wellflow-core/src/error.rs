//! Error types for WellFlow core
//!
//! Provides error handling for:
//! - Unknown step identifiers
//! - Step execute/render failures
//! - Model gate decisions made out of phase
//! - Persistence collaborators
//! - Engine actions that do not match the active step

use crate::gate::EpisodePhase;
use crate::types::StepId;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Step lookup failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Gate rejected an action
    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    /// The workflow is finished and read-only
    #[error("workflow already finished")]
    Finished,

    /// The workflow halted on a failed step and must be restarted
    #[error("workflow halted at step {index}: {message}")]
    Halted {
        /// Index of the failed step
        index: usize,
        /// Failure message
        message: String,
    },

    /// An action was sent to a step that is not waiting for it
    #[error("step {index} ({step}) is not awaiting {expected}")]
    NotAwaiting {
        /// Active step index
        index: usize,
        /// Active step
        step: StepId,
        /// What the caller tried to deliver
        expected: &'static str,
    },
}

impl EngineError {
    /// Check if the caller can keep using the same session
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Halted { .. } | Self::Registry(_))
    }
}

/// Step registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No handler registered under this identifier
    #[error("unknown step: {0}")]
    UnknownStep(String),
}

/// Failure raised by a step handler
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Generic step failure
    #[error("{0}")]
    Failed(String),

    /// Gate access failed
    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    /// A collaborator store failed
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Context value could not be (de)serialized
    #[error("context error: {0}")]
    Context(#[from] serde_json::Error),
}

impl StepError {
    /// Create a generic failure
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Model gate errors
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The step has no model and is never gated
    #[error("step {0} is not gated")]
    NotGated(StepId),

    /// The action does not apply to the episode's current phase
    #[error("cannot {action} while {phase:?}")]
    OutOfPhase {
        /// Attempted action
        action: &'static str,
        /// Current episode phase
        phase: EpisodePhase,
    },

    /// The action belongs to the other model-status branch
    #[error("cannot {action} for a {branch} model")]
    WrongBranch {
        /// Attempted action
        action: &'static str,
        /// Branch name
        branch: &'static str,
    },

    /// Readiness was already granted for this step
    #[error("decision already recorded")]
    AlreadyDecided,

    /// Finished workflows are replayed read-only
    #[error("workflow is finished; history replay is read-only")]
    ReadOnly,

    /// Persisting the decision failed
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl GateError {
    /// Check if the error is a user sending the wrong decision
    #[inline]
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfPhase { .. } | Self::WrongBranch { .. } | Self::AlreadyDecided | Self::ReadOnly
        )
    }
}

/// Failure reported by a persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// No such user in the store
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Store could not be read or written
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_is_not_recoverable() {
        let err = EngineError::Halted {
            index: 2,
            message: "boom".to_string(),
        };
        assert!(!err.is_recoverable());
        assert!(EngineError::Finished.is_recoverable());
    }

    #[test]
    fn gate_user_errors() {
        assert!(GateError::AlreadyDecided.is_user_error());
        assert!(GateError::ReadOnly.is_user_error());
        let err = GateError::Persistence(PersistenceError::Unavailable("disk".into()));
        assert!(!err.is_user_error());
    }

    #[test]
    fn step_error_from_persistence() {
        let err: StepError = PersistenceError::UnknownUser("bob".into()).into();
        assert_eq!(err.to_string(), "persistence error: unknown user: bob");
    }
}
