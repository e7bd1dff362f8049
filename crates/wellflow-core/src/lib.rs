//! WellFlow Core - analysis workflow orchestration
//!
//! The sequencing heart of the oil-production assistant:
//! - Plans a free-text request into an ordered list of analysis steps
//! - Drives the steps one at a time with human-in-the-loop checkpoints
//! - Gates the three algorithm steps on per-user model training state
//! - Reaches persistence only through the [`ModelStateStore`] and
//!   [`ApprovalSink`] seams
//!
//! # Example
//!
//! ```rust,ignore
//! use wellflow_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(registry: StepRegistry) -> Result<(), EngineError> {
//! let gate = ModelGate::new(Arc::new(MemoryModelStore::new()));
//! let engine = WorkflowEngine::new(Arc::new(registry), Arc::new(gate));
//!
//! let mut session = engine.start("user", "七月的风险预测")?;
//! let report = engine.process(&mut session).await?;
//! println!("stopped at step {}", report.current_step_index);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod engine;
pub mod error;
pub mod gate;
pub mod library;
pub mod persistence;
pub mod planner;
pub mod registry;
pub mod types;

pub use engine::{
    BlockReason, EngineConfig, ProcessReport, RenderedStep, StepOutcome, StepProgress,
    WorkflowEngine, WorkflowSession, DEFAULT_SUMMARY,
};
pub use error::{EngineError, GateError, PersistenceError, RegistryError, StepError};
pub use gate::{
    EpisodePhase, GateAction, GateConfig, GateDecision, GatePrompt, GateView, ModelGate,
    PrivateMode, TrainingEpisode,
};
pub use library::{LibraryCatalog, LibraryEntry, ModelLibrary, TrainingCenter, TuneReport};
pub use persistence::{
    ApprovalRecord, ApprovalSink, ApprovalStatus, MemoryApprovalSink, MemoryModelStore,
    ModelStateStore,
};
pub use planner::{Plan, WorkflowPlanner};
pub use registry::{StepHandler, StepRegistry, StepScope};
pub use types::{
    keys, ModelKey, ModelStatus, StepCategory, StepFailure, StepId, TaskKind, WorkflowContext,
    WorkflowDefinition, WorkflowState,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with WellFlow Core
    pub use crate::{
        keys, ApprovalRecord, ApprovalSink, EngineError, GateAction, GateDecision, MemoryModelStore,
        ModelGate, ModelKey, ModelStateStore, PrivateMode, StepError, StepHandler, StepId,
        StepOutcome, StepRegistry, StepScope, WorkflowContext, WorkflowEngine, WorkflowSession,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
