//! Step registry
//!
//! Maps step identifiers to handlers. A handler exposes two operations:
//! `execute` runs once per step index and returns an informational status
//! line, `render` runs on every pass and reports whether the step revealed
//! its output. Handlers only talk to each other through the shared
//! [`WorkflowContext`].

use crate::error::{RegistryError, StepError};
use crate::gate::{GateView, ModelGate, TrainingEpisode};
use crate::types::{StepId, WorkflowContext, WorkflowDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// Gate handle lent to a gated step for one render
pub(crate) struct GateAccess<'a> {
    pub(crate) gate: &'a ModelGate,
    pub(crate) episode: &'a mut TrainingEpisode,
    pub(crate) finished: bool,
}

/// Everything a handler may touch while running
pub struct StepScope<'a> {
    user: &'a str,
    step: StepId,
    index: usize,
    replay: bool,
    /// Shared workflow context
    pub context: &'a mut WorkflowContext,
    output: &'a mut Vec<String>,
    gate: Option<GateAccess<'a>>,
    last_view: Option<GateView>,
}

impl<'a> StepScope<'a> {
    pub(crate) fn new(
        user: &'a str,
        step: StepId,
        index: usize,
        replay: bool,
        context: &'a mut WorkflowContext,
        output: &'a mut Vec<String>,
        gate: Option<GateAccess<'a>>,
    ) -> Self {
        Self {
            user,
            step,
            index,
            replay,
            context,
            output,
            gate,
            last_view: None,
        }
    }

    /// Scope without an engine, for driving a handler directly
    #[must_use]
    pub fn detached(
        user: &'a str,
        step: StepId,
        context: &'a mut WorkflowContext,
        output: &'a mut Vec<String>,
    ) -> Self {
        Self::new(user, step, 0, false, context, output, None)
    }

    /// User driving the workflow
    #[inline]
    #[must_use]
    pub fn user(&self) -> &str {
        self.user
    }

    /// The step being run
    #[inline]
    #[must_use]
    pub fn step(&self) -> StepId {
        self.step
    }

    /// Index of the step in the workflow
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this is a read-only replay of a finished workflow
    #[inline]
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Append one line of user-facing output
    pub fn emit(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    /// Lines emitted so far
    #[must_use]
    pub fn lines(&self) -> &[String] {
        self.output
    }

    /// Ask the model gate whether this step may reveal its output
    ///
    /// The gate's notes are emitted before returning.
    ///
    /// # Errors
    /// Fails with `GateError::NotGated` when the step has no gate access.
    pub async fn consult_gate(&mut self) -> Result<GateView, StepError> {
        let step = self.step;
        let access = self
            .gate
            .as_mut()
            .ok_or(crate::error::GateError::NotGated(step))?;
        let view = access
            .gate
            .evaluate(self.user, step, access.episode, access.finished)
            .await?;
        self.output.extend(view.notes.iter().cloned());
        self.last_view = Some(view.clone());
        Ok(view)
    }

    /// Last gate view obtained by this scope
    #[must_use]
    pub fn gate_view(&self) -> Option<&GateView> {
        self.last_view.as_ref()
    }

    pub(crate) fn take_gate_view(&mut self) -> Option<GateView> {
        self.last_view.take()
    }
}

/// A pluggable workflow step
#[async_trait::async_trait]
pub trait StepHandler: Send + Sync {
    /// Identifier this handler serves
    fn id(&self) -> StepId;

    /// Side-effecting run; called at most once per step index
    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError>;

    /// Produce output; returns whether it was revealed
    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError>;
}

/// Registration-time mapping from step id to handler
#[derive(Default, Clone)]
pub struct StepRegistry {
    handlers: HashMap<StepId, Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.ids())
            .finish()
    }
}

impl StepRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own id, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> &mut Self {
        let id = handler.id();
        if self.handlers.insert(id, handler).is_some() {
            tracing::warn!(step = %id, "replaced step handler");
        }
        self
    }

    /// Handler for a step
    ///
    /// # Errors
    /// `RegistryError::UnknownStep` when nothing is registered.
    pub fn get(&self, step: StepId) -> Result<Arc<dyn StepHandler>, RegistryError> {
        self.handlers
            .get(&step)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStep(step.as_str().to_string()))
    }

    /// Handler for a string identifier
    ///
    /// # Errors
    /// `RegistryError::UnknownStep` for unknown or unregistered ids.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn StepHandler>, RegistryError> {
        let step: StepId = id.parse()?;
        self.get(step)
    }

    /// Whether a handler is registered
    #[must_use]
    pub fn contains(&self, step: StepId) -> bool {
        self.handlers.contains_key(&step)
    }

    /// Number of handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<StepId> {
        let mut ids: Vec<_> = self.handlers.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Check that every step of a definition has a handler
    ///
    /// # Errors
    /// The first missing step.
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<(), RegistryError> {
        for (_, step) in definition.iter() {
            self.get(step)?;
        }
        Ok(())
    }
}
