//! Workflow engine
//!
//! Drives one [`WorkflowSession`] through its steps. The engine is safe to
//! call repeatedly: execute operations run once per step index, gate
//! readiness lives in the session's [`TrainingEpisode`]s, and nothing
//! advances without the step's advance rule being met.
//!
//! # Advance rules
//!
//! - gated steps advance once their episode is ready
//! - the data-load step advances on [`WorkflowEngine::confirm_data_load`]
//! - every other step advances after rendering and a short display delay

use crate::error::{EngineError, StepError};
use crate::gate::{GateAction, GatePrompt, GateView, ModelGate, TrainingEpisode};
use crate::planner::WorkflowPlanner;
use crate::registry::{GateAccess, StepHandler, StepRegistry, StepScope};
use crate::types::{
    StepCategory, StepFailure, StepId, WorkflowContext, WorkflowDefinition, WorkflowState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Fallback conclusion when no algorithm summary was produced
pub const DEFAULT_SUMMARY: &str = "分析完成。";

/// Engine timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause after rendering an auto-advancing step
    #[serde(with = "crate::gate::millis")]
    pub display_delay: Duration,
    /// Simulated work before a step's execute operation
    #[serde(with = "crate::gate::millis")]
    pub execute_delay: Duration,
}

impl EngineConfig {
    /// No simulated waiting at all
    #[inline]
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            display_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
        }
    }

    /// With display delay
    #[inline]
    #[must_use]
    pub fn with_display_delay(mut self, delay: Duration) -> Self {
        self.display_delay = delay;
        self
    }

    /// With execute delay
    #[inline]
    #[must_use]
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            display_delay: Duration::from_millis(800),
            execute_delay: Duration::from_millis(500),
        }
    }
}

/// Output of one step, kept for display and replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedStep {
    /// Step index
    pub index: usize,
    /// Step id
    pub step: StepId,
    /// Whether the step revealed its output on the last render
    pub visible: bool,
    /// Status string returned by the execute operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Lines from the last render
    #[serde(default)]
    pub lines: Vec<String>,
}

impl RenderedStep {
    fn new(index: usize, step: StepId) -> Self {
        Self {
            index,
            step,
            visible: false,
            status: None,
            lines: Vec::new(),
        }
    }
}

/// Position of a step relative to the active one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepProgress {
    /// Already passed
    Done,
    /// The active step
    Active,
    /// Not reached yet
    Pending,
}

/// One active workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    user: String,
    request: String,
    definition: WorkflowDefinition,
    context: WorkflowContext,
    state: WorkflowState,
    #[serde(default)]
    episodes: BTreeMap<usize, TrainingEpisode>,
    #[serde(default)]
    rendered: BTreeMap<usize, RenderedStep>,
}

impl WorkflowSession {
    /// User who owns the session
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Original request text
    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Planned steps
    #[must_use]
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Shared context
    #[must_use]
    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    /// Progress state
    #[must_use]
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Whether the workflow finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// The active step, if the workflow is not finished
    #[must_use]
    pub fn active_step(&self) -> Option<StepId> {
        if self.state.is_finished() {
            return None;
        }
        self.definition.get(self.state.current_step_index())
    }

    /// Gate episode of a step index
    #[must_use]
    pub fn episode(&self, index: usize) -> Option<&TrainingEpisode> {
        self.episodes.get(&index)
    }

    /// Last output of a step index
    #[must_use]
    pub fn rendered(&self, index: usize) -> Option<&RenderedStep> {
        self.rendered.get(&index)
    }

    /// Outputs of every step rendered so far, in order
    #[must_use]
    pub fn rendered_steps(&self) -> Vec<RenderedStep> {
        self.rendered.values().cloned().collect()
    }

    /// Done / active / pending marker per step
    #[must_use]
    pub fn progress(&self) -> Vec<(StepId, StepProgress)> {
        let current = self.state.current_step_index();
        let finished = self.state.is_finished();
        self.definition
            .iter()
            .map(|(index, step)| {
                let progress = if finished || index < current {
                    StepProgress::Done
                } else if index == current {
                    StepProgress::Active
                } else {
                    StepProgress::Pending
                };
                (step, progress)
            })
            .collect()
    }

    /// Closing message of a finished workflow
    #[must_use]
    pub fn final_summary(&self) -> Option<String> {
        if !self.state.is_finished() {
            return None;
        }
        let task = self.context.task_name().unwrap_or_default();
        let summary = self.context.summary().unwrap_or(DEFAULT_SUMMARY);
        Some(format!(
            "**{task}** 执行完成。\n\n📊 **核心结论**: {summary}\n\n详细过程请查看上方折叠面板。"
        ))
    }
}

/// Why the engine stopped at a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Data-load step waiting for confirmation
    AwaitingConfirm,
    /// Gated step waiting on the model gate
    AwaitingGate(GatePrompt),
}

/// Result of one engine tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The step at `index` was passed
    Advanced {
        /// Passed step index
        index: usize,
    },
    /// The step at `index` is waiting for the user
    Blocked {
        /// Active step index
        index: usize,
        /// What it waits for
        reason: BlockReason,
    },
    /// The workflow halted on a failed step
    Failed(StepFailure),
    /// Every step has been passed
    Finished,
}

/// Result of [`WorkflowEngine::process`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Where processing stopped
    pub outcome: StepOutcome,
    /// Active step index afterwards
    pub current_step_index: usize,
    /// Whether the workflow is finished
    pub is_finished: bool,
    /// Output of every rendered step
    pub rendered: Vec<RenderedStep>,
}

/// Orchestrator of workflow sessions
pub struct WorkflowEngine {
    planner: WorkflowPlanner,
    registry: Arc<StepRegistry>,
    gate: Arc<ModelGate>,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("gate", &self.gate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Create an engine with default timing
    #[must_use]
    pub fn new(registry: Arc<StepRegistry>, gate: Arc<ModelGate>) -> Self {
        Self::with_config(registry, gate, EngineConfig::default())
    }

    /// Create an engine with custom timing
    #[must_use]
    pub fn with_config(
        registry: Arc<StepRegistry>,
        gate: Arc<ModelGate>,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner: WorkflowPlanner::new(),
            registry,
            gate,
            config,
        }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Step registry
    #[must_use]
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Plan a request into a fresh session
    ///
    /// # Errors
    /// `EngineError::Registry` when a planned step has no handler.
    pub fn start(&self, user: &str, request: &str) -> Result<WorkflowSession, EngineError> {
        let plan = self.planner.plan(request);
        self.registry.validate(&plan.definition)?;

        tracing::info!(
            user,
            task = %plan.task,
            month = plan.month,
            steps = plan.definition.len(),
            "workflow started"
        );

        Ok(WorkflowSession {
            user: user.to_string(),
            request: request.to_string(),
            definition: plan.definition,
            context: plan.context,
            state: WorkflowState::new(),
            episodes: BTreeMap::new(),
            rendered: BTreeMap::new(),
        })
    }

    /// Run and render the active step once, advancing if its rule is met
    ///
    /// # Errors
    /// `EngineError::Registry` if the active step lost its handler. Step
    /// failures are not errors: they halt the session and are reported as
    /// [`StepOutcome::Failed`].
    pub async fn tick(&self, session: &mut WorkflowSession) -> Result<StepOutcome, EngineError> {
        if session.state.is_finished() {
            return Ok(StepOutcome::Finished);
        }
        if let Some(failure) = session.state.failure() {
            return Ok(StepOutcome::Failed(failure.clone()));
        }

        let index = session.state.current_step_index();
        let Some(step) = session.definition.get(index) else {
            session.state.finish_if_complete(session.definition.len());
            return Ok(StepOutcome::Finished);
        };
        let handler = self.registry.get(step)?;

        let run_execute = !session.state.run_completed(index);
        if run_execute && !self.config.execute_delay.is_zero() {
            tokio::time::sleep(self.config.execute_delay).await;
        }

        let view = match self
            .run_step(session, index, step, handler.as_ref(), run_execute, false)
            .await
        {
            Ok(view) => view,
            Err(err) => {
                let failure = StepFailure {
                    index,
                    step,
                    message: err.to_string(),
                };
                tracing::error!(index, step = %step, error = %err, "step failed, workflow halted");
                session.state.halt(failure.clone());
                return Ok(StepOutcome::Failed(failure));
            }
        };
        if run_execute {
            session.state.mark_run_completed(index);
        }

        match step.category() {
            StepCategory::Gated(_) => {
                let ready = session.episodes.get(&index).is_some_and(|ep| ep.ready);
                if !ready {
                    let prompt = view.map_or(GatePrompt::AwaitTraining, |v| v.prompt);
                    return Ok(StepOutcome::Blocked {
                        index,
                        reason: BlockReason::AwaitingGate(prompt),
                    });
                }
            }
            StepCategory::DataLoad => {
                return Ok(StepOutcome::Blocked {
                    index,
                    reason: BlockReason::AwaitingConfirm,
                });
            }
            StepCategory::Auto => {
                if !self.config.display_delay.is_zero() {
                    tokio::time::sleep(self.config.display_delay).await;
                }
            }
        }

        self.advance(session, index, step);
        Ok(StepOutcome::Advanced { index })
    }

    /// Drive the session until it blocks, fails or finishes
    ///
    /// A finished session is replayed instead: every step is rendered
    /// read-only and no execute operation runs.
    ///
    /// # Errors
    /// Registry lookups only; see [`WorkflowEngine::tick`].
    pub async fn process(&self, session: &mut WorkflowSession) -> Result<ProcessReport, EngineError> {
        if session.state.is_finished() {
            self.replay(session).await?;
            return Ok(report(session, StepOutcome::Finished));
        }

        let outcome = loop {
            match self.tick(session).await? {
                StepOutcome::Advanced { .. } => {}
                other => break other,
            }
        };
        Ok(report(session, outcome))
    }

    /// Confirm the loaded data and leave the data-load step
    ///
    /// # Errors
    /// `Finished`, `Halted`, or `NotAwaiting` when the active step is not a
    /// data-load step whose execute operation already ran.
    pub fn confirm_data_load(&self, session: &mut WorkflowSession) -> Result<StepOutcome, EngineError> {
        let (index, step) = active(session)?;
        if step.category() != StepCategory::DataLoad || !session.state.run_completed(index) {
            return Err(EngineError::NotAwaiting {
                index,
                step,
                expected: "data-load confirmation",
            });
        }
        self.advance(session, index, step);
        Ok(StepOutcome::Advanced { index })
    }

    /// Forward a user action to the gate of the active step
    ///
    /// The engine does not advance here; the next [`process`] call does.
    ///
    /// # Errors
    /// `Finished`, `Halted`, `NotAwaiting` for non-gated steps, and
    /// `Gate` for rejected actions.
    ///
    /// [`process`]: WorkflowEngine::process
    pub async fn gate_action(
        &self,
        session: &mut WorkflowSession,
        action: GateAction,
    ) -> Result<GateView, EngineError> {
        let (index, step) = active(session)?;
        if !step.is_gated() {
            return Err(EngineError::NotAwaiting {
                index,
                step,
                expected: "gate action",
            });
        }
        let episode = session.episodes.entry(index).or_default();
        match self
            .gate
            .apply(&session.user, step, episode, action, false)
            .await
        {
            Ok(view) => Ok(view),
            Err(err) => {
                tracing::warn!(index, step = %step, error = %err, "gate action rejected");
                Err(err.into())
            }
        }
    }

    async fn replay(&self, session: &mut WorkflowSession) -> Result<(), EngineError> {
        let steps: Vec<_> = session.definition.iter().collect();
        for (index, step) in steps {
            let handler = self.registry.get(step)?;
            if let Err(err) = self
                .run_step(session, index, step, handler.as_ref(), false, true)
                .await
            {
                tracing::warn!(index, step = %step, error = %err, "replay render failed");
                if let Some(rendered) = session.rendered.get_mut(&index) {
                    rendered.lines.push(format!("执行出错: {err}"));
                }
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        session: &mut WorkflowSession,
        index: usize,
        step: StepId,
        handler: &dyn StepHandler,
        run_execute: bool,
        replay: bool,
    ) -> Result<Option<GateView>, StepError> {
        let finished = session.state.is_finished();
        let rendered = session
            .rendered
            .entry(index)
            .or_insert_with(|| RenderedStep::new(index, step));
        rendered.lines.clear();

        let gate = if step.is_gated() {
            Some(GateAccess {
                gate: self.gate.as_ref(),
                episode: session.episodes.entry(index).or_default(),
                finished,
            })
        } else {
            None
        };

        let mut scope = StepScope::new(
            &session.user,
            step,
            index,
            replay,
            &mut session.context,
            &mut rendered.lines,
            gate,
        );

        let status = if run_execute {
            let status = handler.execute(&mut scope).await?;
            tracing::debug!(index, step = %step, status = %status, "step executed");
            Some(status)
        } else {
            None
        };
        let visible = handler.render(&mut scope).await?;
        let view = scope.take_gate_view();
        drop(scope);

        tracing::debug!(index, step = %step, visible, "step rendered");
        rendered.visible = visible;
        if status.is_some() {
            rendered.status = status;
        }
        Ok(view)
    }

    fn advance(&self, session: &mut WorkflowSession, index: usize, step: StepId) {
        let len = session.definition.len();
        let finished = session.state.advance(len);
        tracing::info!(index, step = %step, "step passed");
        if finished {
            tracing::info!(
                user = %session.user,
                task = session.context.task_name().unwrap_or_default(),
                "workflow finished"
            );
        }
    }
}

fn active(session: &WorkflowSession) -> Result<(usize, StepId), EngineError> {
    if session.state.is_finished() {
        return Err(EngineError::Finished);
    }
    if let Some(failure) = session.state.failure() {
        return Err(EngineError::Halted {
            index: failure.index,
            message: failure.message.clone(),
        });
    }
    let index = session.state.current_step_index();
    let step = session.definition.get(index).ok_or(EngineError::Finished)?;
    Ok((index, step))
}

fn report(session: &WorkflowSession, outcome: StepOutcome) -> ProcessReport {
    ProcessReport {
        outcome,
        current_step_index: session.state.current_step_index(),
        is_finished: session.state.is_finished(),
        rendered: session.rendered_steps(),
    }
}
