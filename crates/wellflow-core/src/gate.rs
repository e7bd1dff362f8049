//! Model gate
//!
//! Decides whether a gated algorithm step may reveal its output and when it
//! is ready to let the engine advance. The decision depends on the user's
//! persisted model status (read once per episode) and on the session-only
//! [`TrainingEpisode`] of that step.
//!
//! # Protocol
//!
//! | branch    | phase / mode                       | visible | ready |
//! |-----------|------------------------------------|---------|-------|
//! | any       | workflow finished (replay)         | yes     | -     |
//! | untrained | awaiting data / running            | no      | no    |
//! | untrained | awaiting decision                  | yes     | no    |
//! | private   | no mode chosen                     | no      | no    |
//! | private   | direct (after one-shot inference)  | yes     | yes   |
//! | private   | fine-tune, awaiting data / running | no      | no    |
//! | private   | fine-tune, awaiting decision       | yes     | no    |
//! | any       | decision recorded                  | yes     | yes   |

use crate::error::GateError;
use crate::persistence::ModelStateStore;
use crate::types::{ModelKey, ModelStatus, StepId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Simulated durations of gate activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// First-time training run
    #[serde(with = "millis")]
    pub training_delay: Duration,
    /// Incremental fine-tune run
    #[serde(with = "millis")]
    pub fine_tune_delay: Duration,
    /// Direct inference with a private model
    #[serde(with = "millis")]
    pub inference_delay: Duration,
}

impl GateConfig {
    /// Configuration without any simulated waiting
    #[inline]
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            training_delay: Duration::ZERO,
            fine_tune_delay: Duration::ZERO,
            inference_delay: Duration::ZERO,
        }
    }

    /// With training delay
    #[inline]
    #[must_use]
    pub fn with_training_delay(mut self, delay: Duration) -> Self {
        self.training_delay = delay;
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            training_delay: Duration::from_secs(2),
            fine_tune_delay: Duration::from_secs(3),
            inference_delay: Duration::from_millis(1500),
        }
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Phase of a training or fine-tuning episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodePhase {
    /// Waiting for the user to start a run
    #[default]
    AwaitingData,
    /// Simulated run in progress
    Running,
    /// Run finished, waiting for save / discard
    AwaitingDecision,
    /// Decision recorded
    Done,
}

/// How a private model is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateMode {
    /// Incrementally fine-tune before use
    FineTune,
    /// Use the saved weights as they are
    Direct,
}

/// Explicit user decision that grants readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Keep the freshly trained model in the private library
    SavePrivate,
    /// Continue with the trained model without saving it
    UseOnce,
    /// Keep the fine-tuned weights as a new version
    SaveVersion,
    /// Throw the fine-tuned weights away
    Discard,
}

/// Action a user can send to the gate of the active step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateAction {
    /// Start first-time training, optionally on an uploaded dataset
    Train {
        /// Uploaded dataset name
        dataset: Option<String>,
    },
    /// Pick how a private model is used
    ChooseMode {
        /// Selected mode
        mode: PrivateMode,
    },
    /// Start fine-tuning, optionally on an uploaded dataset
    StartFineTune {
        /// Uploaded dataset name
        dataset: Option<String>,
    },
    /// Record the final decision
    Decide {
        /// The decision
        decision: GateDecision,
    },
}

impl GateAction {
    fn name(&self) -> &'static str {
        match self {
            GateAction::Train { .. } => "train",
            GateAction::ChooseMode { .. } => "choose a mode",
            GateAction::StartFineTune { .. } => "start fine-tuning",
            GateAction::Decide { .. } => "decide",
        }
    }
}

/// Session-only gate state of one gated step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingEpisode {
    /// Model status observed when the episode started
    pub branch: Option<ModelStatus>,
    /// Current phase
    pub phase: EpisodePhase,
    /// Private-model mode, once chosen
    pub mode: Option<PrivateMode>,
    /// Dataset supplied to the last run
    pub dataset: Option<String>,
    /// Whether the direct-mode inference already ran
    pub inference_done: bool,
    /// Accuracy (training) or accuracy gain (fine-tune) of the last run
    pub metric: Option<f64>,
    /// Recorded decision
    pub decision: Option<GateDecision>,
    /// Readiness; never revoked once set
    pub ready: bool,
}

/// What the gate is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePrompt {
    /// Finished workflow replay, nothing to ask
    Replay,
    /// Start a first-time training run
    AwaitTraining,
    /// Choose fine-tune or direct use
    AwaitMode,
    /// Start the fine-tune run
    AwaitFineTune,
    /// Save or discard the run
    AwaitDecision,
    /// Ready to advance
    Ready,
}

/// Result of evaluating the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateView {
    /// Whether the step may render its domain output
    pub visible: bool,
    /// Whether the engine may advance
    pub ready: bool,
    /// Status of the model for this user
    pub status: ModelStatus,
    /// Outstanding request to the user
    pub prompt: GatePrompt,
    /// Console lines describing the gate state
    pub notes: Vec<String>,
}

impl GateView {
    fn blocked(status: ModelStatus, prompt: GatePrompt, notes: Vec<String>) -> Self {
        Self {
            visible: false,
            ready: false,
            status,
            prompt,
            notes,
        }
    }

    fn visible(status: ModelStatus, ready: bool, prompt: GatePrompt, notes: Vec<String>) -> Self {
        Self {
            visible: true,
            ready,
            status,
            prompt,
            notes,
        }
    }
}

/// Gating logic for the three algorithm steps
pub struct ModelGate {
    store: Arc<dyn ModelStateStore>,
    config: GateConfig,
}

impl std::fmt::Debug for ModelGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelGate {
    /// Create a gate over a model store
    #[must_use]
    pub fn new(store: Arc<dyn ModelStateStore>) -> Self {
        Self::with_config(store, GateConfig::default())
    }

    /// Create a gate with custom delays
    #[must_use]
    pub fn with_config(store: Arc<dyn ModelStateStore>, config: GateConfig) -> Self {
        Self { store, config }
    }

    /// Gate configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate visibility and readiness of `step` for `user`
    ///
    /// Running this repeatedly without new actions is idempotent; the only
    /// side effect is the one-shot direct-mode inference.
    ///
    /// # Errors
    /// Returns `GateError::NotGated` for steps without a model and
    /// `GateError::Persistence` when the model status cannot be read.
    pub async fn evaluate(
        &self,
        user: &str,
        step: StepId,
        episode: &mut TrainingEpisode,
        finished: bool,
    ) -> Result<GateView, GateError> {
        let key = step.model_key().ok_or(GateError::NotGated(step))?;

        if finished {
            let status = episode.branch.unwrap_or_default();
            return Ok(GateView::visible(status, true, GatePrompt::Replay, Vec::new()));
        }

        let status = self.branch(user, key, episode)?;
        let mut notes = vec![format!(
            "🧠 模型控制台: {} ({})",
            key.display_name(),
            status_label(status)
        )];

        if episode.ready {
            if let Some(metric) = episode.metric {
                notes.push(metric_note(episode, metric));
            }
            return Ok(GateView::visible(status, true, GatePrompt::Ready, notes));
        }

        let view = match status {
            ModelStatus::Untrained => match episode.phase {
                EpisodePhase::AwaitingData | EpisodePhase::Running => {
                    notes.push("检测到您是首次使用该模型，需要初始化训练参数。".to_string());
                    GateView::blocked(status, GatePrompt::AwaitTraining, notes)
                }
                EpisodePhase::AwaitingDecision | EpisodePhase::Done => {
                    if let Some(metric) = episode.metric {
                        notes.push(metric_note(episode, metric));
                    }
                    notes.push("请评估结果：存入专属库，或仅本次使用。".to_string());
                    GateView::visible(status, false, GatePrompt::AwaitDecision, notes)
                }
            },
            ModelStatus::Private => match episode.mode {
                None => {
                    notes.push("检测到您的专属模型。请选择运行模式：增量微调 / 直接使用。".to_string());
                    GateView::blocked(status, GatePrompt::AwaitMode, notes)
                }
                Some(PrivateMode::Direct) => {
                    if !episode.inference_done {
                        tokio::time::sleep(self.config.inference_delay).await;
                        episode.inference_done = true;
                        tracing::debug!(user, step = %step, "direct inference with private model");
                    }
                    episode.phase = EpisodePhase::Done;
                    episode.ready = true;
                    notes.push("已加载专属权重并完成推理。".to_string());
                    GateView::visible(status, true, GatePrompt::Ready, notes)
                }
                Some(PrivateMode::FineTune) => match episode.phase {
                    EpisodePhase::AwaitingData | EpisodePhase::Running => {
                        notes.push("请上传增量校准数据并启动增量训练。".to_string());
                        GateView::blocked(status, GatePrompt::AwaitFineTune, notes)
                    }
                    EpisodePhase::AwaitingDecision | EpisodePhase::Done => {
                        if let Some(metric) = episode.metric {
                            notes.push(metric_note(episode, metric));
                        }
                        notes.push("请决定是否保存并更新模型版本。".to_string());
                        GateView::visible(status, false, GatePrompt::AwaitDecision, notes)
                    }
                },
            },
        };
        Ok(view)
    }

    /// Apply a user action to the episode of `step`
    ///
    /// # Errors
    /// - `GateError::ReadOnly` for finished workflows
    /// - `GateError::AlreadyDecided` once readiness was granted
    /// - `GateError::OutOfPhase` / `GateError::WrongBranch` for actions that
    ///   do not match the episode
    /// - `GateError::Persistence` when saving fails; the episode is left
    ///   awaiting the decision
    pub async fn apply(
        &self,
        user: &str,
        step: StepId,
        episode: &mut TrainingEpisode,
        action: GateAction,
        finished: bool,
    ) -> Result<GateView, GateError> {
        let key = step.model_key().ok_or(GateError::NotGated(step))?;
        if finished {
            return Err(GateError::ReadOnly);
        }
        if episode.ready {
            return Err(GateError::AlreadyDecided);
        }
        let status = self.branch(user, key, episode)?;
        let name = action.name();

        match action {
            GateAction::Train { dataset } => {
                require_branch(status, ModelStatus::Untrained, name)?;
                require_phase(episode, EpisodePhase::AwaitingData, name)?;
                tracing::info!(user, model = %key, ?dataset, "training started");
                let run = RunGuard::start(episode, dataset);
                tokio::time::sleep(self.config.training_delay).await;
                run.finish(sample_metric(94.0..98.0));
            }
            GateAction::ChooseMode { mode } => {
                require_branch(status, ModelStatus::Private, name)?;
                if episode.mode.is_some() {
                    return Err(GateError::OutOfPhase {
                        action: name,
                        phase: episode.phase,
                    });
                }
                episode.mode = Some(mode);
                tracing::debug!(user, model = %key, ?mode, "private mode chosen");
            }
            GateAction::StartFineTune { dataset } => {
                require_branch(status, ModelStatus::Private, name)?;
                if episode.mode != Some(PrivateMode::FineTune) {
                    return Err(GateError::WrongBranch {
                        action: name,
                        branch: "direct-use",
                    });
                }
                require_phase(episode, EpisodePhase::AwaitingData, name)?;
                tracing::info!(user, model = %key, ?dataset, "fine-tune started");
                let run = RunGuard::start(episode, dataset);
                tokio::time::sleep(self.config.fine_tune_delay).await;
                run.finish(sample_metric(0.5..1.2));
            }
            GateAction::Decide { decision } => {
                require_phase(episode, EpisodePhase::AwaitingDecision, name)?;
                match (status, decision) {
                    (ModelStatus::Untrained, GateDecision::SavePrivate) => {
                        self.store.save_private(user, key)?;
                        tracing::info!(user, model = %key, "model saved to private library");
                    }
                    (ModelStatus::Untrained, GateDecision::UseOnce) => {
                        tracing::info!(user, model = %key, "trained model used once");
                    }
                    (ModelStatus::Private, GateDecision::SaveVersion) => {
                        let version = self.store.bump_version(user, key)?;
                        tracing::info!(user, model = %key, version, "fine-tuned version saved");
                    }
                    (ModelStatus::Private, GateDecision::Discard) => {
                        tracing::info!(user, model = %key, "fine-tuned weights discarded");
                    }
                    (ModelStatus::Untrained, _) => {
                        return Err(GateError::WrongBranch {
                            action: name,
                            branch: "untrained",
                        });
                    }
                    (ModelStatus::Private, _) => {
                        return Err(GateError::WrongBranch {
                            action: name,
                            branch: "private",
                        });
                    }
                }
                episode.decision = Some(decision);
                episode.phase = EpisodePhase::Done;
                episode.ready = true;
            }
        }

        self.evaluate(user, step, episode, false).await
    }

    /// The model status branch of this episode, fixed on first use
    fn branch(
        &self,
        user: &str,
        key: ModelKey,
        episode: &mut TrainingEpisode,
    ) -> Result<ModelStatus, GateError> {
        if let Some(status) = episode.branch {
            return Ok(status);
        }
        let status = self.store.model_status(user, key)?;
        episode.branch = Some(status);
        Ok(status)
    }
}

fn require_branch(
    status: ModelStatus,
    expected: ModelStatus,
    action: &'static str,
) -> Result<(), GateError> {
    if status == expected {
        Ok(())
    } else {
        Err(GateError::WrongBranch {
            action,
            branch: status_name(status),
        })
    }
}

fn require_phase(
    episode: &TrainingEpisode,
    expected: EpisodePhase,
    action: &'static str,
) -> Result<(), GateError> {
    if episode.phase == expected {
        Ok(())
    } else {
        Err(GateError::OutOfPhase {
            action,
            phase: episode.phase,
        })
    }
}

/// Episode in the `Running` phase; falls back to `AwaitingData` when the
/// run is dropped before it finishes
struct RunGuard<'e> {
    episode: &'e mut TrainingEpisode,
}

impl<'e> RunGuard<'e> {
    fn start(episode: &'e mut TrainingEpisode, dataset: Option<String>) -> Self {
        episode.phase = EpisodePhase::Running;
        episode.dataset = dataset;
        Self { episode }
    }

    fn finish(self, metric: f64) {
        self.episode.metric = Some(metric);
        self.episode.phase = EpisodePhase::AwaitingDecision;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.episode.phase == EpisodePhase::Running {
            self.episode.phase = EpisodePhase::AwaitingData;
        }
    }
}

/// Random metric in `range`, to two decimals
fn sample_metric(range: std::ops::Range<f64>) -> f64 {
    let raw: f64 = rand::rng().random_range(range);
    (raw * 100.0).round() / 100.0
}

fn metric_note(episode: &TrainingEpisode, metric: f64) -> String {
    if episode.mode == Some(PrivateMode::FineTune) {
        format!("✅ 微调完成 | 准确率提升: +{metric:.2}%")
    } else {
        format!("✅ 训练完成 | 准确率: {metric:.1}%")
    }
}

fn status_name(status: ModelStatus) -> &'static str {
    match status {
        ModelStatus::Untrained => "untrained",
        ModelStatus::Private => "private",
    }
}

fn status_label(status: ModelStatus) -> &'static str {
    match status {
        ModelStatus::Untrained => "🔴 未训练 (公共)",
        ModelStatus::Private => "🟢 已就绪 (专属)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryModelStore;

    fn gate() -> (Arc<MemoryModelStore>, ModelGate) {
        let store = Arc::new(MemoryModelStore::new());
        let gate = ModelGate::with_config(store.clone(), GateConfig::immediate());
        (store, gate)
    }

    #[tokio::test]
    async fn untrained_blocks_until_trained() {
        let (_, gate) = gate();
        let mut ep = TrainingEpisode::default();
        let view = gate.evaluate("u", StepId::TrendAlgo, &mut ep, false).await.unwrap();
        assert!(!view.visible);
        assert!(!view.ready);
        assert_eq!(view.prompt, GatePrompt::AwaitTraining);
    }

    #[tokio::test]
    async fn trained_is_visible_but_not_ready() {
        let (_, gate) = gate();
        let mut ep = TrainingEpisode::default();
        let view = gate
            .apply("u", StepId::TrendAlgo, &mut ep, GateAction::Train { dataset: None }, false)
            .await
            .unwrap();
        assert!(view.visible);
        assert!(!view.ready);
        assert_eq!(view.prompt, GatePrompt::AwaitDecision);
        assert_eq!(ep.phase, EpisodePhase::AwaitingDecision);
    }

    #[tokio::test]
    async fn save_private_persists() {
        let (store, gate) = gate();
        let mut ep = TrainingEpisode::default();
        gate.apply("u", StepId::RiskAlgo, &mut ep, GateAction::Train { dataset: None }, false)
            .await
            .unwrap();
        let view = gate
            .apply(
                "u",
                StepId::RiskAlgo,
                &mut ep,
                GateAction::Decide {
                    decision: GateDecision::SavePrivate,
                },
                false,
            )
            .await
            .unwrap();
        assert!(view.ready);
        assert_eq!(
            store.model_status("u", ModelKey::Risk).unwrap(),
            ModelStatus::Private
        );
    }

    #[tokio::test]
    async fn replay_is_open_and_read_only() {
        let (_, gate) = gate();
        let mut ep = TrainingEpisode::default();
        let view = gate.evaluate("u", StepId::WaterAlgo, &mut ep, true).await.unwrap();
        assert!(view.visible);
        assert_eq!(view.prompt, GatePrompt::Replay);

        let err = gate
            .apply("u", StepId::WaterAlgo, &mut ep, GateAction::Train { dataset: None }, true)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ReadOnly));
    }

    #[tokio::test]
    async fn decide_before_training_is_out_of_phase() {
        let (_, gate) = gate();
        let mut ep = TrainingEpisode::default();
        let err = gate
            .apply(
                "u",
                StepId::TrendAlgo,
                &mut ep,
                GateAction::Decide {
                    decision: GateDecision::UseOnce,
                },
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::OutOfPhase { .. }));
        assert!(!ep.ready);
    }

    #[tokio::test]
    async fn non_gated_step_is_rejected() {
        let (_, gate) = gate();
        let mut ep = TrainingEpisode::default();
        let err = gate
            .evaluate("u", StepId::ReportGen, &mut ep, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotGated(StepId::ReportGen)));
    }

    #[test]
    fn gate_config_roundtrips_as_millis() {
        let config = GateConfig::default();
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["inference_delay"], 1500);
        let back: GateConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
