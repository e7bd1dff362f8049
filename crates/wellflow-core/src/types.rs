//! Core types for WellFlow
//!
//! Defines the fundamental vocabulary of the workflow:
//! - Step identifiers and their categories
//! - Task kinds and model keys
//! - The workflow definition, shared context and state

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identifier of one pipeline step
///
/// Serialized as the stable tool identifier (`tool_data_loader`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StepId {
    /// Multi-source data loading
    #[serde(rename = "tool_data_loader")]
    DataLoader,
    /// Outlier cleaning
    #[serde(rename = "tool_data_cleaner")]
    DataCleaner,
    /// Time-series feature engineering
    #[serde(rename = "tool_feature_eng")]
    FeatureEng,
    /// Multi-factor correlation analysis
    #[serde(rename = "tool_correlation")]
    Correlation,
    /// Deep-learning model inference
    #[serde(rename = "tool_model_inference")]
    ModelInference,
    /// Production trend forecast (gated)
    #[serde(rename = "tool_trend_algo")]
    TrendAlgo,
    /// Production risk scan (gated)
    #[serde(rename = "tool_risk_algo")]
    RiskAlgo,
    /// Water-injection allocation (gated)
    #[serde(rename = "tool_water_algo")]
    WaterAlgo,
    /// Decision report generation
    #[serde(rename = "tool_report_gen")]
    ReportGen,
    /// Approval submission
    #[serde(rename = "tool_approval_flow")]
    ApprovalFlow,
}

impl StepId {
    /// Every known step, in catalog order
    pub const ALL: [StepId; 10] = [
        StepId::DataLoader,
        StepId::DataCleaner,
        StepId::FeatureEng,
        StepId::Correlation,
        StepId::ModelInference,
        StepId::TrendAlgo,
        StepId::RiskAlgo,
        StepId::WaterAlgo,
        StepId::ReportGen,
        StepId::ApprovalFlow,
    ];

    /// Stable string identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StepId::DataLoader => "tool_data_loader",
            StepId::DataCleaner => "tool_data_cleaner",
            StepId::FeatureEng => "tool_feature_eng",
            StepId::Correlation => "tool_correlation",
            StepId::ModelInference => "tool_model_inference",
            StepId::TrendAlgo => "tool_trend_algo",
            StepId::RiskAlgo => "tool_risk_algo",
            StepId::WaterAlgo => "tool_water_algo",
            StepId::ReportGen => "tool_report_gen",
            StepId::ApprovalFlow => "tool_approval_flow",
        }
    }

    /// Human readable step name
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            StepId::DataLoader => "多源数据集成加载",
            StepId::DataCleaner => "异常值清洗引擎",
            StepId::FeatureEng => "时序特征工程构建",
            StepId::Correlation => "多维因子关联分析",
            StepId::ModelInference => "深度学习模型推理",
            StepId::TrendAlgo => "产量趋势预测算法",
            StepId::RiskAlgo => "生产风险扫描引擎",
            StepId::WaterAlgo => "智能配注优化模型",
            StepId::ReportGen => "AI 决策报告生成",
            StepId::ApprovalFlow => "自动审批流程推送",
        }
    }

    /// Icon shown next to the step name
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            StepId::DataLoader => "📂",
            StepId::DataCleaner => "🧹",
            StepId::FeatureEng => "🔧",
            StepId::Correlation => "🕸️",
            StepId::ModelInference => "🧠",
            StepId::TrendAlgo => "📈",
            StepId::RiskAlgo => "⚠️",
            StepId::WaterAlgo => "💧",
            StepId::ReportGen => "📝",
            StepId::ApprovalFlow => "📤",
        }
    }

    /// Model record key backing this step, if it is gated
    #[must_use]
    pub const fn model_key(self) -> Option<ModelKey> {
        match self {
            StepId::TrendAlgo => Some(ModelKey::Trend),
            StepId::RiskAlgo => Some(ModelKey::Risk),
            StepId::WaterAlgo => Some(ModelKey::Water),
            _ => None,
        }
    }

    /// How the engine decides to advance past this step
    #[must_use]
    pub const fn category(self) -> StepCategory {
        match self {
            StepId::DataLoader => StepCategory::DataLoad,
            StepId::TrendAlgo => StepCategory::Gated(ModelKey::Trend),
            StepId::RiskAlgo => StepCategory::Gated(ModelKey::Risk),
            StepId::WaterAlgo => StepCategory::Gated(ModelKey::Water),
            _ => StepCategory::Auto,
        }
    }

    /// Whether the step is one of the three gated algorithm steps
    #[inline]
    #[must_use]
    pub const fn is_gated(self) -> bool {
        self.model_key().is_some()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownStep(s.to_string()))
    }
}

/// Advance rule of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCategory {
    /// Advances only once the model gate grants readiness
    Gated(ModelKey),
    /// Advances only on an explicit user confirmation
    DataLoad,
    /// Advances after rendering
    Auto,
}

/// Persisted model record key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelKey {
    /// Production trend LSTM
    #[serde(rename = "model_trend")]
    Trend,
    /// Risk XGBoost classifier
    #[serde(rename = "model_risk")]
    Risk,
    /// Injection DQN
    #[serde(rename = "model_water")]
    Water,
}

impl ModelKey {
    /// All model keys
    pub const ALL: [ModelKey; 3] = [ModelKey::Trend, ModelKey::Risk, ModelKey::Water];

    /// Stable string key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ModelKey::Trend => "model_trend",
            ModelKey::Risk => "model_risk",
            ModelKey::Water => "model_water",
        }
    }

    /// Display name of the model
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            ModelKey::Trend => "产量趋势预测模型 (LSTM-V2)",
            ModelKey::Risk => "风险预警分类器 (XGBoost)",
            ModelKey::Water => "配注优化强化学习模型 (DQN)",
        }
    }

    /// Date the public model was last refreshed
    #[must_use]
    pub const fn last_update(self) -> &'static str {
        match self {
            ModelKey::Trend => "2024-05-20",
            ModelKey::Risk => "2024-06-01",
            ModelKey::Water => "2024-04-15",
        }
    }

    /// The gated step backed by this model
    #[must_use]
    pub const fn step(self) -> StepId {
        match self {
            ModelKey::Trend => StepId::TrendAlgo,
            ModelKey::Risk => StepId::RiskAlgo,
            ModelKey::Water => StepId::WaterAlgo,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown model key: {s}"))
    }
}

/// Persisted training status of a user's model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Public model, never trained by this user
    #[default]
    Untrained,
    /// Saved into the user's private library
    Private,
}

/// Analysis task selected by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Default: production trend forecast
    ProductionTrend,
    /// Production risk prediction
    RiskPrediction,
    /// Water-injection allocation
    InjectionAllocation,
}

impl TaskKind {
    /// Task label used in file names and reports
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TaskKind::ProductionTrend => "产量预测",
            TaskKind::RiskPrediction => "风险预测",
            TaskKind::InjectionAllocation => "注水调配",
        }
    }

    /// The task-specific algorithm step
    #[must_use]
    pub const fn algorithm_step(self) -> StepId {
        match self {
            TaskKind::ProductionTrend => StepId::TrendAlgo,
            TaskKind::RiskPrediction => StepId::RiskAlgo,
            TaskKind::InjectionAllocation => StepId::WaterAlgo,
        }
    }

    /// Recover the task from its label
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        [
            TaskKind::ProductionTrend,
            TaskKind::RiskPrediction,
            TaskKind::InjectionAllocation,
        ]
        .into_iter()
        .find(|task| task.label() == label)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered, immutable list of steps of one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDefinition {
    steps: Vec<StepId>,
}

impl WorkflowDefinition {
    /// Create a definition from its steps
    #[inline]
    #[must_use]
    pub fn new(steps: Vec<StepId>) -> Self {
        Self { steps }
    }

    /// Number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the definition has no steps
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<StepId> {
        self.steps.get(index).copied()
    }

    /// All steps in order
    #[inline]
    #[must_use]
    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    /// Iterate over `(index, step)`
    pub fn iter(&self) -> impl Iterator<Item = (usize, StepId)> + '_ {
        self.steps.iter().copied().enumerate()
    }
}

/// Well-known context keys
pub mod keys {
    /// Task label
    pub const TASK_NAME: &str = "task_name";
    /// Target CSV file name
    pub const TARGET_FILE: &str = "target_file";
    /// Month number (1-12)
    pub const MONTH: &str = "month";
    /// Loaded dataset
    pub const DATASET: &str = "dataset";
    /// Trend algorithm summary
    pub const TREND_SUMMARY: &str = "trend_summary";
    /// Risk algorithm summary
    pub const RISK_SUMMARY: &str = "risk_summary";
    /// Injection algorithm summary
    pub const WATER_SUMMARY: &str = "water_summary";
    /// Generated report text
    pub const REPORT: &str = "report";
    /// Set once the approval record has been written
    pub const APPROVAL_SAVED: &str = "approval_saved";
    /// Id of the written approval record
    pub const APPROVAL_ID: &str = "approval_id";
}

/// Mutable key/value map shared by every step of one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext {
    values: BTreeMap<String, Value>,
}

impl WorkflowContext {
    /// Create an empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a raw value
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a string value
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Whether a key is present
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read a typed value stored under `key`
    #[must_use]
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Store a typed value under `key`
    pub fn set_as<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Task label
    #[must_use]
    pub fn task_name(&self) -> Option<&str> {
        self.get_str(keys::TASK_NAME)
    }

    /// Target file name
    #[must_use]
    pub fn target_file(&self) -> Option<&str> {
        self.get_str(keys::TARGET_FILE)
    }

    /// Month number
    #[must_use]
    pub fn month(&self) -> Option<u32> {
        self.values
            .get(keys::MONTH)
            .and_then(Value::as_u64)
            .and_then(|m| u32::try_from(m).ok())
    }

    /// Whether the approval record has already been written
    #[must_use]
    pub fn approval_saved(&self) -> bool {
        self.values
            .get(keys::APPROVAL_SAVED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// First available algorithm summary, in trend / risk / water order
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        [keys::TREND_SUMMARY, keys::RISK_SUMMARY, keys::WATER_SUMMARY]
            .into_iter()
            .find_map(|key| self.get_str(key))
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Why a step halted the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Index of the failed step
    pub index: usize,
    /// The failed step
    pub step: StepId,
    /// Error message shown to the user
    pub message: String,
}

/// Progress of one workflow instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    current_step_index: usize,
    is_finished: bool,
    run_completed: BTreeSet<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StepFailure>,
}

impl WorkflowState {
    /// Fresh state at step 0
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the active step
    #[inline]
    #[must_use]
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Whether every step has been passed
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Whether the execute operation of step `index` already ran
    #[inline]
    #[must_use]
    pub fn run_completed(&self, index: usize) -> bool {
        self.run_completed.contains(&index)
    }

    /// The failure halting this workflow, if any
    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    pub(crate) fn mark_run_completed(&mut self, index: usize) {
        self.run_completed.insert(index);
    }

    pub(crate) fn halt(&mut self, failure: StepFailure) {
        self.failure = Some(failure);
    }

    /// Move to the next step; returns true when this advance finished the workflow
    pub(crate) fn advance(&mut self, len: usize) -> bool {
        if self.is_finished {
            return false;
        }
        self.current_step_index += 1;
        self.finish_if_complete(len)
    }

    /// Flip to finished once the index reaches `len`
    pub(crate) fn finish_if_complete(&mut self, len: usize) -> bool {
        if !self.is_finished && self.current_step_index >= len {
            self.is_finished = true;
            return true;
        }
        false
    }
}
