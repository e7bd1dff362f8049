//! Time-series feature engineering step

use crate::dataset::Dataset;
use crate::round_to;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use wellflow_core::{StepError, StepHandler, StepId, StepScope, TaskKind, WorkflowContext};

/// Context key of the features built for the run
pub const FEATURES: &str = "features";

const PRODUCTION_TERMS: [&str; 5] = [
    "Arps_Decline_Rate",
    "Water_Cut_Derivative",
    "Cumulative_Oil_Prod",
    "Liquid_Prod_Index",
    "Natural_Decline_b",
];

const INJECTION_TERMS: [&str; 5] = [
    "Voidage_Replacement_Ratio",
    "Injectivity_Index",
    "Hall_Plot_Slope",
    "Pressure_Gradient",
    "Water_Drive_Index",
];

const RISK_TERMS: [&str; 5] = [
    "Anomaly_Score_IsolationForest",
    "Pressure_Surge_Rate",
    "Casing_Damage_Prob",
    "Entropy_Risk_Val",
    "Threshold_Crossing_Count",
];

/// Domain terms for a task
#[must_use]
pub fn task_terms(task: TaskKind) -> &'static [&'static str] {
    match task {
        TaskKind::ProductionTrend => &PRODUCTION_TERMS,
        TaskKind::RiskPrediction => &RISK_TERMS,
        TaskKind::InjectionAllocation => &INJECTION_TERMS,
    }
}

/// Lag, window and seasonal features built on `base`
#[must_use]
pub fn common_features(base: &str) -> Vec<String> {
    vec![
        format!("{base}_Lag_1"),
        format!("{base}_Lag_7"),
        format!("{base}_MA_15"),
        format!("{base}_Std_30"),
        format!("{base}_Diff"),
        "Time_Embedding_Sin".to_string(),
        "Seasonality_Idx".to_string(),
    ]
}

/// Pick three common and three task features
#[must_use]
pub fn select_features(base: &str, task: TaskKind) -> Vec<String> {
    let mut rng = rand::rng();
    let common = common_features(base);
    let mut picked: Vec<String> = common.choose_multiple(&mut rng, 3).cloned().collect();
    picked.extend(
        task_terms(task)
            .choose_multiple(&mut rng, 3)
            .map(|term| (*term).to_string()),
    );
    picked
}

/// Features picked for one run and their quality figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Feature names
    pub features: Vec<String>,
    /// Sparsity in percent
    pub sparsity: u32,
    /// Information gain
    pub gain: f64,
}

impl FeatureSet {
    /// Pick features for the context's task and dataset
    #[must_use]
    pub fn sample(context: &WorkflowContext) -> Self {
        let task = context
            .task_name()
            .and_then(TaskKind::from_label)
            .unwrap_or(TaskKind::ProductionTrend);
        let base = Dataset::from_context(context)
            .and_then(|ds| ds.value_columns().first().map(|c| (*c).to_string()))
            .unwrap_or_else(|| "Value".to_string());
        let features = select_features(&base, task);
        let mut rng = rand::rng();
        Self {
            features,
            sparsity: rng.random_range(5..=15),
            gain: round_to(rng.random_range(0.6..0.9), 2),
        }
    }
}

/// Simulated feature builder
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureEngineering;

#[async_trait::async_trait]
impl StepHandler for FeatureEngineering {
    fn id(&self) -> StepId {
        StepId::FeatureEng
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        let set = FeatureSet::sample(scope.context);
        scope.context.set_as(FEATURES, &set)?;
        Ok("特征构建完成".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        let FeatureSet {
            features,
            sparsity,
            gain,
        } = scope
            .context
            .get_as(FEATURES)
            .unwrap_or_else(|| FeatureSet::sample(scope.context));

        scope.emit(format!(
            "✅ 时序特征工程构建完成 (共生成 {} 维特征)",
            features.len()
        ));
        scope.emit("**已提取关键因子:**");
        scope.emit(
            features
                .iter()
                .map(|f| format!("`{f}`"))
                .collect::<Vec<_>>()
                .join(" "),
        );
        scope.emit(format!(
            "特征维度: {} | 稀疏度: {sparsity}% | 信息增益 (IG): {gain:.2}",
            features.len()
        ));
        Ok(true)
    }
}
