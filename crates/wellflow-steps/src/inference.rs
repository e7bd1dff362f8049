//! Deep-learning inference step

use crate::round_to;
use rand::Rng;
use serde::{Deserialize, Serialize};
use wellflow_core::{StepError, StepHandler, StepId, StepScope};

/// Context key of the figures drawn by the inference run
pub const INFERENCE_STATS: &str = "inference_stats";

/// Cost of one simulated inference run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceStats {
    /// Seconds taken
    pub cost: f64,
    /// GPU memory in GB
    pub vram: f64,
}

impl InferenceStats {
    fn sample() -> Self {
        let mut rng = rand::rng();
        Self {
            cost: round_to(rng.random_range(0.8..2.5), 2),
            vram: round_to(rng.random_range(3.5..6.2), 1),
        }
    }
}

/// Simulated LSTM-Transformer inference run
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelInference;

#[async_trait::async_trait]
impl StepHandler for ModelInference {
    fn id(&self) -> StepId {
        StepId::ModelInference
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        scope.context.set_as(INFERENCE_STATS, &InferenceStats::sample())?;
        Ok("推理启动".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        let InferenceStats { cost, vram } = scope
            .context
            .get_as(INFERENCE_STATS)
            .unwrap_or_else(InferenceStats::sample);
        scope.emit("🧠 正在加载 LSTM-Transformer 混合模型...");
        scope.emit(format!(
            "✅ 模型推理完成 | 耗时: {cost:.2}s | 显存占用: {vram:.1}GB"
        ));
        Ok(true)
    }
}
