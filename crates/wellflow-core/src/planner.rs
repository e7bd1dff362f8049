//! Workflow planning
//!
//! Turns a free-text request into an ordered step list plus the seeded
//! workflow context. Planning never fails: unrecognized months and tasks
//! fall back to defaults.

use crate::types::{keys, StepId, TaskKind, WorkflowContext, WorkflowDefinition};
use once_cell::sync::Lazy;
use regex::Regex;

/// Month used when the request names none
pub const DEFAULT_MONTH: u32 = 7;

/// Steps shared by every workflow before the task step
pub const COMMON_PREFIX: [StepId; 5] = [
    StepId::DataLoader,
    StepId::DataCleaner,
    StepId::FeatureEng,
    StepId::Correlation,
    StepId::ModelInference,
];

/// Steps shared by every workflow after the task step
pub const COMMON_SUFFIX: [StepId; 2] = [StepId::ReportGen, StepId::ApprovalFlow];

const INJECTION_KEYWORD: &str = "注水";
const RISK_KEYWORD: &str = "风险";

static MONTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+|[一二三四五六七八九十]+)月").expect("month pattern is valid")
});

/// Result of planning one request
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Selected task
    pub task: TaskKind,
    /// Resolved month
    pub month: u32,
    /// Ordered steps
    pub definition: WorkflowDefinition,
    /// Seeded context
    pub context: WorkflowContext,
}

/// Keyword planner for analysis requests
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowPlanner;

impl WorkflowPlanner {
    /// Create new planner
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Plan a request
    #[must_use]
    pub fn plan(&self, request: &str) -> Plan {
        let month = extract_month(request);
        let task = classify_task(request);

        let mut steps = Vec::with_capacity(COMMON_PREFIX.len() + 1 + COMMON_SUFFIX.len());
        steps.extend(COMMON_PREFIX);
        steps.push(task.algorithm_step());
        steps.extend(COMMON_SUFFIX);

        let mut context = WorkflowContext::new();
        context.insert(keys::MONTH, month);
        context.insert(keys::TASK_NAME, task.label());
        context.insert(keys::TARGET_FILE, target_file(month, task));

        tracing::debug!(month, task = %task, "planned workflow");

        Plan {
            task,
            month,
            definition: WorkflowDefinition::new(steps),
            context,
        }
    }
}

/// Extract the month from the first `N月` token, defaulting to July
#[must_use]
pub fn extract_month(request: &str) -> u32 {
    let Some(captures) = MONTH_PATTERN.captures(request) else {
        return DEFAULT_MONTH;
    };
    let token = &captures[1];
    let month = if token.chars().all(|c| c.is_ascii_digit()) {
        token.parse::<u32>().ok()
    } else {
        spelled_month(token)
    };
    month
        .filter(|m| (1..=12).contains(m))
        .unwrap_or(DEFAULT_MONTH)
}

fn spelled_month(token: &str) -> Option<u32> {
    let month = match token {
        "一" => 1,
        "二" => 2,
        "三" => 3,
        "四" => 4,
        "五" => 5,
        "六" => 6,
        "七" => 7,
        "八" => 8,
        "九" => 9,
        "十" => 10,
        "十一" => 11,
        "十二" => 12,
        _ => return None,
    };
    Some(month)
}

/// Classify the task: injection beats risk beats the trend default
#[must_use]
pub fn classify_task(request: &str) -> TaskKind {
    if request.contains(INJECTION_KEYWORD) {
        TaskKind::InjectionAllocation
    } else if request.contains(RISK_KEYWORD) {
        TaskKind::RiskPrediction
    } else {
        TaskKind::ProductionTrend
    }
}

/// Data file name for a month and task
#[must_use]
pub fn target_file(month: u32, task: TaskKind) -> String {
    format!("{month}月+{}.csv", task.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn month_table() {
        assert_eq!(extract_month("7月"), 7);
        assert_eq!(extract_month("十二月"), 12);
        assert_eq!(extract_month("3月"), 3);
        assert_eq!(extract_month("十三月"), 7);
    }

    #[test]
    fn month_defaults_without_token() {
        assert_eq!(extract_month("预测一下产量"), DEFAULT_MONTH);
        assert_eq!(extract_month(""), DEFAULT_MONTH);
    }

    #[test]
    fn month_uses_first_match() {
        assert_eq!(extract_month("对比5月和9月的风险"), 5);
        assert_eq!(extract_month("2024年11月产量"), 11);
    }

    #[test]
    fn month_out_of_range_numeral_defaults() {
        assert_eq!(extract_month("13月"), DEFAULT_MONTH);
        assert_eq!(extract_month("0月"), DEFAULT_MONTH);
        assert_eq!(extract_month("99999999999999999999月"), DEFAULT_MONTH);
    }

    #[test]
    fn task_priority() {
        assert_eq!(classify_task("注水风险"), TaskKind::InjectionAllocation);
        assert_eq!(classify_task("风险预测"), TaskKind::RiskPrediction);
        assert_eq!(classify_task("hello"), TaskKind::ProductionTrend);
    }

    #[test]
    fn risk_request_plan() {
        let plan = WorkflowPlanner::new().plan("七月的风险预测");
        assert_eq!(plan.month, 7);
        assert_eq!(plan.task, TaskKind::RiskPrediction);
        assert_eq!(plan.definition.get(5), Some(StepId::RiskAlgo));
        assert_eq!(plan.context.target_file(), Some("7月+风险预测.csv"));
        assert_eq!(plan.context.task_name(), Some("风险预测"));
        assert_eq!(plan.context.month(), Some(7));
    }

    #[test]
    fn injection_request_plan() {
        let plan = WorkflowPlanner::new().plan("帮我做十二月注水调配");
        assert_eq!(plan.context.target_file(), Some("12月+注水调配.csv"));
        assert_eq!(
            plan.definition.steps(),
            &[
                StepId::DataLoader,
                StepId::DataCleaner,
                StepId::FeatureEng,
                StepId::Correlation,
                StepId::ModelInference,
                StepId::WaterAlgo,
                StepId::ReportGen,
                StepId::ApprovalFlow,
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_plan_shape(request in ".{0,40}") {
            let plan = WorkflowPlanner::new().plan(&request);
            let steps = plan.definition.steps();
            prop_assert_eq!(steps.len(), 8);
            prop_assert_eq!(&steps[..5], &COMMON_PREFIX[..]);
            prop_assert_eq!(&steps[6..], &COMMON_SUFFIX[..]);
            prop_assert!(steps[5].is_gated());
            prop_assert!((1..=12).contains(&plan.month));

            let expected = if request.contains("注水") {
                StepId::WaterAlgo
            } else if request.contains("风险") {
                StepId::RiskAlgo
            } else {
                StepId::TrendAlgo
            };
            prop_assert_eq!(steps[5], expected);
        }

        #[test]
        fn prop_keyword_anywhere(prefix in "[a-z ]{0,10}", suffix in "[a-z ]{0,10}") {
            let request = format!("{prefix}注水{suffix}风险");
            prop_assert_eq!(classify_task(&request), TaskKind::InjectionAllocation);
        }
    }
}
