//! Decision report step

use wellflow_core::{keys, StepError, StepHandler, StepId, StepScope, WorkflowContext};

/// Conclusion used when no algorithm produced a summary
pub const FALLBACK_SUMMARY: &str = "AI自动生成的分析结果";

/// Assemble the report text from the context
#[must_use]
pub fn build_report(context: &WorkflowContext) -> String {
    let task = context.task_name().unwrap_or("通用分析任务");
    let file = context.target_file().unwrap_or_default();
    let month = context.month().unwrap_or_default();
    let summary = context.summary().unwrap_or(FALLBACK_SUMMARY);
    format!(
        "## {task} 决策报告\n\n- 分析月份: {month}月\n- 数据来源: {file}\n- 核心结论: {summary}\n- 建议: 请生产科复核后下发执行。"
    )
}

/// Writes the decision report into the context
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportGenerator;

#[async_trait::async_trait]
impl StepHandler for ReportGenerator {
    fn id(&self) -> StepId {
        StepId::ReportGen
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        let report = build_report(scope.context);
        scope.context.insert(keys::REPORT, report);
        Ok("报告生成完成".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        let report = scope
            .context
            .get_str(keys::REPORT)
            .map_or_else(|| build_report(scope.context), str::to_string);
        scope.emit("📝 AI 决策报告已生成");
        for line in report.lines() {
            scope.emit(line.to_string());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_uses_first_summary() {
        let mut ctx = WorkflowContext::new();
        ctx.insert(keys::TASK_NAME, "注水调配");
        ctx.insert(keys::MONTH, 12);
        ctx.insert(keys::TARGET_FILE, "12月+注水调配.csv");
        assert!(build_report(&ctx).contains(FALLBACK_SUMMARY));

        ctx.insert(keys::WATER_SUMMARY, "water");
        let report = build_report(&ctx);
        assert!(report.starts_with("## 注水调配 决策报告"));
        assert!(report.contains("- 分析月份: 12月"));
        assert!(report.contains("- 核心结论: water"));
    }
}
