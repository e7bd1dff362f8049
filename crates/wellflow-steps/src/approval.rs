//! Approval submission step
//!
//! Writes one approval record per workflow run. The `approval_saved` flag
//! in the context guards against duplicates when the step is re-run.

use crate::report::FALLBACK_SUMMARY;
use chrono::{Local, Utc};
use rand::Rng;
use std::sync::Arc;
use wellflow_core::{
    keys, ApprovalRecord, ApprovalSink, ApprovalStatus, StepError, StepHandler, StepId, StepScope,
    WorkflowContext,
};

/// Manager receiving the submissions
pub const REVIEWER: &str = "mr.gong";

/// New record id: `TASK-{unix seconds}-{100..=999}`
#[must_use]
pub fn record_id() -> String {
    let suffix: u32 = rand::rng().random_range(100..=999);
    format!("TASK-{}-{suffix}", Utc::now().timestamp())
}

/// Build the pending record for the current context
#[must_use]
pub fn build_record(submitter: &str, context: &WorkflowContext) -> ApprovalRecord {
    ApprovalRecord {
        id: record_id(),
        submitter: submitter.to_string(),
        task_name: context.task_name().unwrap_or("通用分析任务").to_string(),
        submit_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        file_path: context.target_file().unwrap_or_default().to_string(),
        summary: context.summary().unwrap_or(FALLBACK_SUMMARY).to_string(),
        status: ApprovalStatus::Pending,
        feedback: String::new(),
    }
}

/// Pushes the finished analysis to the approval queue
pub struct ApprovalFlow {
    sink: Arc<dyn ApprovalSink>,
}

impl ApprovalFlow {
    /// Create the step over an approval sink
    #[must_use]
    pub fn new(sink: Arc<dyn ApprovalSink>) -> Self {
        Self { sink }
    }
}

impl std::fmt::Debug for ApprovalFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalFlow").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StepHandler for ApprovalFlow {
    fn id(&self) -> StepId {
        StepId::ApprovalFlow
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        if scope.context.approval_saved() {
            return Ok("报告已存在，跳过保存".to_string());
        }
        let record = build_record(scope.user(), scope.context);
        let id = record.id.clone();
        self.sink.submit(record)?;
        scope.context.insert(keys::APPROVAL_SAVED, true);
        scope.context.insert(keys::APPROVAL_ID, id.clone());
        tracing::info!(user = scope.user(), id = %id, "approval record submitted");
        Ok(format!("报告已归档，ID: {id}"))
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        let task = scope.context.task_name().unwrap_or("未知任务").to_string();
        scope.emit("✅ 方案已自动推送至生产科OA系统 (宫老师待办)");
        scope.emit(format!(
            "📋 **任务**: {task} | 📤 **接收人**: {REVIEWER} | ⏱️ **状态**: 待审批"
        ));
        if let Some(id) = scope.context.get_str(keys::APPROVAL_ID).map(str::to_string) {
            scope.emit(format!("归档编号: {id}"));
        }
        scope.emit("提示: 报告数据已加密存储于本地服务器，等待管理层签署。");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_shape() {
        let id = record_id();
        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TASK");
        assert!(parts[1].parse::<i64>().is_ok());
        let suffix: u32 = parts[2].parse().unwrap();
        assert!((100..=999).contains(&suffix));
    }

    #[test]
    fn record_falls_back_to_generic_summary() {
        let mut ctx = WorkflowContext::new();
        ctx.insert(keys::TASK_NAME, "产量预测");
        let record = build_record("user", &ctx);
        assert_eq!(record.summary, FALLBACK_SUMMARY);
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.submitter, "user");
    }
}
