//! Subcommand implementations
//!
//! Each command writes its human-readable output to the given writer so
//! the binary and the tests share one code path.

use crate::config::AppConfig;
use crate::driver::{drive, DriveOutcome};
use crate::operator::Operator;
use anyhow::{bail, Context};
use std::io::Write;
use std::sync::Arc;
use wellflow_core::{
    ApprovalRecord, ModelGate, ModelKey, ModelLibrary, TrainingCenter, WorkflowEngine,
};
use wellflow_store::{session_title, Role, Stores};

/// Result of `run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// How the workflow ended
    pub outcome: DriveOutcome,
    /// History entry written for the session
    pub history_id: Option<String>,
}

/// Parse `trend`, `risk`, `water` or a full model key
///
/// # Errors
/// Unknown name.
pub fn parse_model(name: &str) -> anyhow::Result<ModelKey> {
    let name = name.trim().to_lowercase();
    let full = if name.starts_with("model_") {
        name
    } else {
        format!("model_{name}")
    };
    full.parse::<ModelKey>().map_err(anyhow::Error::msg)
}

/// Stores plus the wiring to build engines over them
#[derive(Debug)]
pub struct App {
    config: AppConfig,
    stores: Stores,
}

impl App {
    /// Open the stores under the configured data directory
    ///
    /// # Errors
    /// The data directory or user file cannot be created.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let stores = Stores::open(config.store_config()).context("failed to open stores")?;
        Ok(Self { config, stores })
    }

    /// Opened stores
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Engine over the real steps and these stores
    #[must_use]
    pub fn engine(&self) -> WorkflowEngine {
        let registry =
            wellflow_steps::default_registry(self.stores.reports.clone(), &self.config.data_dir);
        let gate = ModelGate::with_config(self.stores.users.clone(), self.config.gate);
        WorkflowEngine::with_config(Arc::new(registry), Arc::new(gate), self.config.engine)
    }

    fn require_user(&self, user: &str) -> anyhow::Result<()> {
        if self.stores.users.get(user)?.is_none() {
            bail!("unknown user: {user}");
        }
        Ok(())
    }

    fn require_admin(&self, user: &str, password: &str) -> anyhow::Result<()> {
        if self.stores.users.authenticate(user, password)? != Role::Admin {
            bail!("{user} is not a manager account");
        }
        Ok(())
    }

    /// Plan and drive a request; finished sessions are saved to history,
    /// cancelled ones archived without a snapshot
    ///
    /// # Errors
    /// Unknown user, engine or store failure.
    pub async fn run(
        &self,
        user: &str,
        request: &str,
        operator: &mut dyn Operator,
        out: &mut impl Write,
    ) -> anyhow::Result<RunSummary> {
        self.require_user(user)?;
        let engine = self.engine();
        let mut session = engine.start(user, request)?;
        writeln!(
            out,
            "收到指令。已为您规划 **{}** 流程 (目标文件: {})",
            session.context().task_name().unwrap_or_default(),
            session.context().target_file().unwrap_or_default()
        )?;

        let outcome = drive(&engine, &mut session, operator, out).await?;
        let history_id = match &outcome {
            DriveOutcome::Finished => {
                if let Some(summary) = session.final_summary() {
                    writeln!(out, "\n{summary}")?;
                }
                Some(self.stores.history.save_session(&session, None, None)?)
            }
            DriveOutcome::Cancelled { index } => {
                writeln!(out, "\n已取消 (停在第 {} 步)", index + 1)?;
                let title = session_title(session.context().task_name(), session.request());
                Some(self.stores.history.archive(user, &title)?)
            }
            DriveOutcome::Failed { .. } => None,
        };
        Ok(RunSummary {
            outcome,
            history_id,
        })
    }

    /// Print the approval queue
    ///
    /// # Errors
    /// Store failure.
    pub fn approvals_list(&self, out: &mut impl Write) -> anyhow::Result<()> {
        let reports = self.stores.reports.list()?;
        let stats = self.stores.reports.stats()?;
        writeln!(
            out,
            "待处理审批: {} | 本周已处理: {}",
            reports.len(),
            stats.processed_count
        )?;
        for record in &reports {
            write_record(out, record)?;
        }
        Ok(())
    }

    /// Approve a record as a manager
    ///
    /// # Errors
    /// Bad credentials, non-manager account or unknown / reviewed record.
    pub fn approve(
        &self,
        user: &str,
        password: &str,
        id: &str,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        self.require_admin(user, password)?;
        let record = self.stores.reports.approve(id)?;
        writeln!(out, "✅ 已批准 {} ({})", record.id, record.submitter)?;
        Ok(())
    }

    /// Reject a record as a manager
    ///
    /// # Errors
    /// Bad credentials, non-manager account or unknown / reviewed record.
    pub fn reject(
        &self,
        user: &str,
        password: &str,
        id: &str,
        feedback: Option<&str>,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        self.require_admin(user, password)?;
        let record = self.stores.reports.reject(id, feedback)?;
        writeln!(out, "❌ 已驳回 {}: {}", record.id, record.feedback)?;
        Ok(())
    }

    /// Print a user's rejection notices, optionally clearing them
    ///
    /// # Errors
    /// Store failure.
    pub fn inbox(&self, user: &str, clear: bool, out: &mut impl Write) -> anyhow::Result<()> {
        let rejected = self.stores.reports.rejected_for(user)?;
        if rejected.is_empty() {
            writeln!(out, "暂无驳回通知")?;
            return Ok(());
        }
        writeln!(out, "🔔 您有 {} 条驳回通知", rejected.len())?;
        for record in &rejected {
            writeln!(out, "  {} | {} | {}", record.task_name, record.id, record.feedback)?;
        }
        if clear {
            let removed = self.stores.reports.clear_notifications(user)?;
            writeln!(out, "已清除 {removed} 条通知")?;
        }
        Ok(())
    }

    /// Print the public and private tool catalog of a user
    ///
    /// # Errors
    /// Store failure.
    pub fn models_list(
        &self,
        user: &str,
        search: Option<&str>,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        let library = ModelLibrary::new(self.stores.users.clone());
        let catalog = library.catalog(user, search)?;
        for (title, entries) in [("🌐 公有模型", &catalog.public), ("🔒 私有模型", &catalog.private)] {
            writeln!(out, "{title} ({})", entries.len())?;
            for entry in entries {
                writeln!(out, "  {} {} - {}", entry.icon, entry.name, entry.description)?;
            }
        }
        Ok(())
    }

    /// Fine-tune a model outside a workflow
    ///
    /// # Errors
    /// Unknown user or store failure.
    pub async fn models_tune(
        &self,
        user: &str,
        model: ModelKey,
        dataset: &str,
        out: &mut impl Write,
    ) -> anyhow::Result<u32> {
        self.require_user(user)?;
        let center = TrainingCenter::new(self.stores.users.clone())
            .with_stage_delay(self.config.gate.fine_tune_delay / 7);
        let mut lines = Vec::new();
        let report = center
            .tune(user, model, dataset, |i, stage| lines.push(format!("  [{}] {stage}", i + 1)))
            .await?;
        for line in lines {
            writeln!(out, "{line}")?;
        }
        writeln!(
            out,
            "✅ {} 参数更新完成，当前版本 V{}",
            report.model.display_name(),
            report.version
        )?;
        Ok(report.version)
    }

    /// Print a user's saved sessions
    ///
    /// # Errors
    /// Unknown user or store failure.
    pub fn history_list(&self, user: &str, out: &mut impl Write) -> anyhow::Result<()> {
        let entries = self.stores.history.list(user)?;
        if entries.is_empty() {
            writeln!(out, "暂无历史记录")?;
        }
        for entry in entries {
            let marker = if entry.file_path.is_empty() { " (仅归档)" } else { "" };
            writeln!(out, "{}  {}{marker}", entry.id, entry.title)?;
        }
        Ok(())
    }

    /// Print a saved session
    ///
    /// # Errors
    /// Store failure, or no snapshot for `id`.
    pub fn history_show(&self, user: &str, id: &str, out: &mut impl Write) -> anyhow::Result<()> {
        let Some(session) = self.stores.history.load_session(user, id)? else {
            bail!("no saved session {id} for {user}");
        };
        writeln!(out, "> {}", session.request())?;
        crate::driver::Transcript::new().write(out, &session.rendered_steps())?;
        if let Some(summary) = session.final_summary() {
            writeln!(out, "\n{summary}")?;
        }
        Ok(())
    }

    /// Create an account
    ///
    /// # Errors
    /// Refused registration or store failure.
    pub fn register(&self, user: &str, password: &str, out: &mut impl Write) -> anyhow::Result<()> {
        self.stores.users.register(user, password)?;
        writeln!(out, "注册成功: {user}")?;
        Ok(())
    }

    /// Check credentials
    ///
    /// # Errors
    /// Wrong credentials or store failure.
    pub fn login(&self, user: &str, password: &str, out: &mut impl Write) -> anyhow::Result<Role> {
        let role = self.stores.users.authenticate(user, password)?;
        let label = match role {
            Role::Admin => "管理员",
            Role::User => "普通用户",
        };
        writeln!(out, "登录成功: {user} ({label})")?;
        if role == Role::User {
            let notices = self.stores.reports.rejected_for(user)?.len();
            if notices > 0 {
                writeln!(out, "🔔 您有 {notices} 条驳回通知")?;
            }
        }
        Ok(role)
    }
}

fn write_record(out: &mut impl Write, record: &ApprovalRecord) -> std::io::Result<()> {
    writeln!(
        out,
        "[{:?}] {} | {} | {} | {} | {}",
        record.status, record.id, record.submitter, record.task_name, record.submit_time, record.file_path
    )?;
    writeln!(out, "    {}", record.summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names() {
        assert_eq!(parse_model("trend").unwrap(), ModelKey::Trend);
        assert_eq!(parse_model("model_risk").unwrap(), ModelKey::Risk);
        assert_eq!(parse_model(" Water ").unwrap(), ModelKey::Water);
        assert!(parse_model("pressure").is_err());
    }
}
