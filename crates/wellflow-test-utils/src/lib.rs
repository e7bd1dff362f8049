//! Testing utilities for WellFlow workspace
//!
//! Shared fixtures: sample monthly data files and a fully wired engine over
//! in-memory stores with all delays switched off.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wellflow_core::{
    EngineConfig, GateAction, GateConfig, GateDecision, MemoryApprovalSink, MemoryModelStore,
    ModelGate, StepOutcome, WorkflowEngine, WorkflowSession,
};

pub const TREND_CSV: &str = "\
date,井号,predicted_yield
2024-07-01,W-101,52.4
2024-07-02,W-101,51.9
2024-07-03,W-101,50.6
2024-07-04,W-101,49.8
";

pub const RISK_CSV: &str = "\
井号,风险值,风险类型
W-201,0.91,套损
W-202,0.64,结蜡
W-203,0.32,套损
W-204,0.12,出砂
";

pub const WATER_CSV: &str = "\
井号,当前配注,调整量
W-301,40,5.5
W-302,35,-2
W-303,50,8.25
";

/// Write the July sample files for all three tasks into `dir`
pub fn write_sample_data(dir: &Path) -> std::io::Result<()> {
    std::fs::write(dir.join("7月+产量预测.csv"), TREND_CSV)?;
    std::fs::write(dir.join("7月+风险预测.csv"), RISK_CSV)?;
    std::fs::write(dir.join("7月+注水调配.csv"), WATER_CSV)?;
    Ok(())
}

/// Engine wired to the real steps, in-memory stores and a temp data dir
pub struct TestEnv {
    pub data_dir: TempDir,
    pub models: Arc<MemoryModelStore>,
    pub approvals: Arc<MemoryApprovalSink>,
    pub engine: WorkflowEngine,
}

impl TestEnv {
    pub fn new() -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        write_sample_data(data_dir.path()).unwrap();
        let models = Arc::new(MemoryModelStore::new());
        let approvals = Arc::new(MemoryApprovalSink::new());
        let registry = wellflow_steps::default_registry(approvals.clone(), data_dir.path());
        let gate = ModelGate::with_config(models.clone(), GateConfig::immediate());
        let engine = WorkflowEngine::with_config(
            Arc::new(registry),
            Arc::new(gate),
            EngineConfig::immediate(),
        );
        Self {
            data_dir,
            models,
            approvals,
            engine,
        }
    }

    /// Process, confirm the data load and process again
    pub async fn drive_to_gate(&self, session: &mut WorkflowSession) -> StepOutcome {
        self.engine.process(session).await.unwrap();
        self.engine.confirm_data_load(session).unwrap();
        self.engine.process(session).await.unwrap().outcome
    }

    /// Train an untrained model and record `decision`
    pub async fn train_and_decide(&self, session: &mut WorkflowSession, decision: GateDecision) {
        self.engine
            .gate_action(session, GateAction::Train { dataset: None })
            .await
            .unwrap();
        self.engine
            .gate_action(session, GateAction::Decide { decision })
            .await
            .unwrap();
    }

    /// Run a request to completion on the untrained branch
    pub async fn run_to_finish(&self, user: &str, request: &str) -> WorkflowSession {
        let mut session = self.engine.start(user, request).unwrap();
        self.drive_to_gate(&mut session).await;
        self.train_and_decide(&mut session, GateDecision::UseOnce).await;
        let report = self.engine.process(&mut session).await.unwrap();
        assert_eq!(report.outcome, StepOutcome::Finished);
        session
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
