//! Engine state machine tests.
//!
//! Stub handlers stand in for the real analysis steps: they count execute
//! calls, consult the gate on the algorithm steps and submit one approval
//! record at the end, guarded by the context flag.

use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use wellflow_core::prelude::*;
use wellflow_core::{
    ApprovalStatus, BlockReason, EngineConfig, GateConfig, GatePrompt, MemoryApprovalSink,
    StepProgress,
};

#[derive(Default)]
struct Counter {
    executed: Mutex<HashMap<usize, usize>>,
}

struct Stub {
    id: StepId,
    counter: Arc<Counter>,
    sink: Arc<MemoryApprovalSink>,
    fail_render: bool,
}

#[async_trait::async_trait]
impl StepHandler for Stub {
    fn id(&self) -> StepId {
        self.id
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        *self.counter.executed.lock().entry(scope.index()).or_default() += 1;
        if self.id == StepId::ApprovalFlow && !scope.context.approval_saved() {
            self.sink.submit(ApprovalRecord {
                id: format!("TASK-{}", scope.index()),
                submitter: scope.user().to_string(),
                task_name: scope.context.task_name().unwrap_or_default().to_string(),
                submit_time: String::new(),
                file_path: String::new(),
                summary: String::new(),
                status: ApprovalStatus::Pending,
                feedback: String::new(),
            })?;
            scope.context.insert(keys::APPROVAL_SAVED, true);
        }
        Ok("ok".to_string())
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        if self.fail_render {
            return Err(StepError::failed("render exploded"));
        }
        if self.id.is_gated() {
            let view = scope.consult_gate().await?;
            if !view.visible {
                return Ok(false);
            }
            scope.context.insert(keys::RISK_SUMMARY, "stub summary");
        }
        scope.emit(self.id.display_name());
        Ok(true)
    }
}

struct Harness {
    engine: WorkflowEngine,
    counter: Arc<Counter>,
    sink: Arc<MemoryApprovalSink>,
    models: Arc<MemoryModelStore>,
}

fn harness_with(failing: Option<StepId>) -> Harness {
    let counter = Arc::new(Counter::default());
    let sink = Arc::new(MemoryApprovalSink::new());
    let models = Arc::new(MemoryModelStore::new());
    let mut registry = StepRegistry::new();
    for id in StepId::ALL {
        registry.register(Arc::new(Stub {
            id,
            counter: counter.clone(),
            sink: sink.clone(),
            fail_render: failing == Some(id),
        }));
    }
    let gate = ModelGate::with_config(models.clone(), GateConfig::immediate());
    let engine = WorkflowEngine::with_config(
        Arc::new(registry),
        Arc::new(gate),
        EngineConfig::immediate(),
    );
    Harness {
        engine,
        counter,
        sink,
        models,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

async fn drive_to_gate(h: &Harness, session: &mut WorkflowSession) {
    h.engine.process(session).await.unwrap();
    h.engine.confirm_data_load(session).unwrap();
    h.engine.process(session).await.unwrap();
}

/// Scenario: "七月的风险预测" runs through all eight steps and queues
/// exactly one pending approval for the risk task.
#[tokio::test]
async fn end_to_end_risk_scenario() {
    let h = harness();
    let mut session = h.engine.start("alice", "七月的风险预测").unwrap();
    assert_eq!(session.context().month(), Some(7));
    assert_eq!(session.context().target_file(), Some("7月+风险预测.csv"));
    assert_eq!(session.definition().get(5), Some(StepId::RiskAlgo));

    drive_to_gate(&h, &mut session).await;
    assert_eq!(session.state().current_step_index(), 5);

    h.engine
        .gate_action(&mut session, GateAction::Train { dataset: None })
        .await
        .unwrap();
    h.engine
        .gate_action(
            &mut session,
            GateAction::Decide {
                decision: GateDecision::UseOnce,
            },
        )
        .await
        .unwrap();

    let report = h.engine.process(&mut session).await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Finished);
    assert!(report.is_finished);
    assert_eq!(report.current_step_index, 8);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_name, "风险预测");
    assert_eq!(records[0].status, ApprovalStatus::Pending);

    let summary = session.final_summary().unwrap();
    assert!(summary.starts_with("**风险预测** 执行完成。"));
    assert!(summary.contains("stub summary"));
}

#[tokio::test]
async fn process_is_idempotent_while_blocked() {
    let h = harness();
    let mut session = h.engine.start("alice", "注水").unwrap();
    drive_to_gate(&h, &mut session).await;
    let snapshot = session.clone();

    for _ in 0..5 {
        let report = h.engine.process(&mut session).await.unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Blocked {
                index: 5,
                reason: BlockReason::AwaitingGate(GatePrompt::AwaitTraining),
            }
        );
    }
    assert_eq!(session.state(), snapshot.state());
    assert!(h.counter.executed.lock().values().all(|n| *n == 1));
}

#[tokio::test]
async fn data_load_waits_for_confirmation() {
    let h = harness();
    let mut session = h.engine.start("alice", "产量").unwrap();
    for _ in 0..3 {
        let report = h.engine.process(&mut session).await.unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Blocked {
                index: 0,
                reason: BlockReason::AwaitingConfirm,
            }
        );
    }
    assert_eq!(h.counter.executed.lock().get(&0), Some(&1));
    assert_eq!(session.progress()[0].1, StepProgress::Active);
}

#[tokio::test]
async fn save_private_carries_into_next_workflow() {
    let h = harness();
    let mut first = h.engine.start("alice", "8月产量").unwrap();
    drive_to_gate(&h, &mut first).await;
    h.engine
        .gate_action(&mut first, GateAction::Train { dataset: None })
        .await
        .unwrap();
    h.engine
        .gate_action(
            &mut first,
            GateAction::Decide {
                decision: GateDecision::SavePrivate,
            },
        )
        .await
        .unwrap();
    h.engine.process(&mut first).await.unwrap();
    assert!(first.is_finished());

    let mut second = h.engine.start("alice", "9月产量").unwrap();
    drive_to_gate(&h, &mut second).await;
    let report = h.engine.process(&mut second).await.unwrap();
    assert_eq!(
        report.outcome,
        StepOutcome::Blocked {
            index: 5,
            reason: BlockReason::AwaitingGate(GatePrompt::AwaitMode),
        }
    );
    assert_eq!(
        h.models.model_status("alice", ModelKey::Trend).unwrap(),
        wellflow_core::ModelStatus::Private
    );
}

#[tokio::test]
async fn finished_workflow_replays_read_only() {
    let h = harness();
    let mut session = h.engine.start("alice", "风险").unwrap();
    drive_to_gate(&h, &mut session).await;
    h.engine
        .gate_action(&mut session, GateAction::Train { dataset: None })
        .await
        .unwrap();
    h.engine
        .gate_action(
            &mut session,
            GateAction::Decide {
                decision: GateDecision::UseOnce,
            },
        )
        .await
        .unwrap();
    h.engine.process(&mut session).await.unwrap();
    let executed = h.counter.executed.lock().clone();

    let report = h.engine.process(&mut session).await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Finished);
    assert_eq!(report.rendered.len(), 8);
    assert!(report.rendered.iter().all(|r| r.visible));
    assert_eq!(*h.counter.executed.lock(), executed);
    assert_eq!(h.sink.len(), 1);

    assert!(matches!(
        h.engine
            .gate_action(&mut session, GateAction::Train { dataset: None })
            .await,
        Err(EngineError::Finished)
    ));
    assert!(matches!(
        h.engine.confirm_data_load(&mut session),
        Err(EngineError::Finished)
    ));
}

#[tokio::test]
async fn failed_step_halts_without_retry() {
    let h = harness_with(Some(StepId::FeatureEng));
    let mut session = h.engine.start("alice", "产量").unwrap();
    h.engine.process(&mut session).await.unwrap();
    h.engine.confirm_data_load(&mut session).unwrap();

    let report = h.engine.process(&mut session).await.unwrap();
    let StepOutcome::Failed(failure) = report.outcome else {
        panic!("expected failure, got {:?}", report.outcome);
    };
    assert_eq!(failure.index, 2);
    assert_eq!(failure.step, StepId::FeatureEng);
    assert_eq!(failure.message, "render exploded");

    let again = h.engine.process(&mut session).await.unwrap();
    assert!(matches!(again.outcome, StepOutcome::Failed(_)));
    assert_eq!(again.current_step_index, 2);
    assert_eq!(h.counter.executed.lock().get(&2), Some(&1));

    let err = h.engine.confirm_data_load(&mut session).unwrap_err();
    assert!(matches!(err, EngineError::Halted { index: 2, .. }));
    assert!(!err.is_recoverable());
}

#[derive(Debug, Clone)]
enum Signal {
    Process,
    Confirm,
    Train,
    Mode(bool),
    FineTune,
    Decide(u8),
}

fn signal() -> impl Strategy<Value = Signal> {
    prop_oneof![
        3 => Just(Signal::Process),
        1 => Just(Signal::Confirm),
        1 => Just(Signal::Train),
        1 => any::<bool>().prop_map(Signal::Mode),
        1 => Just(Signal::FineTune),
        1 => (0u8..4).prop_map(Signal::Decide),
    ]
}

fn to_action(signal: &Signal) -> Option<GateAction> {
    let action = match signal {
        Signal::Train => GateAction::Train { dataset: None },
        Signal::Mode(direct) => GateAction::ChooseMode {
            mode: if *direct {
                PrivateMode::Direct
            } else {
                PrivateMode::FineTune
            },
        },
        Signal::FineTune => GateAction::StartFineTune { dataset: None },
        Signal::Decide(n) => GateAction::Decide {
            decision: match n {
                0 => GateDecision::SavePrivate,
                1 => GateDecision::UseOnce,
                2 => GateDecision::SaveVersion,
                _ => GateDecision::Discard,
            },
        },
        Signal::Process | Signal::Confirm => return None,
    };
    Some(action)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant: whatever the user sends, the index never moves backwards,
    /// finishing happens exactly at the workflow length, no step executes
    /// twice and no more than one approval is queued.
    #[test]
    fn prop_engine_invariants(
        request in prop_oneof![Just("风险"), Just("注水"), Just("产量"), Just("十二月注水")],
        private in any::<bool>(),
        signals in prop::collection::vec(signal(), 0..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = harness();
            if private {
                for key in ModelKey::ALL {
                    h.models.save_private("alice", key).unwrap();
                }
            }
            let mut session = h.engine.start("alice", request).unwrap();
            let len = session.definition().len();
            let mut last = session.state().current_step_index();

            for signal in &signals {
                match signal {
                    Signal::Process => {
                        h.engine.process(&mut session).await.unwrap();
                    }
                    Signal::Confirm => {
                        let _ = h.engine.confirm_data_load(&mut session);
                    }
                    other => {
                        if let Some(action) = to_action(other) {
                            let _ = h.engine.gate_action(&mut session, action).await;
                        }
                    }
                }
                let index = session.state().current_step_index();
                prop_assert!(index >= last);
                prop_assert!(index <= len);
                prop_assert_eq!(session.is_finished(), index == len);
                last = index;
            }

            prop_assert!(h.counter.executed.lock().values().all(|n| *n == 1));
            prop_assert!(h.sink.len() <= 1);
            prop_assert_eq!(h.sink.len() == 1, session.is_finished());
            Ok(())
        })?;
    }
}
