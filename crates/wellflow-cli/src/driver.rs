//! Runs a workflow session to the end against an [`Operator`]

use crate::operator::Operator;
use std::collections::BTreeMap;
use std::io::Write;
use wellflow_core::{
    BlockReason, EngineError, ModelStatus, RenderedStep, StepOutcome, WorkflowEngine, WorkflowSession,
};

/// How a driven session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Every step passed
    Finished,
    /// The operator cancelled at a checkpoint
    Cancelled {
        /// Active step index when cancelled
        index: usize,
    },
    /// A step failed and the session halted
    Failed {
        /// Failed step index
        index: usize,
        /// Failure message
        message: String,
    },
}

/// Prints step output as it changes
#[derive(Debug, Default)]
pub struct Transcript {
    shown: BTreeMap<usize, Vec<String>>,
}

impl Transcript {
    /// Empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every step whose lines differ from what was last written
    ///
    /// # Errors
    /// Write failure.
    pub fn write(&mut self, out: &mut impl Write, rendered: &[RenderedStep]) -> std::io::Result<()> {
        for step in rendered {
            if self.shown.get(&step.index) == Some(&step.lines) {
                continue;
            }
            writeln!(
                out,
                "\n{} [{}] {}",
                step.step.icon(),
                step.index + 1,
                step.step.display_name()
            )?;
            if let Some(status) = &step.status {
                writeln!(out, "  {status}")?;
            }
            for line in &step.lines {
                writeln!(out, "  {line}")?;
            }
            self.shown.insert(step.index, step.lines.clone());
        }
        Ok(())
    }
}

/// Drive `session` until it finishes, fails or the operator cancels
///
/// Gate actions refused for the episode's phase or branch are reported and
/// the prompt is asked again; any other engine error ends the drive.
///
/// # Errors
/// Engine errors other than refused gate actions, operator input failure
/// or output failure.
pub async fn drive(
    engine: &WorkflowEngine,
    session: &mut WorkflowSession,
    operator: &mut dyn Operator,
    out: &mut impl Write,
) -> anyhow::Result<DriveOutcome> {
    let mut transcript = Transcript::new();
    loop {
        let report = engine.process(session).await?;
        transcript.write(out, &report.rendered)?;

        match report.outcome {
            StepOutcome::Finished => return Ok(DriveOutcome::Finished),
            StepOutcome::Failed(failure) => {
                writeln!(out, "\n❌ {}: {}", failure.step.display_name(), failure.message)?;
                return Ok(DriveOutcome::Failed {
                    index: failure.index,
                    message: failure.message,
                });
            }
            StepOutcome::Advanced { .. } => {}
            StepOutcome::Blocked {
                index,
                reason: BlockReason::AwaitingConfirm,
            } => {
                let file = session.context().target_file().unwrap_or_default().to_string();
                if !operator.confirm_data_load(&file)? {
                    return Ok(DriveOutcome::Cancelled { index });
                }
                engine.confirm_data_load(session)?;
            }
            StepOutcome::Blocked {
                index,
                reason: BlockReason::AwaitingGate(prompt),
            } => {
                let branch = session
                    .episode(index)
                    .and_then(|e| e.branch)
                    .unwrap_or(ModelStatus::Untrained);
                let Some(action) = operator.gate_action(prompt, branch)? else {
                    return Ok(DriveOutcome::Cancelled { index });
                };
                match engine.gate_action(session, action).await {
                    Ok(view) => {
                        for note in &view.notes {
                            writeln!(out, "  {note}")?;
                        }
                    }
                    Err(EngineError::Gate(err)) if err.is_user_error() => {
                        writeln!(out, "  ⚠️ {err}")?;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellflow_core::StepId;

    #[test]
    fn transcript_skips_unchanged_steps() {
        let mut step = RenderedStep {
            index: 0,
            step: StepId::DataLoader,
            visible: true,
            status: Some("ok".to_string()),
            lines: vec!["a".to_string()],
        };
        let mut transcript = Transcript::new();
        let mut out = Vec::<u8>::new();
        transcript.write(&mut out, std::slice::from_ref(&step)).unwrap();
        transcript.write(&mut out, std::slice::from_ref(&step)).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert_eq!(text.matches("  a").count(), 1);

        step.lines.push("b".to_string());
        transcript.write(&mut out, std::slice::from_ref(&step)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  b"));
    }
}
