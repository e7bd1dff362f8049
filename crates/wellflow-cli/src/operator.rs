//! Who answers the engine's checkpoints
//!
//! A workflow stops at the data-load confirmation and at each gate prompt.
//! [`AutoPolicy`] answers from a fixed policy; [`ConsoleOperator`] asks on
//! the terminal.

use anyhow::{bail, Context};
use std::io::{BufRead, Write};
use std::str::FromStr;
use wellflow_core::{GateAction, GateDecision, GatePrompt, ModelStatus, PrivateMode};

/// Answers to the engine's checkpoints
pub trait Operator {
    /// Whether to proceed after the data file was loaded
    ///
    /// # Errors
    /// Input failure.
    fn confirm_data_load(&mut self, file: &str) -> anyhow::Result<bool>;

    /// Action for a gate prompt; `None` cancels the workflow
    ///
    /// # Errors
    /// Input failure.
    fn gate_action(
        &mut self,
        prompt: GatePrompt,
        branch: ModelStatus,
    ) -> anyhow::Result<Option<GateAction>>;
}

/// Non-interactive answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPolicy {
    /// Train and save to the private library; save new versions
    Save,
    /// Train and use once; discard fine-tunes
    Once,
    /// Private models run directly
    Direct,
    /// Private models are fine-tuned and the new version kept
    FineTune,
}

impl AutoPolicy {
    /// Policy names accepted on the command line
    pub const NAMES: [&'static str; 4] = ["save", "once", "direct", "finetune"];

    /// Action for a prompt, `None` when nothing is asked
    #[must_use]
    pub fn action(self, prompt: GatePrompt, branch: ModelStatus) -> Option<GateAction> {
        match prompt {
            GatePrompt::AwaitTraining => Some(GateAction::Train { dataset: None }),
            GatePrompt::AwaitMode => Some(GateAction::ChooseMode {
                mode: if self == Self::FineTune {
                    PrivateMode::FineTune
                } else {
                    PrivateMode::Direct
                },
            }),
            GatePrompt::AwaitFineTune => Some(GateAction::StartFineTune { dataset: None }),
            GatePrompt::AwaitDecision => Some(GateAction::Decide {
                decision: self.decision(branch),
            }),
            GatePrompt::Replay | GatePrompt::Ready => None,
        }
    }

    fn decision(self, branch: ModelStatus) -> GateDecision {
        let keep = matches!(self, Self::Save | Self::FineTune);
        match (branch, keep) {
            (ModelStatus::Untrained, true) => GateDecision::SavePrivate,
            (ModelStatus::Untrained, false) => GateDecision::UseOnce,
            (ModelStatus::Private, true) => GateDecision::SaveVersion,
            (ModelStatus::Private, false) => GateDecision::Discard,
        }
    }
}

impl FromStr for AutoPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "save" => Ok(Self::Save),
            "once" => Ok(Self::Once),
            "direct" => Ok(Self::Direct),
            "finetune" | "fine-tune" => Ok(Self::FineTune),
            other => Err(format!(
                "unknown policy {other}, expected one of {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl Operator for AutoPolicy {
    fn confirm_data_load(&mut self, file: &str) -> anyhow::Result<bool> {
        tracing::debug!(file, "data load confirmed by policy");
        Ok(true)
    }

    fn gate_action(
        &mut self,
        prompt: GatePrompt,
        branch: ModelStatus,
    ) -> anyhow::Result<Option<GateAction>> {
        Ok(self.action(prompt, branch))
    }
}

/// Terminal prompts over any reader and writer
pub struct ConsoleOperator<R, W> {
    input: R,
    output: W,
}

impl ConsoleOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompt on stdin / stdout
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    /// Prompt on the given streams
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> anyhow::Result<String> {
        write!(self.output, "{question} ")?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            bail!("input closed");
        }
        Ok(line.trim().to_string())
    }

    fn choose(&mut self, question: &str, options: &[(&str, &str)]) -> anyhow::Result<Option<usize>> {
        writeln!(self.output, "{question}")?;
        for (i, (_, label)) in options.iter().enumerate() {
            writeln!(self.output, "  [{}] {label}", i + 1)?;
        }
        writeln!(self.output, "  [q] 取消")?;
        loop {
            let answer = self.ask(">")?;
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            let picked = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|n| *n < options.len())
                .or_else(|| options.iter().position(|(key, _)| *key == answer));
            if picked.is_some() {
                return Ok(picked);
            }
            writeln!(self.output, "无效选项: {answer}")?;
        }
    }

    fn dataset(&mut self) -> anyhow::Result<Option<String>> {
        let name = self.ask("数据集文件名 (回车跳过):")?;
        Ok(Some(name).filter(|n| !n.is_empty()))
    }
}

impl<R: BufRead, W: Write> Operator for ConsoleOperator<R, W> {
    fn confirm_data_load(&mut self, file: &str) -> anyhow::Result<bool> {
        let picked = self.choose(
            &format!("已装载 {file}，是否继续执行？"),
            &[("y", "确认无误，继续执行")],
        )?;
        Ok(picked.is_some())
    }

    fn gate_action(
        &mut self,
        prompt: GatePrompt,
        branch: ModelStatus,
    ) -> anyhow::Result<Option<GateAction>> {
        let action = match prompt {
            GatePrompt::AwaitTraining => {
                match self.choose("当前使用公有模型，需先进行训练。", &[("t", "开始训练")])? {
                    Some(_) => Some(GateAction::Train {
                        dataset: self.dataset()?,
                    }),
                    None => None,
                }
            }
            GatePrompt::AwaitMode => self
                .choose(
                    "检测到私有模型，请选择使用方式：",
                    &[("f", "增量微调后使用"), ("d", "直接使用")],
                )?
                .map(|i| GateAction::ChooseMode {
                    mode: if i == 0 {
                        PrivateMode::FineTune
                    } else {
                        PrivateMode::Direct
                    },
                }),
            GatePrompt::AwaitFineTune => {
                match self.choose("上传校准数据后开始微调。", &[("s", "开始微调")])? {
                    Some(_) => Some(GateAction::StartFineTune {
                        dataset: self.dataset()?,
                    }),
                    None => None,
                }
            }
            GatePrompt::AwaitDecision => {
                let (keep, discard) = match branch {
                    ModelStatus::Untrained => (
                        (GateDecision::SavePrivate, "保存至私有模型库"),
                        (GateDecision::UseOnce, "仅本次使用"),
                    ),
                    ModelStatus::Private => (
                        (GateDecision::SaveVersion, "保存并更新版本"),
                        (GateDecision::Discard, "放弃本次微调"),
                    ),
                };
                self.choose("训练完成，如何处理模型？", &[("s", keep.1), ("u", discard.1)])?
                    .map(|i| GateAction::Decide {
                        decision: if i == 0 { keep.0 } else { discard.0 },
                    })
            }
            GatePrompt::Replay | GatePrompt::Ready => None,
        };
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_parse() {
        for name in AutoPolicy::NAMES {
            assert!(name.parse::<AutoPolicy>().is_ok());
        }
        assert_eq!("Fine-Tune".parse::<AutoPolicy>(), Ok(AutoPolicy::FineTune));
        assert!("later".parse::<AutoPolicy>().is_err());
    }

    #[test]
    fn policy_decisions_follow_branch() {
        let decide = |policy: AutoPolicy, branch| match policy.action(GatePrompt::AwaitDecision, branch) {
            Some(GateAction::Decide { decision }) => decision,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decide(AutoPolicy::Save, ModelStatus::Untrained), GateDecision::SavePrivate);
        assert_eq!(decide(AutoPolicy::Once, ModelStatus::Untrained), GateDecision::UseOnce);
        assert_eq!(decide(AutoPolicy::FineTune, ModelStatus::Private), GateDecision::SaveVersion);
        assert_eq!(decide(AutoPolicy::Direct, ModelStatus::Private), GateDecision::Discard);
        assert_eq!(AutoPolicy::Once.action(GatePrompt::Ready, ModelStatus::Private), None);
    }

    #[test]
    fn console_retries_invalid_choice() {
        let mut out = Vec::<u8>::new();
        let mut console = ConsoleOperator::new("9\nd\n".as_bytes(), &mut out);
        let action = console
            .gate_action(GatePrompt::AwaitMode, ModelStatus::Private)
            .unwrap();
        assert_eq!(
            action,
            Some(GateAction::ChooseMode {
                mode: PrivateMode::Direct
            })
        );
        assert!(String::from_utf8(out).unwrap().contains("无效选项: 9"));
    }

    #[test]
    fn console_training_with_dataset() {
        let mut out = Vec::<u8>::new();
        let mut console = ConsoleOperator::new("1\njuly.csv\n".as_bytes(), &mut out);
        let action = console
            .gate_action(GatePrompt::AwaitTraining, ModelStatus::Untrained)
            .unwrap();
        assert_eq!(
            action,
            Some(GateAction::Train {
                dataset: Some("july.csv".to_string())
            })
        );
    }

    #[test]
    fn console_quit_and_closed_input() {
        let mut out = Vec::<u8>::new();
        let mut console = ConsoleOperator::new("q\n".as_bytes(), &mut out);
        assert!(!console.confirm_data_load("7月+产量预测.csv").unwrap());
        assert!(console.confirm_data_load("x").is_err());
    }
}
