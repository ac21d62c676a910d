use crate::Argv;
use std::fmt;
use std::time::Duration;

/// Outcome of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    UnknownCommand,
    /// A step failed to launch or exited non-zero; later steps never ran
    StepFailed { step: Argv, reason: String },
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "ok",
            ExecutionStatus::UnknownCommand => "unknown_command",
            ExecutionStatus::StepFailed { .. } => "step_failed",
        }
    }
}

/// Produced once per job by the executor and consumed once by the notifier.
///
/// The `Display` rendering is what gets posted to the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command_name: String,
    pub status: ExecutionStatus,
    pub captured_output: Vec<String>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn unknown(command_name: impl Into<String>) -> Self {
        ExecutionResult {
            command_name: command_name.into(),
            status: ExecutionStatus::UnknownCommand,
            captured_output: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.command_name;
        match &self.status {
            ExecutionStatus::UnknownCommand => write!(f, "[{}] unknown command", name),
            ExecutionStatus::StepFailed { step, reason } => {
                write!(f, "[{}] error: `{}` {}", name, step.join(" "), reason)
            }
            ExecutionStatus::Ok => {
                write!(f, "[{}] OK / {:.1}s", name, self.elapsed.as_secs_f64())?;
                if !self.captured_output.is_empty() {
                    write!(f, "\n```\n{}\n```", self.captured_output.join("\n"))?;
                }
                Ok(())
            }
        }
    }
}
