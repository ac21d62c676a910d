use async_trait::async_trait;
use misaki_core::{CommandRegistry, ExecutionResult, ExecutionStatus};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What a finished child process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Empty unless output was captured
    pub stdout: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn failure_reason(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Launches one step of a command
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `argv` to completion. `Err` means the process could not be started.
    async fn execute(&self, argv: &[String], capture: bool) -> io::Result<StepOutput>;
}

/// Runs steps as real child processes, without a shell
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessRunner;

#[async_trait]
impl ProcessRunner for OsProcessRunner {
    async fn execute(&self, argv: &[String], capture: bool) -> io::Result<StepOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if capture {
            let output = command.stdout(Stdio::piped()).output().await?;
            Ok(StepOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        } else {
            let status = command.stdout(Stdio::null()).status().await?;
            Ok(StepOutput {
                exit_code: status.code(),
                stdout: String::new(),
            })
        }
    }
}

/// Runs registered commands step by step, stopping at the first failure
pub struct CommandExecutor {
    registry: Arc<CommandRegistry>,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandExecutor {
    pub fn new(registry: Arc<CommandRegistry>, runner: Arc<dyn ProcessRunner>) -> Self {
        CommandExecutor { registry, runner }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub async fn run(&self, name: &str) -> ExecutionResult {
        let Some(command) = self.registry.find(name) else {
            info!("Unknown command: {}", name);
            return ExecutionResult::unknown(name);
        };

        let start = Instant::now();
        let mut captured_output = Vec::new();

        for step in &command.steps {
            debug!("[{}] running {:?}", name, step);

            let failure = match self.runner.execute(step, command.capture_output).await {
                Ok(output) if output.success() => {
                    if command.capture_output {
                        captured_output.push(strip_newline(output.stdout));
                    }
                    None
                }
                Ok(output) => Some(output.failure_reason()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                error!("[{}] step {:?} failed: {}", name, step, reason);
                return ExecutionResult {
                    command_name: name.to_string(),
                    status: ExecutionStatus::StepFailed {
                        step: step.clone(),
                        reason,
                    },
                    captured_output,
                    elapsed: start.elapsed(),
                };
            }
        }

        let elapsed = start.elapsed();
        info!("[{}] finished in {:.1}s", name, elapsed.as_secs_f64());

        ExecutionResult {
            command_name: name.to_string(),
            status: ExecutionStatus::Ok,
            captured_output,
            elapsed,
        }
    }
}

fn strip_newline(mut stdout: String) -> String {
    if stdout.ends_with('\n') {
        stdout.pop();
    }
    stdout
}

#[cfg(test)]
mod tests {
    use super::*;
    use misaki_core::Command;
    use parking_lot::Mutex;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    /// Fails every step whose program is "false"; echoes the rest
    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn execute(&self, argv: &[String], _capture: bool) -> io::Result<StepOutput> {
            self.calls.lock().push(argv.to_vec());
            match argv[0].as_str() {
                "false" => Ok(StepOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                }),
                "missing" => Err(io::Error::new(io::ErrorKind::NotFound, "No such file")),
                _ => Ok(StepOutput {
                    exit_code: Some(0),
                    stdout: format!("{}\n", argv[1..].join(" ")),
                }),
            }
        }
    }

    fn executor(commands: Vec<Command>) -> (CommandExecutor, Arc<FakeRunner>) {
        let runner = Arc::new(FakeRunner::default());
        let registry = Arc::new(CommandRegistry::new(commands).unwrap());
        (CommandExecutor::new(registry, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_ping_captures_output() {
        let (executor, _) = executor(vec![
            Command::new("ping", vec![argv(&["echo", "hi"])]).with_output(true)
        ]);

        let result = executor.run("ping").await;
        assert!(result.is_success());
        assert_eq!(result.captured_output, vec!["hi"]);
        assert!(result.to_string().starts_with("[ping] OK / "));
        assert!(result.to_string().ends_with("s\n```\nhi\n```"));
    }

    #[tokio::test]
    async fn test_output_not_captured_when_disabled() {
        let (executor, _) = executor(vec![Command::new("quiet", vec![argv(&["echo", "hi"])])]);

        let result = executor.run("quiet").await;
        assert!(result.is_success());
        assert!(result.captured_output.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_runs_nothing() {
        let (executor, runner) = executor(vec![]);

        let result = executor.run("nope").await;
        assert_eq!(result.to_string(), "[nope] unknown command");
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let (executor, runner) = executor(vec![Command::new(
            "deploy",
            vec![
                argv(&["echo", "one"]),
                argv(&["false"]),
                argv(&["echo", "three"]),
            ],
        )
        .with_output(true)]);

        let result = executor.run("deploy").await;
        assert_eq!(
            result.status,
            ExecutionStatus::StepFailed {
                step: argv(&["false"]),
                reason: "exit status: 1".to_string(),
            }
        );
        assert_eq!(result.captured_output, vec!["one"]);
        assert_eq!(result.to_string(), "[deploy] error: `false` exit status: 1");

        // The third step never ran
        assert_eq!(runner.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_launch_failure_is_step_failure() {
        let (executor, _) = executor(vec![Command::new("broken", vec![argv(&["missing", "x"])])]);

        let result = executor.run("broken").await;
        match result.status {
            ExecutionStatus::StepFailed { step, reason } => {
                assert_eq!(step, argv(&["missing", "x"]));
                assert!(reason.contains("No such file"));
            }
            other => panic!("Expected StepFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_at_most_one_newline() {
        assert_eq!(strip_newline("hi\n".to_string()), "hi");
        assert_eq!(strip_newline("hi\n\n".to_string()), "hi\n");
        assert_eq!(strip_newline("hi".to_string()), "hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_os_runner_echo() {
        let output = OsProcessRunner
            .execute(&argv(&["echo", "hi"]), true)
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hi\n");

        let output = OsProcessRunner.execute(&argv(&["false"]), false).await.unwrap();
        assert!(!output.success());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_os_runner_discards_uncaptured_stdout() {
        // Succeeds only when the shell's stdout points at /dev/null
        let check = r#"[ "$(readlink /proc/$$/fd/1)" = /dev/null ]"#;
        let output = OsProcessRunner
            .execute(&argv(&["sh", "-c", check]), false)
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_os_runner_missing_program() {
        let result = OsProcessRunner
            .execute(&argv(&["/nonexistent/misaki-program"]), false)
            .await;
        assert!(result.is_err());
    }
}
