/// Command execution boundary: run a shell command to completion and
/// hand back its exit status and captured output.
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Captured result of a command that was launched and ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status. A child killed by a signal reports `128 + signo`.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Outcome of one executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(CommandOutput),
    /// The command could not be started or waited on at all.
    LaunchFailed { reason: String },
}

/// Runs commands on behalf of the monitor loop and trigger engine.
///
/// Calls are sequential; the loop never has two executions in flight.
pub trait Executor {
    fn execute(&self, command: &str) -> impl Future<Output = ExecutionOutcome>;
}

impl<T: Executor + ?Sized> Executor for &T {
    fn execute(&self, command: &str) -> impl Future<Output = ExecutionOutcome> {
        (**self).execute(command)
    }
}

/// Executes commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: PathBuf,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl ShellExecutor {
    /// Use a different shell binary (must accept `-c <command>`).
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Executor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecutionOutcome {
        let start = Instant::now();

        // kill_on_drop: an interrupted cycle drops this future mid-wait.
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(command, error = %e, "failed to spawn command");
                return ExecutionOutcome::LaunchFailed {
                    reason: e.to_string(),
                };
            }
        };

        let pid = child.id().unwrap_or(0);
        tracing::debug!(pid, command, "command started");

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!(pid, error = %e, "failed to collect command output");
                return ExecutionOutcome::LaunchFailed {
                    reason: e.to_string(),
                };
            }
        };

        let status = match (output.status.code(), output.status.signal()) {
            (Some(code), _) => code,
            (None, Some(signo)) => {
                let name = nix::sys::signal::Signal::try_from(signo)
                    .map(|s| s.as_str())
                    .unwrap_or("unknown signal");
                tracing::debug!(pid, signal = name, "command terminated by signal");
                128 + signo
            }
            (None, None) => -1,
        };

        tracing::debug!(
            pid,
            status,
            duration_ms = start.elapsed().as_millis() as u64,
            "command completed"
        );

        ExecutionOutcome::Completed(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
