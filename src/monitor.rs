/// Monitor loop: execute the command, log and classify its output, sleep,
/// repeat, until the timer expires, the user interrupts, or the loop's
/// own bookkeeping fails.
use crate::config::MonitorConfig;
use crate::executor::{ExecutionOutcome, Executor};
use crate::sink::{record, timestamp, LogSink, Tag};
use crate::summary::{Summary, TerminationReason};
use crate::trigger::{PatternError, TriggerEngine, TriggerOutcome};
use chrono::Local;
use std::fmt;
use std::future::Future;
use std::time::Instant;

/// Loop states. Only the `Stopped*` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Init,
    Running,
    Sleeping,
    Stopping,
    StoppedTimer,
    StoppedUser,
    StoppedFatal,
}

/// A recorded, non-fatal command failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    LaunchFailure { reason: String },
    NonZeroExit { status: i32 },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::LaunchFailure { reason } => {
                write!(f, "code=launch-failure, msg={reason}")
            }
            CommandError::NonZeroExit { status } => {
                write!(f, "code={status}, msg=Non-zero exit.")
            }
        }
    }
}

/// A defect in the loop's own bookkeeping. Fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopFault {
    CounterOverflow { counter: &'static str },
}

impl fmt::Display for LoopFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopFault::CounterOverflow { counter } => {
                write!(f, "summary counter '{counter}' overflowed")
            }
        }
    }
}

impl std::error::Error for LoopFault {}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    pub state: MonitorState,
    pub fault: Option<LoopFault>,
}

impl RunReport {
    /// Process exit code: 1 for a fatal loop error, otherwise 0.
    pub fn exit_code(&self) -> u8 {
        if self.fault.is_some() {
            1
        } else {
            0
        }
    }
}

pub struct Monitor<E> {
    config: MonitorConfig,
    executor: E,
    sink: LogSink,
    trigger: TriggerEngine,
    summary: Summary,
    state: MonitorState,
}

/// Split command output into lines, dropping trailing blank lines.
fn output_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn bump(counter: &mut u64, name: &'static str) -> Result<(), LoopFault> {
    *counter = counter
        .checked_add(1)
        .ok_or(LoopFault::CounterOverflow { counter: name })?;
    Ok(())
}

impl<E: Executor> Monitor<E> {
    /// Build the loop and its collaborators. Fails before anything runs
    /// if the trigger pattern does not compile.
    pub fn new(config: MonitorConfig, executor: E) -> Result<Self, PatternError> {
        let sink = LogSink::new(config.log_path.clone(), config.log_max_bytes);
        Self::with_sink(config, executor, sink)
    }

    pub(crate) fn with_sink(
        config: MonitorConfig,
        executor: E,
        sink: LogSink,
    ) -> Result<Self, PatternError> {
        let trigger = TriggerEngine::new(
            config.pattern.as_deref(),
            config.trigger_command.as_deref(),
        )?;
        Ok(Self {
            config,
            executor,
            sink,
            trigger,
            summary: Summary::default(),
            state: MonitorState::Init,
        })
    }

    fn transition(&mut self, next: MonitorState) {
        tracing::debug!(from = ?self.state, to = ?next, "monitor state change");
        self.state = next;
    }

    /// Run until a terminal state is reached, then render the summary.
    ///
    /// `shutdown` resolving is treated as a user interrupt; it is raced
    /// against both the command execution and the sleep.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> RunReport {
        tokio::pin!(shutdown);

        self.summary.start(Local::now());
        let started = Instant::now();
        tracing::info!(
            command = %self.config.command,
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_ms = ?self.config.timeout.map(|t| t.as_millis() as u64),
            log = ?self.sink.path(),
            "monitor starting"
        );

        let mut fault = None;
        let (reason, terminal) = loop {
            self.transition(MonitorState::Running);

            if let Some(limit) = self.config.timeout {
                if started.elapsed() >= limit {
                    break (TerminationReason::TimerExpired, MonitorState::StoppedTimer);
                }
            }

            let cycle = tokio::select! {
                r = self.cycle() => r,
                _ = &mut shutdown => {
                    break (TerminationReason::ManualTermination, MonitorState::StoppedUser);
                }
            };

            if let Err(e) = cycle {
                eprintln!(
                    "[{}] CRITICAL ERROR: {} stopped. code=-1, msg={e}",
                    timestamp(),
                    env!("CARGO_PKG_NAME")
                );
                tracing::error!(error = %e, "monitor loop fault");
                fault = Some(e);
                break (TerminationReason::UnhandledException, MonitorState::StoppedFatal);
            }

            self.transition(MonitorState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = &mut shutdown => {
                    break (TerminationReason::ManualTermination, MonitorState::StoppedUser);
                }
            }
        };

        self.transition(MonitorState::Stopping);
        if reason == TerminationReason::ManualTermination {
            self.sink.log(&record(
                Tag::Info,
                "Execution manually terminated by the user.",
            ));
        }

        self.summary.termination = reason;
        self.summary.stop(Local::now());
        for line in self.summary.render() {
            self.sink.log(&line);
        }
        self.transition(terminal);
        tracing::info!(
            executions = self.summary.total_executions,
            termination = %reason,
            "monitor stopped"
        );

        RunReport {
            summary: self.summary.clone(),
            state: self.state,
            fault,
        }
    }

    /// One iteration: execute, count, log and classify output.
    async fn cycle(&mut self) -> Result<(), LoopFault> {
        let outcome = self.executor.execute(&self.config.command).await;
        bump(&mut self.summary.total_executions, "total_executions")?;

        let output = match outcome {
            ExecutionOutcome::LaunchFailed { reason } => {
                return self.command_error(CommandError::LaunchFailure { reason });
            }
            ExecutionOutcome::Completed(output) => output,
        };

        self.trigger.begin_iteration();
        for (tag, text) in [(Tag::Stdout, &output.stdout), (Tag::Stderr, &output.stderr)] {
            for line in output_lines(text) {
                self.sink.log(&record(tag, line));

                let observed = self
                    .trigger
                    .observe(line, &self.executor, &mut self.sink)
                    .await;
                self.summary.regex_matches = self
                    .summary
                    .regex_matches
                    .checked_add(observed.matches)
                    .ok_or(LoopFault::CounterOverflow {
                        counter: "regex_matches",
                    })?;

                match observed.trigger {
                    Some(TriggerOutcome::Succeeded) => {
                        bump(&mut self.summary.trigger_successes, "trigger_successes")?
                    }
                    Some(TriggerOutcome::Failed { status }) => {
                        tracing::debug!(?status, "trigger command failed");
                        bump(&mut self.summary.trigger_failures, "trigger_failures")?
                    }
                    None => {}
                }
            }
        }

        if !output.success() {
            self.command_error(CommandError::NonZeroExit {
                status: output.status,
            })?;
        }
        Ok(())
    }

    fn command_error(&mut self, error: CommandError) -> Result<(), LoopFault> {
        tracing::debug!(command = %self.config.command, %error, "command error");
        self.sink.log(&format!(
            "[{}] ERROR running '{}': {error}",
            timestamp(),
            self.config.command
        ));
        bump(&mut self.summary.exceptions, "exceptions")
    }
}
