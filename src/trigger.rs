/// Pattern trigger: count regex matches in command output and run a
/// secondary command at most once per monitoring iteration.
use crate::executor::{ExecutionOutcome, Executor};
use crate::sink::{record, LogSink, Tag};
use regex::Regex;

/// The trigger pattern failed to compile.
#[derive(Debug)]
pub struct PatternError {
    pub pattern: String,
    pub source: regex::Error,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid regex pattern '{}': {}", self.pattern, self.source)
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// How the trigger command fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Succeeded,
    /// Non-zero exit, or `None` when it could not be launched.
    Failed { status: Option<i32> },
}

/// What a single `observe` call saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    /// Matches found in this line only.
    pub matches: u64,
    /// Set when this call fired the trigger command.
    pub trigger: Option<TriggerOutcome>,
}

pub struct TriggerEngine {
    pattern: Option<Regex>,
    command: Option<String>,
    total_matches: u64,
    fired: bool,
}

impl TriggerEngine {
    /// Compile `pattern`. `None` or an empty pattern makes the engine inert.
    pub fn new(pattern: Option<&str>, command: Option<&str>) -> Result<Self, PatternError> {
        let pattern = match pattern.filter(|p| !p.is_empty()) {
            Some(p) => Some(Regex::new(p).map_err(|e| PatternError {
                pattern: p.to_string(),
                source: e,
            })?),
            None => None,
        };
        Ok(Self {
            pattern,
            command: command.map(str::to_string),
            total_matches: 0,
            fired: false,
        })
    }

    /// Cumulative matches since construction.
    pub fn total_matches(&self) -> u64 {
        self.total_matches
    }

    /// Re-arm the trigger for a new iteration.
    pub fn begin_iteration(&mut self) {
        self.fired = false;
    }

    /// Count matches in `line`, firing the trigger command on the first
    /// matching line of the iteration.
    pub async fn observe<E: Executor>(
        &mut self,
        line: &str,
        executor: &E,
        sink: &mut LogSink,
    ) -> Observation {
        let Some(pattern) = &self.pattern else {
            return Observation::default();
        };

        let matches = pattern.find_iter(line).count() as u64;
        if matches == 0 {
            return Observation::default();
        }
        self.total_matches = self.total_matches.saturating_add(matches);

        let trigger = match &self.command {
            Some(command) if !self.fired => {
                self.fired = true;
                Some(fire(command, executor, sink).await)
            }
            _ => None,
        };

        Observation { matches, trigger }
    }
}

async fn fire<E: Executor>(command: &str, executor: &E, sink: &mut LogSink) -> TriggerOutcome {
    sink.log(&record(
        Tag::Info,
        &format!("Regex matched; running '{command}'"),
    ));
    tracing::debug!(command, "firing trigger command");

    match executor.execute(command).await {
        ExecutionOutcome::Completed(out) => {
            for (tag, text) in [
                (Tag::TriggerStdout, &out.stdout),
                (Tag::TriggerStderr, &out.stderr),
            ] {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    sink.log(&record(tag, line));
                }
            }
            if out.success() {
                sink.log(&record(
                    Tag::Info,
                    &format!("Trigger '{command}' succeeded."),
                ));
                TriggerOutcome::Succeeded
            } else {
                sink.log(&record(
                    Tag::Error,
                    &format!("Trigger '{command}' failed (code={}).", out.status),
                ));
                TriggerOutcome::Failed {
                    status: Some(out.status),
                }
            }
        }
        ExecutionOutcome::LaunchFailed { reason } => {
            sink.log(&record(
                Tag::Error,
                &format!("Trigger '{command}' failed to launch: {reason}"),
            ));
            TriggerOutcome::Failed { status: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedExecutor;

    fn sink() -> LogSink {
        LogSink::silent(None, 1024)
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = TriggerEngine::new(Some("["), Some("echo fired"))
            .err()
            .unwrap();
        assert_eq!(err.pattern, "[");
        assert!(err.to_string().starts_with("Invalid regex pattern '['"));
    }

    #[test]
    fn test_empty_pattern_is_inert() {
        assert!(TriggerEngine::new(Some(""), None).unwrap().pattern.is_none());
    }

    #[tokio::test]
    async fn test_no_pattern_never_matches() {
        let executor = ScriptedExecutor::default();
        let mut engine = TriggerEngine::new(None, Some("echo fired")).unwrap();
        engine.begin_iteration();
        let obs = engine.observe("ERROR", &executor, &mut sink()).await;
        assert_eq!(obs, Observation::default());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_counts_all_non_overlapping_matches() {
        let executor = ScriptedExecutor::default();
        let mut engine = TriggerEngine::new(Some("aa"), None).unwrap();
        engine.begin_iteration();
        let obs = engine.observe("aaaaa", &executor, &mut sink()).await;
        assert_eq!(obs.matches, 2);
        assert_eq!(obs.trigger, None);
        assert_eq!(engine.total_matches(), 2);
    }

    #[tokio::test]
    async fn test_fires_once_per_iteration() {
        let executor = ScriptedExecutor::default();
        let mut sink = sink();
        let mut engine = TriggerEngine::new(Some("ERROR"), Some("echo fired")).unwrap();

        engine.begin_iteration();
        let first = engine.observe("ERROR one ERROR", &executor, &mut sink).await;
        let second = engine.observe("ERROR two", &executor, &mut sink).await;
        let third = engine.observe("fine", &executor, &mut sink).await;

        assert_eq!(first.matches, 2);
        assert_eq!(first.trigger, Some(TriggerOutcome::Succeeded));
        assert_eq!(second.matches, 1);
        assert_eq!(second.trigger, None);
        assert_eq!(third, Observation::default());
        assert_eq!(executor.calls(), vec!["echo fired"]);
        assert_eq!(engine.total_matches(), 3);

        // Re-armed for the next iteration.
        engine.begin_iteration();
        let next = engine.observe("ERROR again", &executor, &mut sink).await;
        assert_eq!(next.trigger, Some(TriggerOutcome::Succeeded));
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(engine.total_matches(), 4);
    }

    #[tokio::test]
    async fn test_trigger_failure_reported() {
        let executor = ScriptedExecutor::default();
        executor.push_output(3, "", "boom\n");
        let mut engine = TriggerEngine::new(Some("x"), Some("false")).unwrap();
        engine.begin_iteration();
        let obs = engine.observe("x", &executor, &mut sink()).await;
        assert_eq!(
            obs.trigger,
            Some(TriggerOutcome::Failed { status: Some(3) })
        );
    }

    #[tokio::test]
    async fn test_trigger_launch_failure_reported() {
        let executor = ScriptedExecutor::default();
        executor.push(ExecutionOutcome::LaunchFailed {
            reason: "no shell".to_string(),
        });
        let mut engine = TriggerEngine::new(Some("x"), Some("anything")).unwrap();
        engine.begin_iteration();
        let obs = engine.observe("x", &executor, &mut sink()).await;
        assert_eq!(obs.trigger, Some(TriggerOutcome::Failed { status: None }));
    }

    #[tokio::test]
    async fn test_trigger_output_logged_with_distinct_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        let mut sink = LogSink::silent(Some(path.clone()), 4096);
        let executor = ScriptedExecutor::default();
        executor.push_output(0, "fired\n\n", "warn\n");

        let mut engine = TriggerEngine::new(Some("ERROR"), Some("echo fired")).unwrap();
        engine.begin_iteration();
        engine.observe("ERROR seen", &executor, &mut sink).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("(regex-execute stdout) fired").count(), 1);
        assert_eq!(contents.matches("(regex-execute stderr) warn").count(), 1);
        assert!(contents.contains("(INFO) Regex matched; running 'echo fired'"));
        assert!(contents.contains("(INFO) Trigger 'echo fired' succeeded."));
        // Blank trigger output lines are skipped.
        assert_eq!(contents.lines().count(), 4);
    }
}
