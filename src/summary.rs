/// Run summary: counters and timestamps collected over the monitor's
/// lifetime, rendered once when the loop stops.
use chrono::{DateTime, Local};
use std::fmt;

/// Why the monitor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationReason {
    #[default]
    ManualOrIndefinite,
    TimerExpired,
    ManualTermination,
    UnhandledException,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationReason::ManualOrIndefinite => "Manual or indefinite run",
            TerminationReason::TimerExpired => "Timer expired",
            TerminationReason::ManualTermination => "Manual termination by user",
            TerminationReason::UnhandledException => "Unhandled exception",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub start: Option<DateTime<Local>>,
    pub end: Option<DateTime<Local>>,
    pub total_executions: u64,
    pub exceptions: u64,
    pub regex_matches: u64,
    pub trigger_successes: u64,
    pub trigger_failures: u64,
    pub termination: TerminationReason,
}

pub const HEADER: &str = "----- Execution Summary -----";
pub const FOOTER: &str = "----------------------------";

impl Summary {
    /// Record the loop start time. Later calls are ignored.
    pub fn start(&mut self, at: DateTime<Local>) {
        self.start.get_or_insert(at);
    }

    /// Record the loop end time. Later calls are ignored.
    pub fn stop(&mut self, at: DateTime<Local>) {
        self.end.get_or_insert(at);
    }

    /// Render the report, one line per entry, header and footer included.
    pub fn render(&self) -> Vec<String> {
        let duration = match (self.start, self.end) {
            (Some(start), Some(end)) => format_duration(end - start),
            _ => "None".to_string(),
        };

        vec![
            HEADER.to_string(),
            format!("Start Time: {}", format_time(self.start)),
            format!("End Time: {}", format_time(self.end)),
            format!("Duration: {duration}"),
            format!("Total Executions: {}", self.total_executions),
            format!("Exceptions: {}", self.exceptions),
            format!("Regex Matches: {}", self.regex_matches),
            format!("Successful Trigger Commands: {}", self.trigger_successes),
            format!("Failed Trigger Commands: {}", self.trigger_failures),
            format!("Termination Reason: {}", self.termination),
            FOOTER.to_string(),
        ]
    }
}

fn format_time(t: Option<DateTime<Local>>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => "None".to_string(),
    }
}

/// `H:MM:SS.mmm`, clamped at zero if the clock went backwards.
fn format_duration(d: chrono::TimeDelta) -> String {
    let ms = d.num_milliseconds().max(0);
    let secs = ms / 1000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        ms % 1000
    )
}
