mod config;
mod executor;
mod monitor;
mod signals;
mod sink;
mod summary;
mod trigger;

use clap::Parser;
use executor::ShellExecutor;
use monitor::Monitor;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for configuration and fatal loop errors.
const EXIT_GENERAL_ERROR: u8 = 1;
/// Exit code for an invalid --regex pattern.
const EXIT_PATTERN_ERROR: u8 = 2;

/// Run a command on a fixed interval, log its output to a size-bounded
/// file, and run a trigger command when the output matches a pattern.
///
/// Exit codes: 0 success, 1 general error, 2 regex validation error.
#[derive(Parser, Debug)]
#[command(name = "cli-monitor", version, about, disable_version_flag = true)]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Main command to run, e.g. --command "ls -la /"
    #[arg(long, num_args = 1.., value_name = "CMD")]
    command: Vec<String>,

    /// Seconds between each execution [default: 1.0]
    #[arg(long)]
    frequency: Option<f64>,

    /// Log file path; console only if omitted
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Max log file size in KB [default: 1024]
    #[arg(long)]
    max_log_size: Option<u64>,

    /// Stop after N seconds (0 => infinite)
    #[arg(long)]
    timer: Option<f64>,

    /// Regex pattern to watch for in output
    #[arg(long)]
    regex: Option<String>,

    /// Command to execute when the regex matches
    #[arg(long, value_name = "CMD")]
    regex_execute: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra diagnostics (executions, pruning, state changes)
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            command: (!self.command.is_empty()).then(|| self.command.join(" ")),
            frequency: self.frequency,
            timer: self.timer,
            regex: self.regex.clone(),
            regex_execute: self.regex_execute.clone(),
            output_file: self.output_file.clone(),
            max_log_size_kb: self.max_log_size,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "cli_monitor=debug"
    } else {
        "cli_monitor=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from("cli-monitor.toml"), false),
    };
    let resolved =
        config::load(&config_path, required).and_then(|file| config::resolve(file, cli.overrides()));
    let config = match resolved {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_GENERAL_ERROR);
        }
    };

    if cli.dry_run {
        println!("{config:#?}");
        return ExitCode::SUCCESS;
    }

    let mut monitor = match Monitor::new(config, ShellExecutor::default()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("[{}] CRITICAL ERROR: {e}", sink::timestamp());
            return ExitCode::from(EXIT_PATTERN_ERROR);
        }
    };

    let report = monitor.run(signals::shutdown_signal()).await;
    tracing::debug!(
        state = ?report.state,
        executions = report.summary.total_executions,
        "exiting"
    );
    ExitCode::from(report.exit_code())
}
