use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted polling interval, in seconds.
pub const MIN_FREQUENCY: f64 = 0.1;
/// Largest accepted polling interval, in seconds.
pub const MAX_FREQUENCY: f64 = 100_000.0;

/// Top-level configuration loaded from cli-monitor.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub monitor: MonitorSection,
    pub trigger: TriggerSection,
    pub log: LogSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub command: Option<String>,
    pub frequency: f64,
    pub timer: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TriggerSection {
    pub regex: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub output_file: Option<PathBuf>,
    pub max_size_kb: u64,
}

// --- Default implementations ---

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            command: None,
            frequency: 1.0,
            timer: 0.0,
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            output_file: None,
            max_size_kb: 1024,
        }
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub command: Option<String>,
    pub frequency: Option<f64>,
    pub timer: Option<f64>,
    pub regex: Option<String>,
    pub regex_execute: Option<String>,
    pub output_file: Option<PathBuf>,
    pub max_log_size_kb: Option<u64>,
}

/// Fully resolved, validated settings handed to the monitor loop.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub command: String,
    pub trigger_command: Option<String>,
    pub pattern: Option<String>,
    pub interval: Duration,
    /// Total run time; `None` runs until interrupted.
    pub timeout: Option<Duration>,
    pub log_path: Option<PathBuf>,
    pub log_max_bytes: u64,
}

impl MonitorConfig {
    /// Minimal config for `command` with default interval and log budget.
    #[cfg(test)]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            trigger_command: None,
            pattern: None,
            interval: Duration::from_secs(1),
            timeout: None,
            log_path: None,
            log_max_bytes: LogSection::default().max_size_kb * 1024,
        }
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    MissingCommand,
    FrequencyOutOfRange(f64),
    ZeroLogSize,
    NegativeTimer(f64),
    /// Not finite, or too large to represent as a duration.
    InvalidTimer(f64),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::MissingCommand => {
                write!(f, "no command given (use --command or [monitor] command)")
            }
            ConfigError::FrequencyOutOfRange(value) => write!(
                f,
                "Frequency must be between {MIN_FREQUENCY} and {MAX_FREQUENCY} (got {value})."
            ),
            ConfigError::ZeroLogSize => write!(f, "--max-log-size must be greater than 0 KB"),
            ConfigError::NegativeTimer(value) => {
                write!(f, "--timer must not be negative (got {value})")
            }
            ConfigError::InvalidTimer(value) => {
                write!(f, "invalid --timer {value}: expected a finite number of seconds")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Load the config file at `path`.
///
/// A missing file yields defaults unless `required` is set, in which case
/// it is reported as a read error.
pub fn load(path: &Path, required: bool) -> Result<FileConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(FileConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Merge CLI overrides over the file config and validate the result.
pub fn resolve(file: FileConfig, cli: Overrides) -> Result<MonitorConfig, ConfigError> {
    let command = cli
        .command
        .or(file.monitor.command)
        .filter(|c| !c.trim().is_empty())
        .ok_or(ConfigError::MissingCommand)?;

    let frequency = cli.frequency.unwrap_or(file.monitor.frequency);
    if !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency) {
        return Err(ConfigError::FrequencyOutOfRange(frequency));
    }

    let max_size_kb = cli.max_log_size_kb.unwrap_or(file.log.max_size_kb);
    if max_size_kb == 0 {
        return Err(ConfigError::ZeroLogSize);
    }

    let timer = cli.timer.unwrap_or(file.monitor.timer);
    let timeout = match Duration::try_from_secs_f64(timer) {
        Ok(d) if d.is_zero() => None,
        Ok(d) => Some(d),
        Err(_) if timer < 0.0 => return Err(ConfigError::NegativeTimer(timer)),
        Err(_) => return Err(ConfigError::InvalidTimer(timer)),
    };

    let log_path = cli.output_file.or(file.log.output_file);
    if cli.max_log_size_kb.is_some() && log_path.is_none() {
        tracing::warn!("--max-log-size is ignored since --output-file is not set");
    }

    Ok(MonitorConfig {
        command,
        trigger_command: cli
            .regex_execute
            .or(file.trigger.command)
            .filter(|c| !c.trim().is_empty()),
        pattern: cli.regex.or(file.trigger.regex).filter(|p| !p.is_empty()),
        interval: Duration::from_secs_f64(frequency),
        timeout,
        log_path,
        log_max_bytes: max_size_kb.saturating_mul(1024),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(command: &str) -> Overrides {
        Overrides {
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = resolve(FileConfig::default(), cli("echo hi")).unwrap();
        assert_eq!(config.command, "echo hi");
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.timeout, None);
        assert_eq!(config.log_path, None);
        assert_eq!(config.log_max_bytes, 1024 * 1024);
        assert_eq!(config.pattern, None);
        assert_eq!(config.trigger_command, None);
    }

    #[test]
    fn test_parse_full_file() {
        let file: FileConfig = toml::from_str(
            r#"
[monitor]
command = "uptime"
frequency = 2.5
timer = 30

[trigger]
regex = "load"
command = "echo fired"

[log]
output_file = "monitor.log"
max_size_kb = 4
"#,
        )
        .unwrap();
        let config = resolve(file, Overrides::default()).unwrap();
        assert_eq!(config.command, "uptime");
        assert_eq!(config.interval, Duration::from_millis(2500));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.pattern.as_deref(), Some("load"));
        assert_eq!(config.trigger_command.as_deref(), Some("echo fired"));
        assert_eq!(config.log_path, Some(PathBuf::from("monitor.log")));
        assert_eq!(config.log_max_bytes, 4096);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
[monitor]
command = "uptime"
frequency = 5.0
"#,
        )
        .unwrap();
        let overrides = Overrides {
            command: Some("date".to_string()),
            frequency: Some(0.5),
            ..Default::default()
        };
        let config = resolve(file, overrides).unwrap();
        assert_eq!(config.command, "date");
        assert_eq!(config.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file: FileConfig = toml::from_str("[log]\noutput_file = \"x.log\"\n").unwrap();
        assert_eq!(file.monitor.frequency, 1.0);
        assert_eq!(file.log.max_size_kb, 1024);
    }

    #[test]
    fn test_missing_command() {
        let err = resolve(FileConfig::default(), Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCommand));
    }

    #[test]
    fn test_frequency_bounds() {
        for bad in [0.05, 999_999_999.0] {
            let overrides = Overrides {
                frequency: Some(bad),
                ..cli("echo")
            };
            let err = resolve(FileConfig::default(), overrides).unwrap_err();
            assert!(err.to_string().starts_with("Frequency must be between"));
        }
        for good in [MIN_FREQUENCY, MAX_FREQUENCY] {
            let overrides = Overrides {
                frequency: Some(good),
                ..cli("echo")
            };
            assert!(resolve(FileConfig::default(), overrides).is_ok());
        }
    }

    #[test]
    fn test_zero_log_size_rejected() {
        let overrides = Overrides {
            max_log_size_kb: Some(0),
            ..cli("echo")
        };
        assert!(matches!(
            resolve(FileConfig::default(), overrides),
            Err(ConfigError::ZeroLogSize)
        ));
    }

    #[test]
    fn test_negative_timer_rejected() {
        let overrides = Overrides {
            timer: Some(-1.0),
            ..cli("echo")
        };
        assert!(matches!(
            resolve(FileConfig::default(), overrides),
            Err(ConfigError::NegativeTimer(_))
        ));
    }

    #[test]
    fn test_non_finite_or_huge_timer_rejected() {
        for bad in [f64::INFINITY, f64::NAN, 1e30] {
            let overrides = Overrides {
                timer: Some(bad),
                ..cli("echo")
            };
            let err = resolve(FileConfig::default(), overrides).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTimer(_)), "{bad}: {err}");
            assert!(!err.to_string().contains("negative"));
        }
    }

    #[test]
    fn test_empty_regex_means_no_pattern() {
        let overrides = Overrides {
            regex: Some(String::new()),
            ..cli("echo")
        };
        let config = resolve(FileConfig::default(), overrides).unwrap();
        assert_eq!(config.pattern, None);
    }

    #[test]
    fn test_load_missing_optional_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = load(&dir.path().join("absent.toml"), false).unwrap();
        assert!(file.monitor.command.is_none());
    }

    #[test]
    fn test_load_missing_required_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[monitor\ncommand = ").unwrap();
        let err = load(&path, true).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
