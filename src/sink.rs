//! Log sink: console echo plus an optional size-bounded backing file.
//!
//! The file is plain text, one record per line. When an append pushes it
//! over its byte budget the oldest whole lines are evicted until it fits
//! again; an empty file is a valid result of eviction.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Origin tag written in parentheses after the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Stdout,
    Stderr,
    TriggerStdout,
    TriggerStderr,
    Info,
    Error,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Stdout => "stdout",
            Tag::Stderr => "stderr",
            Tag::TriggerStdout => "regex-execute stdout",
            Tag::TriggerStderr => "regex-execute stderr",
            Tag::Info => "INFO",
            Tag::Error => "ERROR",
        }
    }
}

/// Current local time as used in record prefixes.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a tagged record: `[ts] (tag) text`.
pub fn record(tag: Tag, text: &str) -> String {
    format!("[{}] ({}) {}", timestamp(), tag.as_str(), text)
}

/// I/O failure on the backing file.
#[derive(Debug)]
pub enum SinkError {
    Append {
        path: PathBuf,
        source: std::io::Error,
    },
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Append { path, source } => {
                write!(f, "failed to append to log {}: {}", path.display(), source)
            }
            SinkError::Prune { path, source } => {
                write!(f, "failed to prune log {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Append { source, .. } => Some(source),
            SinkError::Prune { source, .. } => Some(source),
        }
    }
}

pub struct LogSink {
    path: Option<PathBuf>,
    max_bytes: u64,
    echo: bool,
}

impl LogSink {
    pub fn new(path: Option<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path,
            max_bytes,
            echo: true,
        }
    }

    /// A sink that only writes the backing file. Used by tests to keep
    /// their output quiet.
    #[cfg(test)]
    pub fn silent(path: Option<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path,
            max_bytes,
            echo: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write `message` to stdout and, if configured, append it to the file.
    ///
    /// Console and file errors are reported and swallowed; logging never
    /// fails the caller. A failed console write turns the echo off for good.
    pub fn log(&mut self, message: &str) {
        if self.echo {
            let mut out = std::io::stdout().lock();
            if let Err(e) = writeln!(out, "{message}") {
                // Typically a closed pipe; keep writing the file only.
                tracing::warn!(error = %e, "console write failed, disabling console echo");
                self.echo = false;
            }
        }
        if let Err(e) = self.append(message) {
            tracing::warn!(error = %e, "log file write failed");
        }
    }

    fn append(&self, message: &str) -> Result<(), SinkError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let size = {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SinkError::Append {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            writeln!(file, "{message}")
                .and_then(|_| file.metadata())
                .map_err(|e| SinkError::Append {
                    path: path.to_path_buf(),
                    source: e,
                })?
                .len()
        };

        if size > self.max_bytes {
            prune(path, self.max_bytes).map_err(|e| SinkError::Prune {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Drop whole lines from the front of `path` until it fits in `max_bytes`.
fn prune(path: &Path, max_bytes: u64) -> std::io::Result<()> {
    let contents = std::fs::read(path)?;
    let keep_from = retained_offset(&contents, max_bytes);
    let evicted = contents[..keep_from]
        .iter()
        .filter(|&&b| b == b'\n')
        .count();

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.prune.{}", std::process::id()));

    replace_contents(path, &tmp_path, &contents[keep_from..])?;

    tracing::debug!(
        path = %path.display(),
        evicted,
        size = contents.len() - keep_from,
        max_bytes,
        "pruned log file"
    );
    Ok(())
}

/// Replace the contents of `path` with `tail`.
///
/// Goes through `tmp_path` and a rename so readers never see a half-pruned
/// file. If the directory does not allow that, `path` is truncated and
/// rewritten in place instead.
fn replace_contents(path: &Path, tmp_path: &Path, tail: &[u8]) -> std::io::Result<()> {
    let staged = std::fs::write(tmp_path, tail).and_then(|_| std::fs::rename(tmp_path, path));
    if let Err(e) = staged {
        let _ = std::fs::remove_file(tmp_path);
        tracing::debug!(
            error = %e,
            path = %path.display(),
            "temp-file prune failed, rewriting log in place"
        );
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(tail)?;
    }
    Ok(())
}

/// Byte offset of the first line to keep so that the suffix from there is
/// at most `max_bytes` long. Cuts only at line starts; returns
/// `contents.len()` when no suffix of whole lines fits.
fn retained_offset(contents: &[u8], max_bytes: u64) -> usize {
    let len = contents.len();
    let mut offset = 0;
    while offset < len && (len - offset) as u64 > max_bytes {
        offset = match contents[offset..].iter().position(|&b| b == b'\n') {
            Some(i) => offset + i + 1,
            None => len,
        };
    }
    offset
}
