//! Job log configuration and line kinds.

use serde::{Deserialize, Serialize};

/// Severity threshold shared by `tracing` setup and job logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// How a job log is written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Messages below this level are dropped.
    pub level: LogLevel,
    /// Keep stage output out of the log file unless the stage fails.
    pub compact: bool,
    /// Stage output lines retained for the failure dump.
    pub error_tail: usize,
    /// Prefix lines with the wall-clock time.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: 20,
            timestamps: true,
        }
    }
}

/// Which stream of a stage command a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Marker placed in front of a job log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Start of a stage: `=== asr [whisper] ===`
    StageStart,
    /// Command line launched for a stage: `$ python -m ...`
    Command,
    /// `ok: ...`
    Success,
    /// `warning: ...`
    Warning,
    /// `error: ...`
    Error,
    /// Stage stderr, marked with `!`
    Stderr,
    Plain,
}

impl LineKind {
    pub fn decorate(self, text: &str) -> String {
        match self {
            LineKind::StageStart => format!("=== {} ===", text),
            LineKind::Command => format!("$ {}", text),
            LineKind::Success => format!("ok: {}", text),
            LineKind::Warning => format!("warning: {}", text),
            LineKind::Error => format!("error: {}", text),
            LineKind::Stderr => format!("! {}", text),
            LineKind::Plain => text.to_string(),
        }
    }
}
