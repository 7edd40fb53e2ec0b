//! Per-job log file.
//!
//! A job log lives at `<job_dir>/logs/<job_id>.log` and is appended to, so a
//! resumed run continues the story of the first one. Lines written while a
//! stage is active carry the stage name. Stage output is held in a bounded
//! tail; in compact mode it only reaches the file when the stage fails.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LineKind, LogConfig, LogLevel, OutputStream};

pub struct JobLogger {
    job_id: String,
    log_path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    config: LogConfig,
    /// Stage currently running, used to tag lines.
    stage: Mutex<Option<String>>,
    tail: Mutex<VecDeque<String>>,
}

impl JobLogger {
    /// Open (or continue) the log of `job_id` inside `log_dir`.
    pub fn new(
        job_id: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
    ) -> io::Result<Self> {
        let job_id = job_id.into();
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", job_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            job_id,
            log_path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            tail: Mutex::new(VecDeque::with_capacity(config.error_tail)),
            config,
            stage: Mutex::new(None),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn info(&self, text: &str) {
        self.message(LogLevel::Info, LineKind::Plain, text);
    }

    pub fn debug(&self, text: &str) {
        self.message(LogLevel::Debug, LineKind::Plain, text);
    }

    pub fn warn(&self, text: &str) {
        self.message(LogLevel::Warn, LineKind::Warning, text);
    }

    pub fn error(&self, text: &str) {
        self.message(LogLevel::Error, LineKind::Error, text);
    }

    pub fn success(&self, text: &str) {
        self.message(LogLevel::Info, LineKind::Success, text);
    }

    /// Mark the start of a stage and reset the output tail.
    pub fn begin_stage(&self, stage: &str, env_name: &str) {
        *self.stage.lock() = None;
        self.tail.lock().clear();
        self.message(
            LogLevel::Info,
            LineKind::StageStart,
            &format!("{} [{}]", stage, env_name),
        );
        *self.stage.lock() = Some(stage.to_string());
    }

    /// Stop tagging lines with the current stage.
    pub fn end_stage(&self) {
        *self.stage.lock() = None;
    }

    /// Record the argv launched for the current stage.
    pub fn command(&self, argv: &[String]) {
        let line = argv
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");
        self.message(LogLevel::Info, LineKind::Command, &line);
    }

    /// Record one line printed by the current stage.
    pub fn stage_output(&self, stream: OutputStream, line: &str) {
        let line = match stream {
            OutputStream::Stdout => LineKind::Plain.decorate(line),
            OutputStream::Stderr => LineKind::Stderr.decorate(line),
        };

        {
            let mut tail = self.tail.lock();
            if self.config.error_tail > 0 && tail.len() >= self.config.error_tail {
                tail.pop_front();
            }
            if self.config.error_tail > 0 {
                tail.push_back(line.clone());
            }
        }

        if !self.config.compact {
            self.write_line(&line);
        }
    }

    /// Write the retained stage output, typically right after a failure.
    pub fn dump_tail(&self) {
        let lines: Vec<String> = self.tail.lock().iter().cloned().collect();
        if lines.is_empty() {
            return;
        }
        let stage = self.stage.lock().clone().unwrap_or_else(|| "stage".to_string());
        self.write_line(&format!(
            "--- last {} lines of {} output ---",
            lines.len(),
            stage
        ));
        for line in &lines {
            self.write_line(line);
        }
    }

    /// Retained stage output, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.tail.lock().iter().cloned().collect()
    }

    pub fn flush(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            let _ = writer.flush();
        }
    }

    /// Flush and release the file. Later lines are only mirrored to `tracing`.
    pub fn close(&self) {
        self.flush();
        *self.writer.lock() = None;
    }

    fn message(&self, level: LogLevel, kind: LineKind, text: &str) {
        if level < self.config.level {
            return;
        }

        let stage = self.stage.lock().clone();
        let stage_field = stage.as_deref().unwrap_or("-");
        match level {
            LogLevel::Trace => tracing::trace!(job = %self.job_id, stage = stage_field, "{}", text),
            LogLevel::Debug => tracing::debug!(job = %self.job_id, stage = stage_field, "{}", text),
            LogLevel::Info => tracing::info!(job = %self.job_id, stage = stage_field, "{}", text),
            LogLevel::Warn => tracing::warn!(job = %self.job_id, stage = stage_field, "{}", text),
            LogLevel::Error => tracing::error!(job = %self.job_id, stage = stage_field, "{}", text),
        }

        self.write_line(&kind.decorate(text));
    }

    fn write_line(&self, text: &str) {
        let mut line = String::new();
        if self.config.timestamps {
            line.push_str(&format!("[{}] ", Local::now().format("%H:%M:%S")));
        }
        if let Some(stage) = self.stage.lock().as_deref() {
            line.push_str(&format!("[{}] ", stage));
        }
        line.push_str(text);

        if let Some(writer) = self.writer.lock().as_mut() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

impl Drop for JobLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Single-quote an argument if it would not survive copy-paste into a shell.
fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%{}".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Fluent construction of a [`JobLogger`].
pub struct JobLoggerBuilder {
    job_id: String,
    log_dir: PathBuf,
    config: LogConfig,
}

impl JobLoggerBuilder {
    pub fn new(job_id: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            log_dir: log_dir.into(),
            config: LogConfig::default(),
        }
    }

    pub fn config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn error_tail(mut self, lines: usize) -> Self {
        self.config.error_tail = lines;
        self
    }

    pub fn build(self) -> io::Result<JobLogger> {
        JobLogger::new(self.job_id, self.log_dir, self.config)
    }
}
