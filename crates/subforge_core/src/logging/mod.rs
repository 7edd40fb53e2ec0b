//! Logging infrastructure for subforge.
//!
//! Two layers: process-wide `tracing` output set up once by the binary, and
//! a [`JobLogger`] per job run writing `<job_dir>/logs/<job_id>.log`.
//!
//! ```no_run
//! use subforge_core::logging::{JobLoggerBuilder, OutputStream};
//!
//! let logger = JobLoggerBuilder::new("job-20250101-alice-0001", "jobs/job-20250101-alice-0001/logs")
//!     .build()
//!     .unwrap();
//! logger.begin_stage("asr", "whisper");
//! logger.stage_output(OutputStream::Stderr, "CUDA out of memory");
//! logger.dump_tail();
//! ```

mod job_logger;
mod types;

use std::path::Path;

pub use job_logger::{JobLogger, JobLoggerBuilder};
pub use types::{LineKind, LogConfig, LogLevel, OutputStream};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the process-wide subscriber.
///
/// `RUST_LOG` overrides `default_level`. Events go to stderr and, when
/// `log_file` is set, to that file through a non-blocking writer. Hold the
/// returned guard until exit or buffered file lines are lost.
pub fn init_tracing(default_level: LogLevel, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter()));

    let (file_layer, guard) = match log_file.and_then(split_log_path) {
        Some((dir, name)) => {
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init();

    guard
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let name = path.file_name()?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if std::fs::create_dir_all(dir).is_err() {
        return None;
    }
    Some((dir, name))
}
