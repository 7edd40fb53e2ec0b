//! Job creation: request validation, id allocation and the on-disk layout.
//!
//! A job directory looks like:
//!
//! ```text
//! <jobs_root>/<job_id>/
//!     job.json          immutable job config
//!     manifest.json     per-stage execution state
//!     logs/<job_id>.log
//!     stages/<stage>/   stage outputs, stdout.log, stderr.log
//! ```

mod builder;
mod counter;
mod errors;
mod request;

pub use builder::JobConfigBuilder;
pub use counter::{format_job_id, CounterError, CounterResult, JobCounter, COUNTER_FILE};
pub use errors::{BuildError, BuildResult};
pub use request::{is_valid_language, parse_param, JobRequest, AUTO_LANG};
