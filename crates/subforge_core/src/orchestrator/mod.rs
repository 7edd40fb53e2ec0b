//! Job execution.
//!
//! The orchestrator walks a job's stages in workflow order. For each stage it
//! renders the command template, launches it in the environment recorded in
//! the job config, and commits every status change to the manifest before
//! moving on. A failure halts the job; `resume` picks up at the first stage
//! that is not completed or skipped.
//!
//! ```no_run
//! use subforge_core::environments::EnvironmentRegistry;
//! use subforge_core::orchestrator::{open_job, PipelineOrchestrator};
//! use std::path::Path;
//!
//! let registry = EnvironmentRegistry::new();
//! let (config, mut manifest) = open_job(Path::new("jobs"), "job-20250101-alice-0001").unwrap();
//! let report = PipelineOrchestrator::new(&registry)
//!     .run(&config, &mut manifest, true)
//!     .unwrap();
//! println!("{} stages executed", report.executed.len());
//! ```

mod errors;
mod pipeline;
mod types;

pub use errors::{PipelineError, PipelineResult, StageError, StageResult};
pub use pipeline::{open_job, prepare_invocation, PipelineOrchestrator};
pub use types::{RunReport, RunState, StageInvocation};
