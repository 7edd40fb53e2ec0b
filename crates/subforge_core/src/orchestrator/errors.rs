//! Error types for the orchestrator.
//!
//! A `PipelineError` names the job and, where relevant, the stage. The
//! `StageError` inside a stage failure says what went wrong running it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::environments::RegistryError;
use crate::manifest::ManifestError;
use crate::template::TemplateError;

/// Top-level pipeline error with job context.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage failed; the failure is recorded in the manifest.
    #[error("Job '{job_id}' failed at stage '{stage}': {source}")]
    StageFailed {
        job_id: String,
        stage: String,
        #[source]
        source: StageError,
    },

    /// A plain run was requested for a job that has already started.
    #[error("Job '{job_id}' has already started")]
    AlreadyStarted { job_id: String },

    /// No job with this id exists.
    #[error("Job '{job_id}' not found at {}", path.display())]
    JobNotFound { job_id: String, path: PathBuf },

    /// The manifest could not be read, written or trusted.
    #[error("Job '{job_id}': {source}")]
    Manifest {
        job_id: String,
        #[source]
        source: ManifestError,
    },

    /// Failed to set up the run (unreadable job config, ...).
    #[error("Job '{job_id}' setup failed: {message}")]
    SetupFailed { job_id: String, message: String },
}

impl PipelineError {
    /// Create a stage failed error.
    pub fn stage_failed(
        job_id: impl Into<String>,
        stage: impl Into<String>,
        source: StageError,
    ) -> Self {
        Self::StageFailed {
            job_id: job_id.into(),
            stage: stage.into(),
            source,
        }
    }

    /// Create a manifest error.
    pub fn manifest(job_id: impl Into<String>, source: ManifestError) -> Self {
        Self::Manifest {
            job_id: job_id.into(),
            source,
        }
    }

    /// Create a setup failed error.
    pub fn setup_failed(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SetupFailed {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// Job the error belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            PipelineError::StageFailed { job_id, .. }
            | PipelineError::AlreadyStarted { job_id }
            | PipelineError::JobNotFound { job_id, .. }
            | PipelineError::Manifest { job_id, .. }
            | PipelineError::SetupFailed { job_id, .. } => job_id,
        }
    }

    /// Stage the error belongs to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::StageFailed { stage, .. } => Some(stage.as_str()),
            PipelineError::Manifest { source, .. } => source.stage(),
            _ => None,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            PipelineError::StageFailed { source, .. } => source.hint(),
            PipelineError::AlreadyStarted { .. } => {
                "use `subforge run <job_id> --resume` to continue it, or create a new job"
            }
            PipelineError::JobNotFound { .. } => {
                "check the job id and [paths] jobs_root in the config"
            }
            PipelineError::Manifest { source, .. } => source.hint(),
            PipelineError::SetupFailed { .. } => "check the job directory; recreate the job if job.json is damaged",
        }
    }
}

/// Error from a single stage with operation context.
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage has no environment in the job config.
    #[error("No environment assigned to the stage")]
    NoEnvironment,

    /// The command template could not be rendered.
    #[error("Failed to render command: {0}")]
    Template(#[from] TemplateError),

    /// The command could not be started.
    #[error(transparent)]
    Launch(#[from] RegistryError),

    /// The command ran and exited non-zero.
    #[error("Command failed in environment '{env}' with exit code {exit_code}: {message}")]
    CommandFailed {
        env: String,
        exit_code: i32,
        message: String,
    },

    /// The command succeeded but did not produce what it declared.
    #[error("Missing expected outputs: {}", outputs.join(", "))]
    MissingOutputs { outputs: Vec<String> },

    /// File I/O error.
    #[error("I/O error in {operation}: {source}")]
    IoError {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    /// Create a command failed error.
    pub fn command_failed(env: impl Into<String>, exit_code: i32, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            env: env.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create an I/O error with context.
    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            source,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            StageError::NoEnvironment => "the job config is incomplete; recreate the job",
            StageError::Template(_) => "fix the stage's command template and create a new job",
            StageError::Launch(e) => e.hint(),
            StageError::CommandFailed { .. } => {
                "see stages/<stage>/stderr.log in the job directory, fix the cause, then rerun with --resume"
            }
            StageError::MissingOutputs { .. } => {
                "the stage exited 0 but did not write its declared outputs; check the stage implementation"
            }
            StageError::IoError { .. } => "check free space and permissions in the job directory",
        }
    }
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_displays_context() {
        let err = StageError::command_failed("asr", 1, "CUDA out of memory");
        let msg = err.to_string();
        assert!(msg.contains("asr"));
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("CUDA out of memory"));
    }

    #[test]
    fn pipeline_error_chains_context() {
        let stage_err = StageError::MissingOutputs {
            outputs: vec!["transcript.json".to_string()],
        };
        let err = PipelineError::stage_failed("job-20250101-alice-0001", "asr", stage_err);

        let msg = err.to_string();
        assert!(msg.contains("job-20250101-alice-0001"));
        assert!(msg.contains("asr"));
        assert_eq!(err.stage(), Some("asr"));
        assert!(std::error::Error::source(&err)
            .unwrap()
            .to_string()
            .contains("transcript.json"));
    }
}
