//! Error types for the job manifest.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::StageStatus;

/// Errors from manifest transitions and persistence.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// A transition the state machine does not allow.
    #[error("[{job_id}] Illegal transition for stage '{stage}': {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    /// The stage is not part of this manifest.
    #[error("[{job_id}] Stage '{stage}' is not in the manifest")]
    UnknownStage { job_id: String, stage: String },

    /// The manifest file exists but cannot be trusted.
    #[error("Manifest {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Reading or writing the manifest file failed.
    #[error("Manifest I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ManifestError {
    /// Create a corruption error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stage the error refers to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ManifestError::IllegalTransition { stage, .. }
            | ManifestError::UnknownStage { stage, .. } => Some(stage.as_str()),
            _ => None,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            ManifestError::IllegalTransition { .. } => {
                "a stage must be reset by `subforge run <job> --resume` before it can run again"
            }
            ManifestError::UnknownStage { .. } => {
                "the manifest and job config disagree; recreate the job"
            }
            ManifestError::Corrupt { .. } => {
                "the manifest is not repaired automatically; inspect it or recreate the job"
            }
            ManifestError::Io { .. } => "check that the job directory exists and is writable",
        }
    }
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
