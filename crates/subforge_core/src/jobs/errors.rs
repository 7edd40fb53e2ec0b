//! Error types for job creation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::counter::CounterError;
use crate::environments::RegistryError;
use crate::manifest::ManifestError;

/// Errors raised while building a job. None of them leaves a job directory
/// behind.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The request is invalid (unknown workflow, bad language, ...).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// One or more environments are not registered or not usable.
    #[error("Missing or unusable environments: {}", names.join(", "))]
    MissingEnvironments { names: Vec<String> },

    /// A stage could not be resolved to an environment.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to allocate job id: {0}")]
    Counter(#[from] CounterError),

    #[error("Failed to initialize manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Failed to create job files at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            BuildError::Configuration { .. } => "fix the job parameters and create the job again",
            BuildError::MissingEnvironments { .. } => {
                "create the runtimes and register them with `subforge env-register`; `subforge envs` shows their state"
            }
            BuildError::Registry(e) => e.hint(),
            BuildError::Counter(e) => e.hint(),
            BuildError::Manifest(e) => e.hint(),
            BuildError::Io { .. } => "check that [paths] jobs_root is writable",
        }
    }
}

/// Result type for job building.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_environments_lists_every_name() {
        let err = BuildError::MissingEnvironments {
            names: vec!["asr".to_string(), "translation".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing or unusable environments: asr, translation"
        );
        assert!(err.hint().contains("env-register"));
    }
}
