//! Error types for the environment registry.

use std::io;

use thiserror::Error;

/// Errors from environment registration, resolution and execution.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A stage has neither an explicit mapping nor a default environment.
    #[error("Stage '{stage}' is not mapped to any environment and no default is configured")]
    UnmappedStage { stage: String },

    /// An environment name was referenced but never registered.
    #[error("Environment '{name}' is not registered")]
    UnknownEnvironment { name: String },

    /// Two environments claim the same stage.
    #[error("Stage '{stage}' is already served by '{existing}', cannot also map it to '{requested}'")]
    ConflictingMapping {
        stage: String,
        existing: String,
        requested: String,
    },

    /// The command to execute was empty.
    #[error("Empty command for environment '{env}'")]
    EmptyCommand { env: String },

    /// The child process could not be started.
    #[error("Failed to start '{program}' in environment '{env}': {source}")]
    Spawn {
        env: String,
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child PATH could not be built.
    #[error("Invalid PATH for environment '{env}': {message}")]
    InvalidPath { env: String, message: String },
}

impl RegistryError {
    /// Create an unmapped stage error.
    pub fn unmapped_stage(stage: impl Into<String>) -> Self {
        Self::UnmappedStage {
            stage: stage.into(),
        }
    }

    /// Create an unknown environment error.
    pub fn unknown_environment(name: impl Into<String>) -> Self {
        Self::UnknownEnvironment { name: name.into() }
    }

    /// Create a spawn error.
    pub fn spawn(env: impl Into<String>, program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            env: env.into(),
            program: program.into(),
            source,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            RegistryError::UnmappedStage { .. } => {
                "add the stage to an environment's served_stages or set [registry] default_environment"
            }
            RegistryError::UnknownEnvironment { .. } => {
                "register the environment with `subforge env-register` or fix the name in the workflow"
            }
            RegistryError::ConflictingMapping { .. } => {
                "a stage may be served by exactly one environment; remove it from one served_stages list"
            }
            RegistryError::EmptyCommand { .. } => "give the stage a non-empty command_template",
            RegistryError::Spawn { .. } => {
                "check that the program exists in the environment's bin directory or on PATH"
            }
            RegistryError::InvalidPath { .. } => {
                "runtime paths must not contain the platform PATH separator"
            }
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
