//! Core enums used throughout the crate.

use serde::{Deserialize, Serialize};

/// Execution status of a single stage in a job manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently executing (or interrupted by a crash).
    Running,
    /// Finished with exit code 0 and all expected outputs present.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Deliberately not executed for this job.
    Skipped,
}

impl StageStatus {
    /// Whether the stage has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }

    /// Whether the stage needs no further work on resume.
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Aggregate status of a job, derived from its manifest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Running => write!(f, "running"),
            OverallStatus::Completed => write!(f, "completed"),
            OverallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of compute accelerator detected on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorType {
    /// NVIDIA GPU through CUDA.
    Cuda,
    /// Apple Silicon GPU through Metal.
    Mps,
    /// No accelerator, CPU only.
    Cpu,
}

impl std::fmt::Display for AcceleratorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceleratorType::Cuda => write!(f, "cuda"),
            AcceleratorType::Mps => write!(f, "mps"),
            AcceleratorType::Cpu => write!(f, "cpu"),
        }
    }
}
