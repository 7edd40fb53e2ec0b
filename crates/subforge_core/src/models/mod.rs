//! Data models for subforge.
//!
//! This module contains the core data structures shared by every component:
//! - Enums for stage status, overall job status and accelerator type
//! - The hardware profile contract
//! - Workflow and stage descriptors (plus the built-in catalog)
//! - The immutable job config

mod enums;
mod hardware;
mod job;
mod workflow;

pub use enums::{AcceleratorType, OverallStatus, StageStatus};
pub use hardware::{HardwareProfile, RecommendedSettings};
pub(crate) use job::JobConfigParts;
pub use job::{JobConfig, JobStage, JOB_CONFIG_FILE, LOGS_DIR, MANIFEST_FILE, STAGES_DIR};
pub use workflow::{StageDescriptor, WorkflowCatalog, WorkflowDefinition};
