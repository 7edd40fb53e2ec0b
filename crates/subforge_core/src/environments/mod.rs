//! Isolated runtime environments.
//!
//! This module provides:
//! - `EnvironmentDescriptor`: one isolated runtime (venv-style layout)
//! - `EnvironmentRegistry`: stage to environment resolution plus command
//!   execution that builds a child-only environment (no activation)
//! - `StageRunner`: the execution seam used by the orchestrator

mod descriptor;
mod errors;
mod registry;

pub use descriptor::EnvironmentDescriptor;
pub use errors::{RegistryError, RegistryResult};
pub use registry::{CommandResult, EnvironmentRegistry, StageRunner};
