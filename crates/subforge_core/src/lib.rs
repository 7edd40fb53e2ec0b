//! subforge core - job orchestration for multi-environment media pipelines
//!
//! This crate contains all business logic with no CLI dependencies:
//! - `environments`: isolated runtimes and side-effect-free command execution
//! - `manifest`: the persisted per-stage state machine
//! - `jobs`: job config building, id allocation and on-disk layout
//! - `orchestrator`: sequential stage execution with resume
//! - `hardware`: cached accelerator profile

pub mod config;
pub mod environments;
pub mod fsutil;
pub mod hardware;
pub mod jobs;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod template;

#[cfg(test)]
mod testutil;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
