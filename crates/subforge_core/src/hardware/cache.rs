//! File-backed hardware profile cache.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use thiserror::Error;

use super::probe::{HardwareProbe, SystemProbe};
use crate::fsutil;
use crate::models::HardwareProfile;

/// File name of the cached profile inside the state directory.
pub const PROFILE_FILE: &str = "hardware_profile.json";

/// Errors from hardware detection and profile caching.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("Hardware detection failed: {0}")]
    Probe(String),

    #[error("Failed to write hardware profile {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HardwareError {
    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            HardwareError::Probe(_) => "check GPU drivers, or rerun with `subforge hardware --refresh`",
            HardwareError::Write { .. } => "check that [paths] state_dir is writable",
        }
    }
}

/// Result type for hardware operations.
pub type HardwareResult<T> = Result<T, HardwareError>;

/// Cached hardware profile with a freshness TTL.
///
/// This cache is the single writer of the profile file; writes go through an
/// atomic rename so concurrent readers never see a partial profile.
pub struct HardwareProfileCache {
    path: PathBuf,
    probe: Box<dyn HardwareProbe>,
}

impl HardwareProfileCache {
    /// Cache in `state_dir` using the system probe.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self::with_probe(state_dir, Box::new(SystemProbe))
    }

    /// Cache in `state_dir` using a custom probe.
    pub fn with_probe(state_dir: impl AsRef<Path>, probe: Box<dyn HardwareProbe>) -> Self {
        Self {
            path: state_dir.as_ref().join(PROFILE_FILE),
            probe,
        }
    }

    /// Path of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the cached profile if it is younger than `ttl`, else re-detect.
    pub fn load_or_detect(&self, ttl: Duration) -> HardwareResult<HardwareProfile> {
        if let Some(profile) = self.cached() {
            if profile.is_fresh(ttl, Utc::now()) {
                tracing::debug!(
                    "Using cached hardware profile from {}",
                    profile.detected_at.to_rfc3339()
                );
                return Ok(profile);
            }
            tracing::info!("Hardware profile is older than {}h, re-detecting", ttl.num_hours());
        }
        self.refresh()
    }

    /// Re-detect regardless of the cache and persist the new profile.
    pub fn refresh(&self) -> HardwareResult<HardwareProfile> {
        let profile = self.probe.detect(Utc::now())?;
        fsutil::write_json_atomic(&self.path, &profile).map_err(|source| HardwareError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(
            "Hardware profile: {} ({}) on {}",
            profile.accelerator_type,
            profile.accelerator_name,
            profile.platform
        );
        Ok(profile)
    }

    /// The profile on disk, whatever its age.
    ///
    /// A missing file is `None`; an unreadable or corrupt one is logged and
    /// also `None`, which makes the caller re-detect and overwrite it.
    pub fn cached(&self) -> Option<HardwareProfile> {
        match fsutil::read_json::<HardwareProfile>(&self.path) {
            Ok(profile) => Some(profile),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable hardware profile {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}
