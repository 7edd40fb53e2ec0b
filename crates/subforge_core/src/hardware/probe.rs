//! Accelerator probes.

use std::process::Command;

use chrono::{DateTime, Utc};

use super::cache::HardwareResult;
use crate::models::{AcceleratorType, HardwareProfile};

/// Detects the accelerator available on this machine.
pub trait HardwareProbe: Send + Sync {
    fn detect(&self, now: DateTime<Utc>) -> HardwareResult<HardwareProfile>;
}

/// Probe for the machine the process runs on.
///
/// Checks for an NVIDIA GPU (`nvidia-smi` on `PATH`), then Apple Silicon,
/// then falls back to CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn detect(&self, now: DateTime<Utc>) -> HardwareResult<HardwareProfile> {
        let platform = platform_string();

        if let Some(gpu) = nvidia_gpu_name() {
            tracing::info!("Detected NVIDIA GPU: {}", gpu);
            return Ok(HardwareProfile::new(platform, AcceleratorType::Cuda, gpu, now));
        }

        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            tracing::info!("Detected Apple Silicon");
            return Ok(HardwareProfile::new(
                platform,
                AcceleratorType::Mps,
                "Apple Silicon",
                now,
            ));
        }

        tracing::info!("No accelerator detected, using CPU");
        Ok(HardwareProfile::new(platform, AcceleratorType::Cpu, "cpu", now))
    }
}

fn platform_string() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Name of the first NVIDIA GPU, if `nvidia-smi` exists and answers.
fn nvidia_gpu_name() -> Option<String> {
    let smi = which::which("nvidia-smi").ok()?;
    tracing::debug!("Querying {}", smi.display());

    let output = Command::new(&smi)
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!("nvidia-smi exited with {:?}", output.status.code());
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
