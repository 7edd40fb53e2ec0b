//! Hardware profile: the output contract of accelerator detection.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::AcceleratorType;

/// Settings recommended for the detected hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedSettings {
    /// Speech model size (e.g. "large-v3").
    pub model_size: String,
    /// Compute precision (e.g. "float16", "int8").
    pub precision: String,
    /// Inference batch size.
    pub batch_size: u32,
    /// Inference backend (e.g. "ctranslate2", "mlx").
    pub backend: String,
}

impl RecommendedSettings {
    /// Recommended defaults for an accelerator type.
    pub fn for_accelerator(accelerator: AcceleratorType) -> Self {
        let (model_size, precision, batch_size, backend) = match accelerator {
            AcceleratorType::Cuda => ("large-v3", "float16", 16, "ctranslate2"),
            AcceleratorType::Mps => ("medium", "float16", 8, "mlx"),
            AcceleratorType::Cpu => ("small", "int8", 4, "ctranslate2"),
        };
        Self {
            model_size: model_size.to_string(),
            precision: precision.to_string(),
            batch_size,
            backend: backend.to_string(),
        }
    }

    /// Flatten into a settings map (the base layer of a job's resolved settings).
    pub fn to_settings_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("model_size".to_string(), Value::from(self.model_size.clone()));
        map.insert("precision".to_string(), Value::from(self.precision.clone()));
        map.insert("batch_size".to_string(), Value::from(self.batch_size));
        map.insert("backend".to_string(), Value::from(self.backend.clone()));
        map
    }
}

/// Detected accelerator capability of this machine.
///
/// Immutable once built; a new detection produces a new profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Operating system and architecture (e.g. "linux-x86_64").
    pub platform: String,
    /// Accelerator kind.
    pub accelerator_type: AcceleratorType,
    /// Human-readable accelerator name (GPU model or "cpu").
    pub accelerator_name: String,
    /// Settings recommended for this hardware.
    pub recommended_settings: RecommendedSettings,
    /// When detection ran.
    pub detected_at: DateTime<Utc>,
}

impl HardwareProfile {
    /// Build a profile with the recommended settings for `accelerator_type`.
    pub fn new(
        platform: impl Into<String>,
        accelerator_type: AcceleratorType,
        accelerator_name: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            platform: platform.into(),
            accelerator_type,
            accelerator_name: accelerator_name.into(),
            recommended_settings: RecommendedSettings::for_accelerator(accelerator_type),
            detected_at,
        }
    }

    /// Whether the profile is younger than `ttl` at `now`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.detected_at) < ttl
    }
}
