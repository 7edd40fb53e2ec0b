//! Typed contents of `subforge.toml`.
//!
//! One struct per top-level table. Every field has a default, so an empty
//! file is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::environments::EnvironmentDescriptor;
use crate::logging::{LogConfig, LogLevel};
use crate::models::{WorkflowCatalog, WorkflowDefinition};

/// The whole config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Job, state and log directories.
    #[serde(default)]
    pub paths: PathSettings,

    /// Hardware profile caching.
    #[serde(default)]
    pub hardware: HardwareSettings,

    /// Stage to environment resolution.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Job log and process log behaviour.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Registered isolated environments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvironmentDescriptor>,

    /// Workflows added to (or replacing) the built-in catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<WorkflowDefinition>,
}

impl Settings {
    /// The built-in workflows with configured workflows layered on top.
    pub fn workflow_catalog(&self) -> WorkflowCatalog {
        let mut catalog = WorkflowCatalog::builtin();
        for workflow in &self.workflows {
            catalog.insert(workflow.clone());
        }
        catalog
    }

    /// Copy of the settings with every relative path joined onto `base`.
    pub fn resolved_against(&self, base: &Path) -> Settings {
        let mut resolved = self.clone();
        resolved.paths.jobs_root = resolve_path(base, &self.paths.jobs_root);
        resolved.paths.state_dir = resolve_path(base, &self.paths.state_dir);
        resolved.paths.logs_folder = resolve_path(base, &self.paths.logs_folder);
        for env in &mut resolved.environments {
            env.runtime_path = resolve_path(base, &env.runtime_path);
            if let Some(manifest) = env.dependency_manifest_ref.take() {
                env.dependency_manifest_ref = Some(resolve_path(base, &manifest));
            }
        }
        resolved
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Path configuration for jobs, persistent state and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Parent directory of all job directories.
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,

    /// Hardware profile cache and job counters.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Folder for the application log file.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: PathBuf,
}

fn default_jobs_root() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".subforge")
}

fn default_logs_folder() -> PathBuf {
    PathBuf::from(".logs")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            state_dir: default_state_dir(),
            logs_folder: default_logs_folder(),
        }
    }
}

/// Hardware profile cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// How long a detected profile stays valid.
    #[serde(default = "default_profile_ttl_hours")]
    pub profile_ttl_hours: u32,
}

fn default_profile_ttl_hours() -> u32 {
    24
}

impl HardwareSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.profile_ttl_hours))
    }
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            profile_ttl_hours: default_profile_ttl_hours(),
        }
    }
}

/// Environment registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Environment for stages with no explicit mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,
}

/// `[logging]`: thresholds and job log layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Keep stage output out of the job log unless a stage fails.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of stage output lines to show after a failure.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Mirror the application log into `<logs_folder>/subforge.log`.
    #[serde(default)]
    pub file_log: bool,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

impl LoggingSettings {
    /// Per-job logger configuration.
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            compact: self.compact,
            error_tail: self.error_tail as usize,
            ..LogConfig::default()
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: default_error_tail(),
            file_log: false,
        }
    }
}

/// Top-level tables, as addressed by `ConfigManager::update_section`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Paths,
    Hardware,
    Registry,
    Logging,
    Environments,
    Workflows,
}

impl ConfigSection {
    /// All sections in file order.
    pub const ALL: [ConfigSection; 6] = [
        ConfigSection::Paths,
        ConfigSection::Hardware,
        ConfigSection::Registry,
        ConfigSection::Logging,
        ConfigSection::Environments,
        ConfigSection::Workflows,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Hardware => "hardware",
            ConfigSection::Registry => "registry",
            ConfigSection::Logging => "logging",
            ConfigSection::Environments => "environments",
            ConfigSection::Workflows => "workflows",
        }
    }

    /// Comment written above the section in generated files.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "Job, state and log directories (relative to this file)",
            ConfigSection::Hardware => "Hardware profile cache",
            ConfigSection::Registry => "Fallback environment for stages without a mapping",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Environments => "Isolated runtimes and the stages they serve",
            ConfigSection::Workflows => "Custom workflows (replace built-ins with the same name)",
        }
    }

    /// Look a section up by its table name.
    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.table_name() == name)
    }
}
