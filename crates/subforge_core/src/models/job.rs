//! The immutable job config.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fsutil;

/// File name of the persisted job config inside a job directory.
pub const JOB_CONFIG_FILE: &str = "job.json";
/// File name of the job manifest inside a job directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Per-job log directory.
pub const LOGS_DIR: &str = "logs";
/// Parent of the per-stage output directories.
pub const STAGES_DIR: &str = "stages";

/// A stage as frozen into a job at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStage {
    pub name: String,
    pub command_template: Vec<String>,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
}

/// Everything a run needs, fixed when the job is created.
///
/// There are no setters: a job with different parameters is a new job.
/// The config is written once (no-clobber) by the job builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    job_id: String,
    user: String,
    workflow: String,
    source_lang: String,
    #[serde(rename = "target_lang", default)]
    target_langs: Vec<String>,
    environments: BTreeMap<String, PathBuf>,
    stage_environment_map: BTreeMap<String, String>,
    resolved_settings: BTreeMap<String, Value>,
    input_path: PathBuf,
    output_root: PathBuf,
    stages: Vec<JobStage>,
    #[serde(default)]
    skipped_stages: Vec<String>,
    created_at: DateTime<Utc>,
}

/// Parts assembled by the job builder.
pub(crate) struct JobConfigParts {
    pub job_id: String,
    pub user: String,
    pub workflow: String,
    pub source_lang: String,
    pub target_langs: Vec<String>,
    pub environments: BTreeMap<String, PathBuf>,
    pub stage_environment_map: BTreeMap<String, String>,
    pub resolved_settings: BTreeMap<String, Value>,
    pub input_path: PathBuf,
    pub output_root: PathBuf,
    pub stages: Vec<JobStage>,
    pub skipped_stages: Vec<String>,
}

impl JobConfig {
    pub(crate) fn from_parts(parts: JobConfigParts) -> Self {
        Self {
            job_id: parts.job_id,
            user: parts.user,
            workflow: parts.workflow,
            source_lang: parts.source_lang,
            target_langs: parts.target_langs,
            environments: parts.environments,
            stage_environment_map: parts.stage_environment_map,
            resolved_settings: parts.resolved_settings,
            input_path: parts.input_path,
            output_root: parts.output_root,
            stages: parts.stages,
            skipped_stages: parts.skipped_stages,
            created_at: Utc::now(),
        }
    }

    /// Load a persisted job config.
    pub fn load(path: &Path) -> io::Result<Self> {
        fsutil::read_json(path)
    }

    /// Write the config into its job directory. Fails if it already exists.
    pub(crate) fn persist(&self) -> io::Result<()> {
        fsutil::write_json_new(&self.config_path(), self)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_langs(&self) -> &[String] {
        &self.target_langs
    }

    /// Environment name to runtime path, for every environment the job uses.
    pub fn environments(&self) -> &BTreeMap<String, PathBuf> {
        &self.environments
    }

    /// Stage name to environment name, resolved once at build time.
    pub fn stage_environment_map(&self) -> &BTreeMap<String, String> {
        &self.stage_environment_map
    }

    /// Hardware recommendations merged with user parameters.
    pub fn resolved_settings(&self) -> &BTreeMap<String, Value> {
        &self.resolved_settings
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// The job directory.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[JobStage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&JobStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn skipped_stages(&self) -> &[String] {
        &self.skipped_stages
    }

    pub fn is_skipped(&self, stage: &str) -> bool {
        self.skipped_stages.iter().any(|s| s == stage)
    }

    /// Environment assigned to a stage.
    pub fn environment_for(&self, stage: &str) -> Option<&str> {
        self.stage_environment_map.get(stage).map(|s| s.as_str())
    }

    pub fn config_path(&self) -> PathBuf {
        self.output_root.join(JOB_CONFIG_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_root.join(MANIFEST_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_root.join(LOGS_DIR)
    }

    /// Output directory owned by one stage.
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.output_root.join(STAGES_DIR).join(stage)
    }
}
