//! Core types for the orchestrator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::{JobConfig, OverallStatus};
use crate::template::TemplateContext;

/// Lifecycle of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: String,
    /// Stages whose command was invoked, in order.
    pub executed: Vec<String>,
    /// Stages that completed during this run.
    pub completed: Vec<String>,
    /// Stages marked skipped during this run.
    pub skipped: Vec<String>,
    pub state: RunState,
    pub overall_status: OverallStatus,
}

impl RunReport {
    pub(crate) fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            executed: Vec::new(),
            completed: Vec::new(),
            skipped: Vec::new(),
            state: RunState::Running,
            overall_status: OverallStatus::Running,
        }
    }

    /// True when the run had nothing left to do.
    pub fn was_noop(&self) -> bool {
        self.executed.is_empty() && self.skipped.is_empty()
    }
}

/// Everything needed to run one stage command.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: String,
    pub env_name: String,
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub extra_env: BTreeMap<String, String>,
}

/// Placeholder values for the stages of a job.
///
/// Resolved settings go in first so the built-in names cannot be shadowed.
pub(crate) fn job_template_context(config: &JobConfig) -> TemplateContext {
    TemplateContext::new()
        .with_settings(config.resolved_settings())
        .with_var("job_id", config.job_id())
        .with_var("job_dir", path_arg(config.output_root()))
        .with_var("output_root", path_arg(config.output_root()))
        .with_var("config", path_arg(&config.config_path()))
        .with_var("manifest", path_arg(&config.manifest_path()))
        .with_var("input", path_arg(config.input_path()))
        .with_var("source_lang", config.source_lang())
        .with_var(
            "target_lang",
            config.target_langs().first().cloned().unwrap_or_default(),
        )
        .with_var("target_langs", config.target_langs().join(","))
        .with_var("workflow", config.workflow())
}

/// Environment variables every stage receives.
pub(crate) fn stage_env(config: &JobConfig, stage: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("SUBFORGE_JOB_ID".to_string(), config.job_id().to_string()),
        ("SUBFORGE_JOB_DIR".to_string(), path_arg(config.output_root())),
        ("SUBFORGE_STAGE".to_string(), stage.to_string()),
        ("SUBFORGE_STAGE_DIR".to_string(), path_arg(&config.stage_dir(stage))),
        ("SUBFORGE_CONFIG".to_string(), path_arg(&config.config_path())),
    ])
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}
