//! Sequential stage runner driving the registry and the manifest.

use std::fs;
use std::path::Path;

use super::errors::{PipelineError, PipelineResult, StageError, StageResult};
use super::types::{job_template_context, stage_env, RunReport, RunState, StageInvocation};
use crate::environments::{CommandResult, StageRunner};
use crate::logging::{JobLogger, OutputStream};
use crate::manifest::{JobManifest, ManifestError, TransitionMeta};
use crate::models::{JobConfig, StageStatus, JOB_CONFIG_FILE};

/// Outcome of a successful stage.
struct StageOutcome {
    duration_s: f64,
    artifacts: Vec<String>,
}

/// Runs the stages of one job, strictly in order.
///
/// Every manifest transition is persisted before the next step starts, so a
/// killed process leaves the manifest in its last state with the in-flight
/// stage `running`. Any stage failure halts the run; there is no retry.
pub struct PipelineOrchestrator<'a> {
    runner: &'a dyn StageRunner,
    logger: Option<&'a JobLogger>,
    state: RunState,
}

impl<'a> PipelineOrchestrator<'a> {
    /// Create an orchestrator executing stages through `runner`.
    pub fn new(runner: &'a dyn StageRunner) -> Self {
        Self {
            runner,
            logger: None,
            state: RunState::Idle,
        }
    }

    /// Mirror progress and stage output into a job logger.
    pub fn with_logger(mut self, logger: &'a JobLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run (or resume) a job.
    ///
    /// A plain run requires a fresh manifest. With `resume`, stages left
    /// `running` or `failed` are reset and re-executed from scratch, and
    /// completed or skipped stages are left alone. Resuming a finished job
    /// executes nothing and only bumps `updated_at`.
    pub fn run(
        &mut self,
        config: &JobConfig,
        manifest: &mut JobManifest,
        resume: bool,
    ) -> PipelineResult<RunReport> {
        let job_id = config.job_id();
        manifest
            .check_matches(config)
            .map_err(|e| PipelineError::manifest(job_id, e))?;

        if !resume && !manifest.is_fresh() {
            return Err(PipelineError::AlreadyStarted {
                job_id: job_id.to_string(),
            });
        }

        self.state = RunState::Running;
        let mut report = RunReport::new(job_id);

        let stage_list: Vec<String> = if resume {
            manifest.resumable_stages()
        } else {
            config.stage_names().into_iter().map(String::from).collect()
        };

        if stage_list.is_empty() {
            self.info(&format!("Job {} has nothing left to run", job_id));
            manifest
                .touch()
                .map_err(|e| PipelineError::manifest(job_id, e))?;
            return Ok(self.finish(report, manifest, RunState::Completed));
        }

        self.info(&format!(
            "{} job {} ({}): {}",
            if resume { "Resuming" } else { "Starting" },
            job_id,
            config.workflow(),
            stage_list.join(" -> ")
        ));

        for stage in &stage_list {
            if let Err(e) = self.advance(config, manifest, stage, resume, &mut report) {
                self.state = RunState::Failed;
                report.state = RunState::Failed;
                return Err(e);
            }
        }

        self.success(&format!("Job {} completed", job_id));
        Ok(self.finish(report, manifest, RunState::Completed))
    }

    /// Take one stage through the state machine.
    fn advance(
        &mut self,
        config: &JobConfig,
        manifest: &mut JobManifest,
        stage: &str,
        resume: bool,
        report: &mut RunReport,
    ) -> PipelineResult<()> {
        let job_id = config.job_id();
        let manifest_err = |e| PipelineError::manifest(job_id, e);

        if resume
            && matches!(
                manifest.status_of(stage),
                Some(StageStatus::Running | StageStatus::Failed)
            )
        {
            self.warn(&format!("Resetting interrupted or failed stage '{}'", stage));
            manifest.reset_for_resume(stage).map_err(manifest_err)?;
        }

        if config.is_skipped(stage) {
            self.info(&format!("{} skipped (requested at job creation)", stage));
            manifest
                .skip(stage, "skipped at job creation")
                .map_err(manifest_err)?;
            report.skipped.push(stage.to_string());
            return Ok(());
        }

        if let Some(logger) = self.logger {
            logger.begin_stage(stage, config.environment_for(stage).unwrap_or("?"));
        }

        manifest
            .transition(stage, StageStatus::Running, TransitionMeta::default())
            .map_err(manifest_err)?;
        report.executed.push(stage.to_string());

        match self.execute_stage(config, stage) {
            Ok(outcome) => {
                manifest
                    .transition(
                        stage,
                        StageStatus::Completed,
                        TransitionMeta::completed(outcome.duration_s, outcome.artifacts),
                    )
                    .map_err(manifest_err)?;
                self.success(&format!("{} completed in {:.1}s", stage, outcome.duration_s));
                if let Some(logger) = self.logger {
                    logger.end_stage();
                }
                report.completed.push(stage.to_string());
                Ok(())
            }
            Err(err) => {
                self.error(&format!("{} failed: {}", stage, err));
                if let Some(logger) = self.logger {
                    logger.dump_tail();
                    logger.end_stage();
                }
                manifest
                    .transition(stage, StageStatus::Failed, TransitionMeta::failed(err.to_string()))
                    .map_err(manifest_err)?;
                Err(PipelineError::stage_failed(job_id, stage, err))
            }
        }
    }

    fn execute_stage(&self, config: &JobConfig, stage: &str) -> StageResult<StageOutcome> {
        let invocation = prepare_invocation(config, stage)?;
        fs::create_dir_all(&invocation.working_dir)
            .map_err(|e| StageError::io_error("creating stage directory", e))?;

        if let Some(logger) = self.logger {
            logger.debug(&format!("working directory {}", invocation.working_dir.display()));
            logger.command(&invocation.command);
        }

        let result = self.runner.execute(
            &invocation.env_name,
            &invocation.command,
            &invocation.working_dir,
            &invocation.extra_env,
        )?;
        self.record_output(&invocation.working_dir, &result)?;

        if !result.success() {
            let message = result
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output")
                .trim()
                .to_string();
            return Err(StageError::command_failed(
                &invocation.env_name,
                result.exit_code,
                message,
            ));
        }

        let artifacts = expected_outputs(config, stage)?;
        let missing: Vec<String> = artifacts
            .iter()
            .filter(|a| !invocation.working_dir.join(a).exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StageError::MissingOutputs { outputs: missing });
        }

        Ok(StageOutcome {
            duration_s: result.duration.as_secs_f64(),
            artifacts,
        })
    }

    /// Keep stage output next to its results and feed it to the logger.
    fn record_output(&self, stage_dir: &Path, result: &CommandResult) -> StageResult<()> {
        fs::write(stage_dir.join("stdout.log"), &result.stdout)
            .map_err(|e| StageError::io_error("writing stdout.log", e))?;
        fs::write(stage_dir.join("stderr.log"), &result.stderr)
            .map_err(|e| StageError::io_error("writing stderr.log", e))?;

        if let Some(logger) = self.logger {
            for line in result.stdout.lines() {
                logger.stage_output(OutputStream::Stdout, line);
            }
            for line in result.stderr.lines() {
                logger.stage_output(OutputStream::Stderr, line);
            }
        }
        Ok(())
    }

    fn finish(&mut self, mut report: RunReport, manifest: &JobManifest, state: RunState) -> RunReport {
        self.state = state;
        report.state = state;
        report.overall_status = manifest.overall_status();
        report
    }

    fn info(&self, message: &str) {
        match self.logger {
            Some(logger) => logger.info(message),
            None => tracing::info!("{}", message),
        }
    }

    fn warn(&self, message: &str) {
        match self.logger {
            Some(logger) => logger.warn(message),
            None => tracing::warn!("{}", message),
        }
    }

    fn error(&self, message: &str) {
        match self.logger {
            Some(logger) => logger.error(message),
            None => tracing::error!("{}", message),
        }
    }

    fn success(&self, message: &str) {
        match self.logger {
            Some(logger) => logger.success(message),
            None => tracing::info!("{}", message),
        }
    }
}

/// Render the command, working directory and environment for a stage.
///
/// The environment comes from the job config's stage map; it is never
/// re-resolved against the registry at run time.
pub fn prepare_invocation(config: &JobConfig, stage: &str) -> StageResult<StageInvocation> {
    let env_name = config
        .environment_for(stage)
        .ok_or(StageError::NoEnvironment)?
        .to_string();
    let job_stage = config.stage(stage).ok_or(StageError::NoEnvironment)?;
    let working_dir = config.stage_dir(stage);

    let ctx = job_template_context(config)
        .with_var("stage", stage)
        .with_var("stage_dir", working_dir.to_string_lossy());
    let command = ctx.render_all(&job_stage.command_template)?;

    Ok(StageInvocation {
        stage: stage.to_string(),
        env_name,
        command,
        extra_env: stage_env(config, stage),
        working_dir,
    })
}

fn expected_outputs(config: &JobConfig, stage: &str) -> StageResult<Vec<String>> {
    let Some(job_stage) = config.stage(stage) else {
        return Ok(Vec::new());
    };
    let ctx = job_template_context(config)
        .with_var("stage", stage)
        .with_var("stage_dir", config.stage_dir(stage).to_string_lossy());
    Ok(ctx.render_all(&job_stage.expected_outputs)?)
}

/// Load the config and manifest of an existing job.
pub fn open_job(jobs_root: &Path, job_id: &str) -> PipelineResult<(JobConfig, JobManifest)> {
    let job_dir = jobs_root.join(job_id);
    let not_found = || PipelineError::JobNotFound {
        job_id: job_id.to_string(),
        path: job_dir.clone(),
    };

    // Ids never contain path components
    if job_id.is_empty() || job_id.starts_with('.') || job_id.contains(['/', '\\']) {
        return Err(not_found());
    }

    let config_path = job_dir.join(JOB_CONFIG_FILE);
    if !config_path.is_file() {
        return Err(not_found());
    }

    let config = JobConfig::load(&config_path).map_err(|e| {
        PipelineError::setup_failed(job_id, format!("cannot read {}: {}", config_path.display(), e))
    })?;
    // A missing manifest under an existing job counts as corruption
    let manifest_path = config.manifest_path();
    if !manifest_path.is_file() {
        return Err(PipelineError::manifest(
            job_id,
            ManifestError::corrupt(&manifest_path, "manifest file is missing"),
        ));
    }
    let manifest =
        JobManifest::load(&manifest_path).map_err(|e| PipelineError::manifest(job_id, e))?;
    Ok((config, manifest))
}
