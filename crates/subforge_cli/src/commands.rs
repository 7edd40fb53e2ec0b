//! Subcommand implementations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use subforge_core::config::ConfigManager;
use subforge_core::environments::EnvironmentDescriptor;
use subforge_core::hardware::HardwareProfileCache;
use subforge_core::jobs::{JobConfigBuilder, JobRequest};
use subforge_core::logging::JobLoggerBuilder;
use subforge_core::manifest::JobManifest;
use subforge_core::orchestrator::{open_job, PipelineOrchestrator};

/// Arguments of `subforge create`.
pub struct CreateArgs {
    pub input: PathBuf,
    pub workflow: String,
    pub source_lang: String,
    pub target_langs: Vec<String>,
    pub user: String,
    pub params: Vec<(String, Value)>,
    pub skip_stages: Vec<String>,
}

/// Login name of the current user, or "local".
///
/// Characters not allowed in job ids become `_`, so `john-doe` maps to `john_doe`.
pub fn default_user() -> String {
    let login = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    sanitize_user(&login)
}

fn sanitize_user(login: &str) -> String {
    let user: String = login
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    if user.chars().all(|c| c == '_' || c == '.') {
        "local".to_string()
    } else {
        user
    }
}

/// Relative paths typed on the command line are relative to the shell, not
/// to the config file they end up in.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    Ok(cwd.join(path))
}

pub fn create_job(manager: &ConfigManager, args: CreateArgs) -> Result<()> {
    let settings = manager.resolved();
    let registry = manager.registry()?;
    let catalog = settings.workflow_catalog();

    let profile =
        HardwareProfileCache::new(&settings.paths.state_dir).load_or_detect(settings.hardware.ttl())?;

    let mut request = JobRequest::new(args.input, args.workflow, args.user).source_lang(args.source_lang);
    for lang in args.target_langs {
        request = request.target_lang(lang);
    }
    for (key, value) in args.params {
        request = request.param(key, value);
    }
    for stage in args.skip_stages {
        request = request.skip(stage);
    }

    let builder = JobConfigBuilder::new(
        &catalog,
        &registry,
        &settings.paths.jobs_root,
        &settings.paths.state_dir,
    );
    let config = builder.build(&request, &profile)?;

    tracing::info!(
        "Created job {} in {}",
        config.job_id(),
        config.output_root().display()
    );
    println!("{}", config.job_id());
    Ok(())
}

pub fn run_job(manager: &ConfigManager, job_id: &str, resume: bool) -> Result<()> {
    let settings = manager.resolved();
    let (config, mut manifest) = open_job(&settings.paths.jobs_root, job_id)?;
    let registry = manager.registry()?;

    let logger = JobLoggerBuilder::new(job_id, config.logs_dir())
        .config(settings.logging.to_log_config())
        .build()
        .with_context(|| format!("cannot open job log in {}", config.logs_dir().display()))?;

    let mut orchestrator = PipelineOrchestrator::new(&registry).with_logger(&logger);
    let result = orchestrator.run(&config, &mut manifest, resume);
    logger.close();

    print_manifest(&manifest);
    let report = result?;
    println!(
        "{}: {} ({} executed, {} skipped)",
        report.job_id,
        report.overall_status,
        report.executed.len(),
        report.skipped.len()
    );
    Ok(())
}

pub fn show_status(manager: &ConfigManager, job_id: &str) -> Result<()> {
    let settings = manager.resolved();
    let (_, manifest) = open_job(&settings.paths.jobs_root, job_id)?;
    print_manifest(&manifest);
    Ok(())
}

fn print_manifest(manifest: &JobManifest) {
    println!(
        "Job {} [{}] - {}",
        manifest.job_id(),
        manifest.workflow(),
        manifest.overall_status()
    );
    for entry in manifest.entries() {
        let duration = entry
            .duration_s
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_default();
        let detail = entry
            .error
            .as_deref()
            .or(entry.note.as_deref())
            .unwrap_or_default();
        println!(
            "  {:<16} {:<10} {:>8}  {}",
            entry.stage_name,
            entry.status.to_string(),
            duration,
            detail
        );
    }
}

pub fn show_hardware(manager: &ConfigManager, refresh: bool) -> Result<()> {
    let settings = manager.resolved();
    let cache = HardwareProfileCache::new(&settings.paths.state_dir);
    let profile = if refresh {
        cache.refresh()?
    } else {
        cache.load_or_detect(settings.hardware.ttl())?
    };
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub fn list_environments(manager: &ConfigManager) -> Result<()> {
    let registry = manager.registry()?;
    let default = registry.default_environment();

    let mut count = 0;
    for env in registry.descriptors() {
        count += 1;
        let state = if env.is_usable() { "ok" } else { "missing" };
        let marker = if Some(env.name.as_str()) == default {
            " (default)"
        } else {
            ""
        };
        println!(
            "{}{}  [{}]  {}",
            env.name,
            marker,
            state,
            env.runtime_path.display()
        );
        if !env.served_stages.is_empty() {
            println!("  stages: {}", env.served_stages.join(", "));
        }
        match env.fingerprint() {
            Ok(Some(digest)) => println!("  dependencies: sha256 {}", digest),
            Ok(None) => {}
            Err(e) => tracing::warn!("Cannot fingerprint environment {}: {}", env.name, e),
        }
    }

    if count == 0 {
        println!("No environments registered in {}", manager.path().display());
    }
    Ok(())
}

pub fn register_environment(
    manager: &mut ConfigManager,
    name: String,
    runtime_path: PathBuf,
    stages: Vec<String>,
    requirements: Option<PathBuf>,
    interpreter: Option<String>,
) -> Result<()> {
    let stage_refs: Vec<&str> = stages.iter().map(String::as_str).collect();
    let mut descriptor =
        EnvironmentDescriptor::new(&name, absolute(runtime_path)?).serving(&stage_refs);
    if let Some(path) = requirements {
        descriptor = descriptor.with_dependency_manifest(absolute(path)?);
    }
    if let Some(interpreter) = interpreter {
        descriptor = descriptor.with_interpreter(interpreter);
    }

    manager.upsert_environment(descriptor)?;

    let registry = manager.registry()?;
    if !registry.validate(&name) {
        tracing::warn!(
            "Environment {} is registered but not usable yet (no interpreter found)",
            name
        );
    }
    println!("Registered environment {} in {}", name, manager.path().display());
    Ok(())
}
