mod cli;
mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};
use subforge_core::config::{ConfigError, ConfigManager};
use subforge_core::hardware::HardwareError;
use subforge_core::jobs::BuildError;
use subforge_core::logging::{init_tracing, LogLevel};
use subforge_core::manifest::ManifestError;
use subforge_core::orchestrator::PipelineError;

const EXIT_FAILURE: u8 = 1;
const EXIT_JOB_NOT_FOUND: u8 = 2;
const EXIT_MISSING_ENVIRONMENT: u8 = 3;
const EXIT_STAGE_FAILED: u8 = 4;
const EXIT_MANIFEST_CORRUPT: u8 = 5;
const EXIT_CONFIG: u8 = 6;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut manager = ConfigManager::new(&cli.config);
    let loaded = manager.load_or_create();

    // -v wins over the configured level; RUST_LOG wins over both
    let settings = manager.resolved();
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        settings.logging.level
    };
    let log_file: Option<PathBuf> = settings
        .logging
        .file_log
        .then(|| settings.paths.logs_folder.join("subforge.log"));
    let _guard = init_tracing(level, log_file.as_deref());

    let result = match loaded {
        Ok(()) => dispatch(cli.command, &mut manager),
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (code, hint) = classify(&err);
            eprintln!("error: {}", err);
            if let Some(hint) = hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn dispatch(command: Commands, manager: &mut ConfigManager) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            job_id,
            resume,
            status,
        } => {
            if status {
                commands::show_status(manager, &job_id)
            } else {
                commands::run_job(manager, &job_id, resume)
            }
        }
        Commands::Create {
            input,
            workflow,
            source_lang,
            target_langs,
            user,
            params,
            skip_stages,
        } => {
            let user = user.unwrap_or_else(commands::default_user);
            commands::create_job(
                manager,
                commands::CreateArgs {
                    input,
                    workflow,
                    source_lang,
                    target_langs,
                    user,
                    params,
                    skip_stages,
                },
            )
        }
        Commands::Hardware { refresh } => commands::show_hardware(manager, refresh),
        Commands::Envs => commands::list_environments(manager),
        Commands::EnvRegister {
            name,
            runtime_path,
            stages,
            requirements,
            interpreter,
        } => commands::register_environment(
            manager,
            name,
            runtime_path,
            stages,
            requirements,
            interpreter,
        ),
    }
}

/// Map an error to its exit code and remediation hint.
fn classify(err: &anyhow::Error) -> (u8, Option<&'static str>) {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        let code = match e {
            PipelineError::JobNotFound { .. } => EXIT_JOB_NOT_FOUND,
            PipelineError::StageFailed { .. } => EXIT_STAGE_FAILED,
            PipelineError::Manifest {
                source: ManifestError::Corrupt { .. },
                ..
            } => EXIT_MANIFEST_CORRUPT,
            _ => EXIT_FAILURE,
        };
        return (code, Some(e.hint()));
    }

    if let Some(e) = err.downcast_ref::<BuildError>() {
        let code = match e {
            BuildError::MissingEnvironments { .. } => EXIT_MISSING_ENVIRONMENT,
            BuildError::Configuration { .. } | BuildError::Registry(_) => EXIT_CONFIG,
            BuildError::Manifest(ManifestError::Corrupt { .. }) => EXIT_MANIFEST_CORRUPT,
            _ => EXIT_FAILURE,
        };
        return (code, Some(e.hint()));
    }

    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return (EXIT_CONFIG, Some(e.hint()));
    }

    if let Some(e) = err.downcast_ref::<HardwareError>() {
        return (EXIT_FAILURE, Some(e.hint()));
    }

    (EXIT_FAILURE, None)
}
