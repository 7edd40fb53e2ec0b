use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use subforge_core::jobs::{parse_param, AUTO_LANG};

#[derive(Parser)]
#[command(name = "subforge")]
#[command(author, version, about = "Run media pipelines across isolated environments")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "subforge.toml")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a job, or resume it after a failure
    Run {
        /// Job id printed by `create`
        job_id: String,

        /// Continue from the first stage that is not completed
        #[arg(long)]
        resume: bool,

        /// Print the manifest and exit without running anything
        #[arg(long, conflicts_with = "resume")]
        status: bool,
    },

    /// Create a job for an input file and print its id
    Create {
        /// Input media file
        #[arg(required = true)]
        input: PathBuf,

        /// Workflow to run
        #[arg(short, long)]
        workflow: String,

        /// Spoken language of the input
        #[arg(long, default_value = AUTO_LANG)]
        source_lang: String,

        /// Translation target (repeatable)
        #[arg(long = "target-lang")]
        target_langs: Vec<String>,

        /// Owner of the job (defaults to $USER)
        #[arg(long)]
        user: Option<String>,

        /// Override a resolved setting, e.g. --set model_size=small
        #[arg(long = "set", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Skip an optional stage (repeatable)
        #[arg(long = "skip")]
        skip_stages: Vec<String>,
    },

    /// Show the detected hardware profile
    Hardware {
        /// Re-detect even if the cached profile is fresh
        #[arg(long)]
        refresh: bool,
    },

    /// List registered environments and whether they are usable
    Envs,

    /// Register (or replace) an environment in the config file
    EnvRegister {
        /// Environment name
        name: String,

        /// Root of the environment (the directory containing bin/)
        runtime_path: PathBuf,

        /// Stage served by this environment (repeatable)
        #[arg(long = "stage")]
        stages: Vec<String>,

        /// Dependency manifest (e.g. requirements.txt) used for fingerprinting
        #[arg(long)]
        requirements: Option<PathBuf>,

        /// Interpreter program inside bin/
        #[arg(long)]
        interpreter: Option<String>,
    },
}
