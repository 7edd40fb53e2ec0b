//! Stage to environment resolution and isolated command execution.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::descriptor::EnvironmentDescriptor;
use super::errors::{RegistryError, RegistryResult};
use crate::config::Settings;

/// Outcome of one command run inside an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Process exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock run time.
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run a stage command inside a named environment.
///
/// `EnvironmentRegistry` is the production implementation; the seam exists
/// so the orchestrator can be driven with a recording or scripted runner.
pub trait StageRunner: Send + Sync {
    fn execute(
        &self,
        env_name: &str,
        command: &[String],
        working_dir: &Path,
        extra_env: &BTreeMap<String, String>,
    ) -> RegistryResult<CommandResult>;
}

/// Registered environments and the stage mappings that point at them.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    descriptors: BTreeMap<String, EnvironmentDescriptor>,
    stage_map: BTreeMap<String, String>,
    default_environment: Option<String>,
}

impl EnvironmentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors and an optional default environment.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = EnvironmentDescriptor>,
        default_environment: Option<&str>,
    ) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        if let Some(name) = default_environment {
            registry.set_default(name)?;
        }
        Ok(registry)
    }

    /// Build a registry from the `[[environments]]` and `[registry]` config.
    ///
    /// Paths are taken as given; resolve them first (see
    /// `Settings::resolved_against`).
    pub fn from_settings(settings: &Settings) -> RegistryResult<Self> {
        Self::from_descriptors(
            settings.environments.iter().cloned(),
            settings.registry.default_environment.as_deref(),
        )
    }

    /// Register an environment by name.
    ///
    /// Registering the same name again replaces the descriptor and its stage
    /// mappings. A stage already served by a different environment is a
    /// conflict.
    pub fn register(&mut self, descriptor: EnvironmentDescriptor) -> RegistryResult<()> {
        for stage in &descriptor.served_stages {
            if let Some(existing) = self.stage_map.get(stage) {
                if existing != &descriptor.name {
                    return Err(RegistryError::ConflictingMapping {
                        stage: stage.clone(),
                        existing: existing.clone(),
                        requested: descriptor.name.clone(),
                    });
                }
            }
        }

        self.stage_map.retain(|_, env| env != &descriptor.name);
        for stage in &descriptor.served_stages {
            self.stage_map
                .insert(stage.clone(), descriptor.name.clone());
        }

        tracing::debug!(
            "Registered environment '{}' at {} ({} stages)",
            descriptor.name,
            descriptor.runtime_path.display(),
            descriptor.served_stages.len()
        );
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Set the environment used for stages without an explicit mapping.
    pub fn set_default(&mut self, env_name: &str) -> RegistryResult<()> {
        if !self.descriptors.contains_key(env_name) {
            return Err(RegistryError::unknown_environment(env_name));
        }
        self.default_environment = Some(env_name.to_string());
        Ok(())
    }

    /// The configured default environment.
    pub fn default_environment(&self) -> Option<&str> {
        self.default_environment.as_deref()
    }

    /// Resolve the environment for a stage.
    ///
    /// Explicit mapping first, then the default. Never guesses.
    pub fn resolve(&self, stage_name: &str) -> RegistryResult<&str> {
        if let Some(env) = self.stage_map.get(stage_name) {
            return Ok(env.as_str());
        }
        self.default_environment
            .as_deref()
            .ok_or_else(|| RegistryError::unmapped_stage(stage_name))
    }

    /// Whether an environment is registered and its runtime is usable.
    pub fn validate(&self, env_name: &str) -> bool {
        match self.descriptors.get(env_name) {
            Some(descriptor) => {
                let usable = descriptor.is_usable();
                if !usable {
                    tracing::debug!(
                        "Environment '{}' unusable: {} missing or not executable",
                        env_name,
                        descriptor.interpreter_path().display()
                    );
                }
                usable
            }
            None => false,
        }
    }

    /// Look up a descriptor.
    pub fn descriptor(&self, env_name: &str) -> Option<&EnvironmentDescriptor> {
        self.descriptors.get(env_name)
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> impl Iterator<Item = &EnvironmentDescriptor> {
        self.descriptors.values()
    }

    /// Run `command` inside an environment.
    ///
    /// The environment's bin directory is prefixed onto the child's `PATH`
    /// and `VIRTUAL_ENV` is set for the child only; this process's own
    /// environment is never touched. A non-zero exit is returned as a result,
    /// not an error. There is no retry.
    pub fn execute(
        &self,
        env_name: &str,
        command: &[String],
        working_dir: &Path,
        extra_env: &BTreeMap<String, String>,
    ) -> RegistryResult<CommandResult> {
        let descriptor = self
            .descriptors
            .get(env_name)
            .ok_or_else(|| RegistryError::unknown_environment(env_name))?;
        let (program, args) = command.split_first().ok_or_else(|| RegistryError::EmptyCommand {
            env: env_name.to_string(),
        })?;

        let path_var = child_path(&descriptor.bin_dir()).map_err(|message| {
            RegistryError::InvalidPath {
                env: env_name.to_string(),
                message,
            }
        })?;
        let program_path = resolve_program(program, &path_var, working_dir);

        tracing::debug!(
            "[{}] $ {} (cwd {})",
            env_name,
            command.join(" "),
            working_dir.display()
        );

        let mut cmd = Command::new(&program_path);
        cmd.args(args)
            .current_dir(working_dir)
            .env("PATH", &path_var)
            .env("VIRTUAL_ENV", &descriptor.runtime_path)
            .env_remove("PYTHONHOME")
            .envs(extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let output = cmd
            .output()
            .map_err(|e| RegistryError::spawn(env_name, program.as_str(), e))?;
        let duration = started.elapsed();

        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration,
        };

        tracing::debug!(
            "[{}] {} exited with {} after {:.2}s",
            env_name,
            program,
            result.exit_code,
            duration.as_secs_f64()
        );
        Ok(result)
    }
}

impl StageRunner for EnvironmentRegistry {
    fn execute(
        &self,
        env_name: &str,
        command: &[String],
        working_dir: &Path,
        extra_env: &BTreeMap<String, String>,
    ) -> RegistryResult<CommandResult> {
        EnvironmentRegistry::execute(self, env_name, command, working_dir, extra_env)
    }
}

/// `bin_dir` followed by the current `PATH`, for a child process.
fn child_path(bin_dir: &Path) -> Result<OsString, String> {
    let inherited = env::var_os("PATH").unwrap_or_default();
    let dirs = std::iter::once(bin_dir.to_path_buf()).chain(env::split_paths(&inherited));
    env::join_paths(dirs).map_err(|e| e.to_string())
}

/// Look a bare program name up on the child `PATH`.
///
/// Names containing a path separator are used as given.
fn resolve_program(program: &str, path_var: &OsString, working_dir: &Path) -> PathBuf {
    if Path::new(program).components().count() > 1 {
        return PathBuf::from(program);
    }
    which::which_in(program, Some(path_var), working_dir).unwrap_or_else(|_| PathBuf::from(program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn env(name: &str, stages: &[&str]) -> EnvironmentDescriptor {
        EnvironmentDescriptor::new(name, format!("/envs/{name}")).serving(stages)
    }

    fn scenario_registry() -> EnvironmentRegistry {
        EnvironmentRegistry::from_descriptors(
            vec![env("A", &["demux", "align"]), env("B", &["asr"])],
            None,
        )
        .unwrap()
    }

    #[test]
    fn resolve_uses_explicit_mapping_first() {
        let mut registry = scenario_registry();
        registry.set_default("B").unwrap();

        assert_eq!(registry.resolve("demux").unwrap(), "A");
        assert_eq!(registry.resolve("asr").unwrap(), "B");
        assert_eq!(registry.resolve("translate").unwrap(), "B");
    }

    #[test]
    fn resolve_is_deterministic() {
        let registry = scenario_registry();
        for _ in 0..10 {
            assert_eq!(registry.resolve("asr").unwrap(), "B");
            assert_eq!(registry.resolve("align").unwrap(), "A");
        }
    }

    #[test]
    fn unknown_stage_without_default_is_unmapped() {
        let registry = EnvironmentRegistry::from_descriptors(vec![env("A", &["demux"])], None).unwrap();
        let err = registry.resolve("unknown_stage").unwrap_err();
        assert!(matches!(err, RegistryError::UnmappedStage { ref stage } if stage == "unknown_stage"));
    }

    #[test]
    fn register_is_idempotent_by_name() {
        let mut registry = EnvironmentRegistry::new();
        registry.register(env("A", &["demux"])).unwrap();
        registry
            .register(EnvironmentDescriptor::new("A", "/envs/a2").serving(&["align"]))
            .unwrap();

        assert_eq!(registry.descriptors().count(), 1);
        assert_eq!(registry.resolve("align").unwrap(), "A");
        // Old mapping dropped with the old descriptor
        assert!(registry.resolve("demux").is_err());
    }

    #[test]
    fn conflicting_mapping_is_rejected() {
        let mut registry = EnvironmentRegistry::new();
        registry.register(env("A", &["demux"])).unwrap();
        let err = registry
            .register(env("B", &["demux"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingMapping { .. }));
    }

    #[test]
    fn from_settings_applies_default() {
        let mut settings = Settings::default();
        settings.environments = vec![env("A", &["demux"]), env("B", &[])];
        settings.registry.default_environment = Some("B".to_string());

        let registry = EnvironmentRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.resolve("demux").unwrap(), "A");
        assert_eq!(registry.resolve("mux").unwrap(), "B");
        let names: Vec<&str> = registry.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn default_must_be_registered() {
        let mut registry = EnvironmentRegistry::new();
        assert!(registry.set_default("ghost").is_err());
    }

    #[test]
    fn validate_unknown_environment_is_false() {
        let registry = EnvironmentRegistry::new();
        assert!(!registry.validate("nope"));
    }

    #[test]
    fn execute_rejects_empty_command() {
        let dir = tempdir().unwrap();
        let mut registry = EnvironmentRegistry::new();
        registry.register(env("A", &[])).unwrap();
        let err = registry
            .execute("A", &[], dir.path(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyCommand { .. }));
    }

    #[cfg(unix)]
    fn make_env(root: &Path, name: &str, scripts: &[(&str, &str)]) -> EnvironmentDescriptor {
        use std::os::unix::fs::PermissionsExt;

        let descriptor = EnvironmentDescriptor::new(name, root.join(name));
        fs::create_dir_all(descriptor.bin_dir()).unwrap();
        for (file, body) in scripts {
            let path = descriptor.bin_dir().join(file);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        descriptor
    }

    #[cfg(unix)]
    #[test]
    fn execute_runs_program_from_environment_bin() {
        let dir = tempdir().unwrap();
        let env_a = make_env(dir.path(), "A", &[("python", "exit 0"), ("whichenv", "echo A:$VIRTUAL_ENV")]);
        let env_b = make_env(dir.path(), "B", &[("python", "exit 0"), ("whichenv", "echo B:$VIRTUAL_ENV")]);
        let mut registry = EnvironmentRegistry::new();
        registry.register(env_a.clone()).unwrap();
        registry.register(env_b).unwrap();

        assert!(registry.validate("A"));

        let parent_path = env::var_os("PATH");
        let parent_venv = env::var_os("VIRTUAL_ENV");

        let cmd = vec!["whichenv".to_string()];
        let a = registry.execute("A", &cmd, dir.path(), &BTreeMap::new()).unwrap();
        let b = registry.execute("B", &cmd, dir.path(), &BTreeMap::new()).unwrap();

        assert!(a.success());
        assert_eq!(a.stdout.trim(), format!("A:{}", env_a.runtime_path.display()));
        assert!(b.stdout.starts_with("B:"));

        // No activation leaks into this process
        assert_eq!(env::var_os("PATH"), parent_path);
        assert_eq!(env::var_os("VIRTUAL_ENV"), parent_venv);
    }

    #[cfg(unix)]
    #[test]
    fn execute_reports_exit_code_and_extra_env() {
        let dir = tempdir().unwrap();
        let mut registry = EnvironmentRegistry::new();
        registry.register(make_env(dir.path(), "A", &[])).unwrap();

        let extra = BTreeMap::from([("SUBFORGE_STAGE".to_string(), "asr".to_string())]);
        let cmd: Vec<String> = ["sh", "-c", "echo stage=$SUBFORGE_STAGE; echo oops >&2; exit 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = registry.execute("A", &cmd, dir.path(), &extra).unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert_eq!(result.stdout.trim(), "stage=asr");
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn execute_missing_program_is_spawn_error() {
        let dir = tempdir().unwrap();
        let mut registry = EnvironmentRegistry::new();
        registry.register(make_env(dir.path(), "A", &[])).unwrap();

        let cmd = vec!["definitely-not-a-real-program-xyz".to_string()];
        let err = registry
            .execute("A", &cmd, dir.path(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Spawn { .. }));
    }
}
