//! Turns a job request into a persisted, immutable job.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use super::counter::{format_job_id, JobCounter};
use super::errors::{BuildError, BuildResult};
use super::request::{is_valid_language, is_valid_user, JobRequest};
use crate::environments::EnvironmentRegistry;
use crate::manifest::JobManifest;
use crate::models::{
    HardwareProfile, JobConfig, JobConfigParts, JobStage, StageDescriptor, WorkflowCatalog,
    WorkflowDefinition,
};
use crate::template::{placeholders, BUILTIN_PLACEHOLDERS};

/// Upper bound on ids tried when job directories already exist.
const MAX_ID_ATTEMPTS: u32 = 1000;

/// Validates requests and creates job directories.
///
/// All validation happens before anything is written: a request that fails
/// never leaves a job directory, config or manifest behind.
pub struct JobConfigBuilder<'a> {
    catalog: &'a WorkflowCatalog,
    registry: &'a EnvironmentRegistry,
    jobs_root: PathBuf,
    counter: JobCounter,
    date: Option<NaiveDate>,
}

impl<'a> JobConfigBuilder<'a> {
    pub fn new(
        catalog: &'a WorkflowCatalog,
        registry: &'a EnvironmentRegistry,
        jobs_root: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            registry,
            jobs_root: jobs_root.into(),
            counter: JobCounter::new(state_dir),
            date: None,
        }
    }

    /// Use a fixed date for job ids instead of today.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Validate `request` and create the job on disk.
    pub fn build(&self, request: &JobRequest, profile: &HardwareProfile) -> BuildResult<JobConfig> {
        let workflow = self.validate_request(request)?;
        let stages = workflow.ordered_stages();

        let mut resolved_settings = profile.recommended_settings.to_settings_map();
        resolved_settings.extend(request.params.clone());

        check_placeholders(&stages, &resolved_settings)?;

        let stage_environment_map = self.resolve_environments(&stages)?;
        self.require_usable(&stage_environment_map)?;

        let environments: BTreeMap<String, PathBuf> = stage_environment_map
            .values()
            .filter_map(|env| {
                self.registry
                    .descriptor(env)
                    .map(|d| (env.clone(), d.runtime_path.clone()))
            })
            .collect();

        let job_stages: Vec<JobStage> = stages
            .iter()
            .map(|s| JobStage {
                name: s.name.clone(),
                command_template: s.command_template.clone(),
                expected_outputs: s.expected_outputs.clone(),
            })
            .collect();

        let (job_id, job_dir) = self.allocate_job_dir(&request.user)?;

        let config = JobConfig::from_parts(JobConfigParts {
            job_id,
            user: request.user.clone(),
            workflow: workflow.name.clone(),
            source_lang: request.source_lang.clone(),
            target_langs: request.target_langs.clone(),
            environments,
            stage_environment_map,
            resolved_settings,
            input_path: absolute(&request.input_path),
            output_root: job_dir.clone(),
            stages: job_stages,
            skipped_stages: request.skip_stages.clone(),
        });

        if let Err(e) = initialize_job_dir(&config) {
            if let Err(cleanup) = fs::remove_dir_all(&job_dir) {
                tracing::warn!(
                    "Failed to remove partial job directory {}: {}",
                    job_dir.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Created job {} ({} stages, workflow '{}')",
            config.job_id(),
            config.stages().len(),
            config.workflow()
        );
        Ok(config)
    }

    fn validate_request(&self, request: &JobRequest) -> BuildResult<&'a WorkflowDefinition> {
        let workflow = self.catalog.get(&request.workflow).ok_or_else(|| {
            BuildError::configuration(format!(
                "unknown workflow '{}' (known: {})",
                request.workflow,
                self.catalog.names().join(", ")
            ))
        })?;
        workflow.check().map_err(BuildError::configuration)?;

        if !is_valid_user(&request.user) {
            return Err(BuildError::configuration(format!(
                "invalid user name '{}' (letters, digits, '_' and '.' only)",
                request.user
            )));
        }

        if !request.input_path.exists() {
            return Err(BuildError::configuration(format!(
                "input file {} does not exist",
                request.input_path.display()
            )));
        }

        if !is_valid_language(&request.source_lang) {
            return Err(BuildError::configuration(format!(
                "invalid source language '{}'",
                request.source_lang
            )));
        }
        if let Some(bad) = request
            .target_langs
            .iter()
            .find(|l| l.as_str() == super::request::AUTO_LANG || !is_valid_language(l))
        {
            return Err(BuildError::configuration(format!(
                "invalid target language '{}'",
                bad
            )));
        }
        if workflow.requires_target_lang && request.target_langs.is_empty() {
            return Err(BuildError::configuration(format!(
                "workflow '{}' needs at least one target language",
                workflow.name
            )));
        }

        for stage in &request.skip_stages {
            match workflow.stage(stage) {
                Some(descriptor) if descriptor.optional => {}
                Some(_) => {
                    return Err(BuildError::configuration(format!(
                        "stage '{}' of workflow '{}' is not optional",
                        stage, workflow.name
                    )));
                }
                None => {
                    return Err(BuildError::configuration(format!(
                        "workflow '{}' has no stage '{}'",
                        workflow.name, stage
                    )));
                }
            }
        }

        Ok(workflow)
    }

    /// Stage name to environment: the stage's declaration, else the registry.
    fn resolve_environments(
        &self,
        stages: &[&StageDescriptor],
    ) -> BuildResult<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for stage in stages {
            let env = match stage.required_environment {
                Some(ref env) => env.clone(),
                None => self.registry.resolve(&stage.name)?.to_string(),
            };
            map.insert(stage.name.clone(), env);
        }
        Ok(map)
    }

    /// Every environment must validate; all failures are reported together.
    fn require_usable(&self, stage_environment_map: &BTreeMap<String, String>) -> BuildResult<()> {
        let required: BTreeSet<&str> = stage_environment_map.values().map(|s| s.as_str()).collect();
        let missing: Vec<String> = required
            .into_iter()
            .filter(|env| !self.registry.validate(env))
            .map(|env| env.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BuildError::MissingEnvironments { names: missing })
        }
    }

    /// Allocate an id and claim its directory.
    ///
    /// An existing directory (e.g. after the counter file was reset) is never
    /// reused; the next counter value is tried instead.
    fn allocate_job_dir(&self, user: &str) -> BuildResult<(String, PathBuf)> {
        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        fs::create_dir_all(&self.jobs_root).map_err(|e| BuildError::io(&self.jobs_root, e))?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let counter = self.counter.next(user, date)?;
            let job_id = format_job_id(date, user, counter);
            let job_dir = self.jobs_root.join(&job_id);
            match fs::create_dir(&job_dir) {
                Ok(()) => return Ok((job_id, job_dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!("Job directory {} already exists, skipping id", job_dir.display());
                }
                Err(e) => return Err(BuildError::io(&job_dir, e)),
            }
        }
        Err(BuildError::configuration(format!(
            "could not find a free job id for '{}' under {}",
            user,
            self.jobs_root.display()
        )))
    }
}

/// Create the job layout and write `job.json` and `manifest.json`.
fn initialize_job_dir(config: &JobConfig) -> BuildResult<()> {
    let logs = config.logs_dir();
    fs::create_dir_all(&logs).map_err(|e| BuildError::io(&logs, e))?;
    for stage in config.stages() {
        let dir = config.stage_dir(&stage.name);
        fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
    }

    config
        .persist()
        .map_err(|e| BuildError::io(config.config_path(), e))?;
    JobManifest::create(
        config.manifest_path(),
        config.job_id(),
        config.workflow(),
        &config.stage_names(),
    )?;
    Ok(())
}

/// Every `{placeholder}` in commands and expected outputs must be known.
fn check_placeholders(
    stages: &[&StageDescriptor],
    settings: &BTreeMap<String, serde_json::Value>,
) -> BuildResult<()> {
    for stage in stages {
        let templates = stage
            .command_template
            .iter()
            .chain(stage.expected_outputs.iter());
        for template in templates {
            for name in placeholders(template) {
                if !BUILTIN_PLACEHOLDERS.contains(&name) && !settings.contains_key(name) {
                    return Err(BuildError::configuration(format!(
                        "stage '{}' uses unknown placeholder {{{}}} in '{}'",
                        stage.name, name, template
                    )));
                }
            }
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::environments::EnvironmentDescriptor;
    use crate::models::{AcceleratorType, StageStatus};
    use crate::testutil::{input_file, usable_env};
    use chrono::Utc;
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        catalog: WorkflowCatalog,
        registry: EnvironmentRegistry,
        input: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let envs = dir.path().join("envs");
            let registry = EnvironmentRegistry::from_descriptors(
                vec![
                    usable_env(&envs, "A", &["demux", "align"]),
                    usable_env(&envs, "B", &["asr"]),
                ],
                None,
            )
            .unwrap();
            let catalog = WorkflowCatalog::new().with_workflow(WorkflowDefinition::new(
                "transcribe",
                vec![
                    StageDescriptor::new("demux", 0, "A", &["demux", "{input}"], &["audio.wav"])
                        .without_environment(),
                    StageDescriptor::new("asr", 1, "B", &["asr", "--model", "{model_size}"], &[])
                        .without_environment(),
                    StageDescriptor::new("align", 2, "A", &["align", "{stage_dir}"], &[])
                        .without_environment()
                        .optional(),
                ],
            ));
            let input = input_file(dir.path());
            Self {
                dir,
                catalog,
                registry,
                input,
            }
        }

        fn builder(&self) -> JobConfigBuilder<'_> {
            JobConfigBuilder::new(
                &self.catalog,
                &self.registry,
                self.dir.path().join("jobs"),
                self.dir.path().join("state"),
            )
            .with_date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        }

        fn request(&self) -> JobRequest {
            JobRequest::new(&self.input, "transcribe", "alice").source_lang("en")
        }

        fn job_dirs(&self) -> usize {
            let jobs = self.dir.path().join("jobs");
            fs::read_dir(jobs).map(|d| d.count()).unwrap_or(0)
        }
    }

    fn profile() -> HardwareProfile {
        HardwareProfile::new("linux-x86_64", AcceleratorType::Cpu, "cpu", Utc::now())
    }

    #[test]
    fn builds_job_with_layout_config_and_manifest() {
        let fx = Fixture::new();
        let config = fx
            .builder()
            .build(&fx.request().param("model_size", "medium"), &profile())
            .unwrap();

        assert_eq!(config.job_id(), "job-20250101-alice-0001");
        assert_eq!(config.stage_names(), vec!["demux", "asr", "align"]);
        assert_eq!(config.environment_for("demux"), Some("A"));
        assert_eq!(config.environment_for("asr"), Some("B"));
        assert_eq!(config.environments().len(), 2);

        // User params win over hardware recommendations
        assert_eq!(config.resolved_settings()["model_size"], Value::from("medium"));
        assert_eq!(config.resolved_settings()["precision"], Value::from("int8"));

        assert!(config.config_path().is_file());
        assert!(config.logs_dir().is_dir());
        assert!(config.stage_dir("asr").is_dir());

        let manifest = JobManifest::load(config.manifest_path()).unwrap();
        manifest.check_matches(&config).unwrap();
        assert!(manifest
            .entries()
            .iter()
            .all(|e| e.status == StageStatus::Pending));
    }

    #[test]
    fn concurrent_builds_get_increasing_ids() {
        let fx = Fixture::new();
        let profile = profile();

        let mut ids: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let fx = &fx;
                    let profile = &profile;
                    s.spawn(move || {
                        fx.builder()
                            .build(&fx.request(), profile)
                            .unwrap()
                            .job_id()
                            .to_string()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        ids.sort();

        assert_eq!(
            ids,
            vec!["job-20250101-alice-0001", "job-20250101-alice-0002"]
        );
    }

    #[test]
    fn existing_job_dir_is_never_reused() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.dir.path().join("jobs").join("job-20250101-alice-0001")).unwrap();

        let config = fx.builder().build(&fx.request(), &profile()).unwrap();
        assert_eq!(config.job_id(), "job-20250101-alice-0002");
    }

    #[test]
    fn unknown_workflow_is_configuration_error() {
        let fx = Fixture::new();
        let request = JobRequest::new(&fx.input, "dub", "alice");
        let err = fx.builder().build(&request, &profile()).unwrap_err();

        assert!(matches!(err, BuildError::Configuration { .. }));
        assert!(err.to_string().contains("transcribe"));
        assert_eq!(fx.job_dirs(), 0);
    }

    #[test]
    fn missing_environments_are_all_listed() {
        let fx = Fixture::new();
        let registry = EnvironmentRegistry::from_descriptors(
            vec![
                EnvironmentDescriptor::new("A", "/nonexistent/a").serving(&["demux", "align"]),
                EnvironmentDescriptor::new("B", "/nonexistent/b").serving(&["asr"]),
            ],
            None,
        )
        .unwrap();
        let builder = JobConfigBuilder::new(
            &fx.catalog,
            &registry,
            fx.dir.path().join("jobs"),
            fx.dir.path().join("state"),
        );

        let err = builder.build(&fx.request(), &profile()).unwrap_err();
        match err {
            BuildError::MissingEnvironments { names } => assert_eq!(names, vec!["A", "B"]),
            other => panic!("unexpected error: {other}"),
        }
        // Fails before any job or counter state exists
        assert_eq!(fx.job_dirs(), 0);
        assert!(!fx.dir.path().join("state").exists());
    }

    #[test]
    fn unmapped_stage_fails_at_build_time() {
        let fx = Fixture::new();
        let registry = EnvironmentRegistry::from_descriptors(
            vec![usable_env(&fx.dir.path().join("envs"), "A", &["demux", "align"])],
            None,
        )
        .unwrap();
        let builder = JobConfigBuilder::new(
            &fx.catalog,
            &registry,
            fx.dir.path().join("jobs"),
            fx.dir.path().join("state"),
        );

        let err = builder.build(&fx.request(), &profile()).unwrap_err();
        assert!(matches!(err, BuildError::Registry(_)));
        assert!(err.to_string().contains("asr"));
    }

    #[test]
    fn request_validation() {
        let fx = Fixture::new();
        let builder = fx.builder();
        let cases = vec![
            JobRequest::new(fx.dir.path().join("missing.mkv"), "transcribe", "alice"),
            fx.request().source_lang("english"),
            fx.request().target_lang("auto"),
            fx.request().skip("asr"),
            fx.request().skip("translate"),
            JobRequest::new(&fx.input, "transcribe", "bad/user"),
        ];
        for request in cases {
            let err = builder.build(&request, &profile()).unwrap_err();
            assert!(
                matches!(err, BuildError::Configuration { .. }),
                "{request:?} gave {err}"
            );
        }
        assert_eq!(fx.job_dirs(), 0);
    }

    #[test]
    fn target_language_required_when_workflow_says_so() {
        let mut fx = Fixture::new();
        let mut workflow = fx.catalog.get("transcribe").unwrap().clone();
        workflow.name = "translate".to_string();
        workflow.requires_target_lang = true;
        fx.catalog.insert(workflow);

        let request = JobRequest::new(&fx.input, "translate", "alice");
        let err = fx.builder().build(&request, &profile()).unwrap_err();
        assert!(err.to_string().contains("target language"));

        let config = fx
            .builder()
            .build(&request.clone().target_lang("fr"), &profile())
            .unwrap();
        assert_eq!(config.target_langs().to_vec(), vec!["fr"]);
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let mut fx = Fixture::new();
        fx.catalog.insert(WorkflowDefinition::new(
            "transcribe",
            vec![StageDescriptor::new("demux", 0, "A", &["demux", "{speaker_count}"], &[])],
        ));

        let err = fx.builder().build(&fx.request(), &profile()).unwrap_err();
        assert!(err.to_string().contains("speaker_count"));

        // Known once supplied as a parameter
        let request = fx.request().param("speaker_count", 2);
        fx.builder().build(&request, &profile()).unwrap();
    }

    #[test]
    fn skipped_optional_stage_is_recorded() {
        let fx = Fixture::new();
        let config = fx
            .builder()
            .build(&fx.request().skip("align"), &profile())
            .unwrap();
        assert!(config.is_skipped("align"));
        assert!(!config.is_skipped("asr"));
    }

    #[test]
    fn persisted_config_is_immutable() {
        let fx = Fixture::new();
        let config = fx.builder().build(&fx.request(), &profile()).unwrap();
        let before = fs::read(config.config_path()).unwrap();

        // A second write of the same job is refused and the file is untouched
        assert!(config.persist().is_err());
        assert_eq!(fs::read(config.config_path()).unwrap(), before);

        // Different parameters produce a new job
        let other = fx
            .builder()
            .build(&fx.request().param("batch_size", 2), &profile())
            .unwrap();
        assert_ne!(other.job_id(), config.job_id());
        assert_eq!(JobConfig::load(&config.config_path()).unwrap(), config);
    }
}
