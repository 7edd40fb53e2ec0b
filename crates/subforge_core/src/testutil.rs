//! Helpers shared by unit tests.

use std::fs;
use std::path::Path;

use crate::environments::EnvironmentDescriptor;

/// Create a runtime under `root/name` with an executable `bin/python` that
/// exits 0, so the environment validates.
#[cfg(unix)]
pub fn usable_env(root: &Path, name: &str, stages: &[&str]) -> EnvironmentDescriptor {
    use std::os::unix::fs::PermissionsExt;

    let descriptor = EnvironmentDescriptor::new(name, root.join(name)).serving(stages);
    fs::create_dir_all(descriptor.bin_dir()).unwrap();
    let interpreter = descriptor.interpreter_path();
    fs::write(&interpreter, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&interpreter, fs::Permissions::from_mode(0o755)).unwrap();
    descriptor
}

/// An input media file for job requests.
pub fn input_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("input.mkv");
    fs::write(&path, b"not really a video").unwrap();
    path
}

/// Persist a job with one stage per `(name, env)` pair under `root/jobs`,
/// bypassing the builder (no environment validation).
pub fn persisted_job(
    root: &Path,
    stages: &[(&str, &str)],
) -> (crate::models::JobConfig, crate::manifest::JobManifest) {
    persisted_job_with(root, stages, |_| {})
}

/// Like [`persisted_job`], letting the caller adjust the config first.
pub fn persisted_job_with(
    root: &Path,
    stages: &[(&str, &str)],
    adjust: impl FnOnce(&mut crate::models::JobConfigParts),
) -> (crate::models::JobConfig, crate::manifest::JobManifest) {
    use crate::models::{JobConfig, JobConfigParts, JobStage};
    use std::collections::BTreeMap;

    let job_dir = root.join("jobs").join("job-20250101-alice-0001");
    fs::create_dir_all(&job_dir).unwrap();

    let mut parts = JobConfigParts {
        job_id: "job-20250101-alice-0001".to_string(),
        user: "alice".to_string(),
        workflow: "transcribe".to_string(),
        source_lang: "en".to_string(),
        target_langs: vec![],
        environments: stages
            .iter()
            .map(|(_, env)| (env.to_string(), root.join("envs").join(env)))
            .collect(),
        stage_environment_map: stages
            .iter()
            .map(|(stage, env)| (stage.to_string(), env.to_string()))
            .collect(),
        resolved_settings: BTreeMap::from([(
            "model_size".to_string(),
            serde_json::Value::from("small"),
        )]),
        input_path: input_file(root),
        output_root: job_dir,
        stages: stages
            .iter()
            .map(|(stage, _)| JobStage {
                name: stage.to_string(),
                command_template: vec![
                    format!("run_{stage}"),
                    "--model".to_string(),
                    "{model_size}".to_string(),
                    "--out".to_string(),
                    "{stage_dir}".to_string(),
                ],
                expected_outputs: vec![],
            })
            .collect(),
        skipped_stages: vec![],
    };
    adjust(&mut parts);
    let config = JobConfig::from_parts(parts);
    config.persist().unwrap();

    let names: Vec<&str> = stages.iter().map(|(s, _)| *s).collect();
    let manifest = crate::manifest::JobManifest::create(
        config.manifest_path(),
        config.job_id(),
        config.workflow(),
        &names,
    )
    .unwrap();
    (config, manifest)
}
