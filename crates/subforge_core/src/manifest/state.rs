//! Manifest entries, transitions and persistence.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ManifestError, ManifestResult};
use crate::fsutil;
use crate::models::{JobConfig, OverallStatus, StageStatus};

/// Execution record of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "name")]
    pub stage_name: String,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Files the stage produced, relative to its stage directory.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Times the stage entered `running`.
    #[serde(default)]
    pub attempts: u32,
    /// Free-form note (e.g. why a stage was skipped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ManifestEntry {
    fn pending(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_s: None,
            error: None,
            artifacts: Vec::new(),
            attempts: 0,
            note: None,
        }
    }
}

/// Extra data recorded with a terminal transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionMeta {
    /// Measured run time; derived from the timestamps when absent.
    pub duration_s: Option<f64>,
    pub error: Option<String>,
    pub artifacts: Vec<String>,
}

impl TransitionMeta {
    /// Metadata for a successful stage.
    pub fn completed(duration_s: f64, artifacts: Vec<String>) -> Self {
        Self {
            duration_s: Some(duration_s),
            error: None,
            artifacts,
        }
    }

    /// Metadata for a failed stage.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            duration_s: None,
            error: Some(error.into()),
            artifacts: Vec::new(),
        }
    }

    /// Attach a measured duration.
    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = Some(duration_s);
        self
    }
}

/// The persisted execution state of one job.
///
/// Mutated only by the orchestrator; every mutation is written to disk via
/// temp file + rename before it returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    job_id: String,
    workflow: String,
    #[serde(rename = "stages")]
    entries: Vec<ManifestEntry>,
    overall_status: OverallStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl JobManifest {
    /// Create a manifest with every stage pending and write it to `path`.
    ///
    /// Fails if a manifest already exists there.
    pub fn create(
        path: impl Into<PathBuf>,
        job_id: impl Into<String>,
        workflow: impl Into<String>,
        stages: &[&str],
    ) -> ManifestResult<Self> {
        let path = path.into();
        let mut manifest = Self::in_memory(job_id, workflow, stages);
        fsutil::write_json_new(&path, &manifest).map_err(|e| ManifestError::io(&path, e))?;
        manifest.path = Some(path);
        Ok(manifest)
    }

    /// Create an unpersisted manifest (saves are no-ops).
    pub fn in_memory(
        job_id: impl Into<String>,
        workflow: impl Into<String>,
        stages: &[&str],
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            workflow: workflow.into(),
            entries: stages.iter().map(|s| ManifestEntry::pending(*s)).collect(),
            overall_status: OverallStatus::Running,
            created_at: now,
            updated_at: now,
            path: None,
        }
    }

    /// Load a manifest, refusing anything inconsistent.
    ///
    /// There is no automatic repair: a manifest that cannot be parsed, or
    /// whose entries could not have been produced by the state machine, is
    /// reported as corrupt.
    pub fn load(path: impl AsRef<Path>) -> ManifestResult<Self> {
        let path = path.as_ref();
        let mut manifest: JobManifest = fsutil::read_json(path).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                ManifestError::corrupt(path, e.to_string())
            } else {
                ManifestError::io(path, e)
            }
        })?;

        if let Err(reason) = manifest.check_consistency() {
            return Err(ManifestError::corrupt(path, reason));
        }

        manifest.overall_status = manifest.summary();
        manifest.path = Some(path.to_path_buf());
        Ok(manifest)
    }

    fn check_consistency(&self) -> Result<(), String> {
        if self.entries.is_empty() {
            return Err("no stages".to_string());
        }

        // Stages run in order and a run halts at the first non-completed
        // stage, so nothing but pending or skipped entries may follow it.
        let mut names = HashSet::new();
        let mut halted_at: Option<StageStatus> = None;
        for entry in &self.entries {
            if !names.insert(entry.stage_name.as_str()) {
                return Err(format!("stage '{}' listed twice", entry.stage_name));
            }
            match (entry.status, halted_at) {
                (StageStatus::Pending | StageStatus::Skipped, _) => {}
                (status, Some(earlier)) => {
                    return Err(format!(
                        "stage '{}' is {} after a {} stage",
                        entry.stage_name, status, earlier
                    ));
                }
                _ => {}
            }
            if halted_at.is_none()
                && matches!(
                    entry.status,
                    StageStatus::Pending | StageStatus::Running | StageStatus::Failed
                )
            {
                halted_at = Some(entry.status);
            }
        }
        Ok(())
    }

    /// Write the manifest atomically (no-op for in-memory manifests).
    pub fn save(&self) -> ManifestResult<()> {
        if let Some(ref path) = self.path {
            fsutil::write_json_atomic(path, self).map_err(|e| ManifestError::io(path, e))?;
        }
        Ok(())
    }

    /// Apply a state transition and persist it.
    ///
    /// Allowed: `pending → running`, `running → completed`,
    /// `running → failed`. Everything else is an `IllegalTransition`.
    pub fn transition(
        &mut self,
        stage: &str,
        new_state: StageStatus,
        meta: TransitionMeta,
    ) -> ManifestResult<()> {
        let job_id = self.job_id.clone();
        let now = Utc::now();
        let entry = self.entry_mut(stage)?;

        match (entry.status, new_state) {
            (StageStatus::Pending, StageStatus::Running) => {
                entry.started_at = Some(now);
                entry.ended_at = None;
                entry.duration_s = None;
                entry.error = None;
                entry.attempts += 1;
            }
            (StageStatus::Running, StageStatus::Completed) => {
                entry.ended_at = Some(now);
                entry.duration_s = meta.duration_s.or_else(|| elapsed_s(entry.started_at, now));
                entry.artifacts = meta.artifacts;
                entry.error = None;
            }
            (StageStatus::Running, StageStatus::Failed) => {
                entry.ended_at = Some(now);
                entry.duration_s = meta.duration_s.or_else(|| elapsed_s(entry.started_at, now));
                entry.artifacts = meta.artifacts;
                entry.error = meta.error;
            }
            (from, to) => {
                return Err(ManifestError::IllegalTransition {
                    job_id,
                    stage: stage.to_string(),
                    from,
                    to,
                });
            }
        }
        entry.status = new_state;

        tracing::debug!("[{}] {} -> {}", self.job_id, stage, new_state);
        self.commit(now)
    }

    /// Return an interrupted or failed stage to `pending` for resume.
    ///
    /// Clears timestamps, error and artifacts; the attempt count is kept.
    pub fn reset_for_resume(&mut self, stage: &str) -> ManifestResult<()> {
        let job_id = self.job_id.clone();
        let now = Utc::now();
        let entry = self.entry_mut(stage)?;

        match entry.status {
            StageStatus::Failed | StageStatus::Running => {}
            from => {
                return Err(ManifestError::IllegalTransition {
                    job_id,
                    stage: stage.to_string(),
                    from,
                    to: StageStatus::Pending,
                });
            }
        }

        let previous = entry.status;
        entry.status = StageStatus::Pending;
        entry.started_at = None;
        entry.ended_at = None;
        entry.duration_s = None;
        entry.error = None;
        entry.artifacts.clear();

        tracing::debug!("[{}] {} reset from {} for resume", self.job_id, stage, previous);
        self.commit(now)
    }

    /// Mark a pending stage as deliberately not executed.
    pub fn skip(&mut self, stage: &str, reason: impl Into<String>) -> ManifestResult<()> {
        let job_id = self.job_id.clone();
        let now = Utc::now();
        let entry = self.entry_mut(stage)?;

        if entry.status != StageStatus::Pending {
            return Err(ManifestError::IllegalTransition {
                job_id,
                stage: stage.to_string(),
                from: entry.status,
                to: StageStatus::Skipped,
            });
        }
        entry.status = StageStatus::Skipped;
        entry.note = Some(reason.into());

        self.commit(now)
    }

    /// Bump `updated_at` and persist without changing any entry.
    pub fn touch(&mut self) -> ManifestResult<()> {
        self.commit(Utc::now())
    }

    fn commit(&mut self, now: DateTime<Utc>) -> ManifestResult<()> {
        self.updated_at = now;
        self.overall_status = self.summary();
        self.save()
    }

    /// Aggregate status: failed if any stage failed, completed if every stage
    /// is completed or skipped, running otherwise.
    pub fn summary(&self) -> OverallStatus {
        if self.entries.iter().any(|e| e.status == StageStatus::Failed) {
            OverallStatus::Failed
        } else if self.entries.iter().all(|e| e.status.is_done()) {
            OverallStatus::Completed
        } else {
            OverallStatus::Running
        }
    }

    /// Stages that still need work, in workflow order.
    pub fn resumable_stages(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.status.is_done())
            .map(|e| e.stage_name.clone())
            .collect()
    }

    /// Whether no stage has ever been started or skipped.
    pub fn is_fresh(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status == StageStatus::Pending && e.attempts == 0)
    }

    /// Confirm the manifest belongs to `config` and lists its stages in order.
    pub fn check_matches(&self, config: &JobConfig) -> ManifestResult<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| config.manifest_path());

        if self.job_id != config.job_id() {
            return Err(ManifestError::corrupt(
                path,
                format!("manifest is for job '{}', not '{}'", self.job_id, config.job_id()),
            ));
        }

        let ours: Vec<&str> = self.entries.iter().map(|e| e.stage_name.as_str()).collect();
        let expected = config.stage_names();
        if ours != expected {
            return Err(ManifestError::corrupt(
                path,
                format!(
                    "manifest stages [{}] do not match job stages [{}]",
                    ours.join(", "),
                    expected.join(", ")
                ),
            ));
        }
        Ok(())
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn entry(&self, stage: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.stage_name == stage)
    }

    /// Status of a stage, if it exists.
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.entry(stage).map(|e| e.status)
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Where the manifest is persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn entry_mut(&mut self, stage: &str) -> ManifestResult<&mut ManifestEntry> {
        let job_id = &self.job_id;
        self.entries
            .iter_mut()
            .find(|e| e.stage_name == stage)
            .ok_or_else(|| ManifestError::UnknownStage {
                job_id: job_id.clone(),
                stage: stage.to_string(),
            })
    }
}

fn elapsed_s(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<f64> {
    started_at.map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const STAGES: [&str; 3] = ["demux", "asr", "align"];

    fn manifest_in(dir: &Path) -> JobManifest {
        JobManifest::create(
            dir.join("manifest.json"),
            "job-20250101-alice-0001",
            "transcribe",
            &STAGES,
        )
        .unwrap()
    }

    #[test]
    fn create_starts_all_pending() {
        let dir = tempdir().unwrap();
        let manifest = manifest_in(dir.path());

        assert!(manifest.is_fresh());
        assert_eq!(manifest.summary(), OverallStatus::Running);
        assert_eq!(manifest.resumable_stages(), vec!["demux", "asr", "align"]);

        let loaded = JobManifest::load(dir.path().join("manifest.json")).unwrap();
        assert_eq!(loaded.entries(), manifest.entries());
    }

    #[test]
    fn create_refuses_existing_manifest() {
        let dir = tempdir().unwrap();
        manifest_in(dir.path());
        let err = JobManifest::create(
            dir.path().join("manifest.json"),
            "job-x",
            "transcribe",
            &STAGES,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn legal_transitions_are_persisted() {
        let dir = tempdir().unwrap();
        let mut manifest = manifest_in(dir.path());

        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        manifest
            .transition(
                "demux",
                StageStatus::Completed,
                TransitionMeta::completed(1.5, vec!["audio.wav".to_string()]),
            )
            .unwrap();

        let loaded = JobManifest::load(manifest.path().unwrap()).unwrap();
        let entry = loaded.entry("demux").unwrap();
        assert_eq!(entry.status, StageStatus::Completed);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.duration_s, Some(1.5));
        assert_eq!(entry.artifacts, vec!["audio.wav"]);
        assert!(entry.started_at.is_some() && entry.ended_at.is_some());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);

        // pending -> completed
        let err = manifest
            .transition("demux", StageStatus::Completed, TransitionMeta::default())
            .unwrap_err();
        assert!(matches!(err, ManifestError::IllegalTransition { .. }));

        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        // running -> running
        assert!(manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .is_err());

        manifest
            .transition("demux", StageStatus::Failed, TransitionMeta::failed("exit 1"))
            .unwrap();
        // failed -> running without a reset
        assert!(manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .is_err());
        // failed -> completed
        assert!(manifest
            .transition("demux", StageStatus::Completed, TransitionMeta::default())
            .is_err());

        assert_eq!(manifest.status_of("demux"), Some(StageStatus::Failed));
    }

    #[test]
    fn unknown_stage_is_an_error() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);
        let err = manifest
            .transition("translate", StageStatus::Running, TransitionMeta::default())
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownStage { .. }));
    }

    #[test]
    fn summary_follows_entries() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);
        for stage in ["demux", "asr"] {
            manifest
                .transition(stage, StageStatus::Running, TransitionMeta::default())
                .unwrap();
            manifest
                .transition(stage, StageStatus::Completed, TransitionMeta::default())
                .unwrap();
        }
        assert_eq!(manifest.summary(), OverallStatus::Running);

        manifest.skip("align", "not needed").unwrap();
        assert_eq!(manifest.summary(), OverallStatus::Completed);
        assert_eq!(manifest.overall_status(), OverallStatus::Completed);
        assert!(manifest.resumable_stages().is_empty());
    }

    #[test]
    fn failure_sets_overall_failed() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);
        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        manifest
            .transition("demux", StageStatus::Failed, TransitionMeta::failed("boom"))
            .unwrap();

        assert_eq!(manifest.summary(), OverallStatus::Failed);
        assert_eq!(manifest.entry("demux").unwrap().error.as_deref(), Some("boom"));
        assert_eq!(manifest.resumable_stages(), vec!["demux", "asr", "align"]);
    }

    #[test]
    fn reset_for_resume_clears_run_data() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);
        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        manifest
            .transition("demux", StageStatus::Failed, TransitionMeta::failed("boom"))
            .unwrap();

        manifest.reset_for_resume("demux").unwrap();
        let entry = manifest.entry("demux").unwrap();
        assert_eq!(entry.status, StageStatus::Pending);
        assert_eq!(entry.error, None);
        assert_eq!(entry.started_at, None);
        assert_eq!(entry.attempts, 1);

        // Pending cannot be reset again
        assert!(manifest.reset_for_resume("demux").is_err());

        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        assert_eq!(manifest.entry("demux").unwrap().attempts, 2);
    }

    #[test]
    fn completed_stage_cannot_be_reset() {
        let mut manifest = JobManifest::in_memory("job-1", "transcribe", &STAGES);
        manifest
            .transition("demux", StageStatus::Running, TransitionMeta::default())
            .unwrap();
        manifest
            .transition("demux", StageStatus::Completed, TransitionMeta::default())
            .unwrap();
        assert!(manifest.reset_for_resume("demux").is_err());
        assert!(manifest.skip("demux", "late").is_err());
    }

    #[test]
    fn killed_mid_stage_leaves_parseable_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        {
            let mut manifest = manifest_in(dir.path());
            manifest
                .transition("demux", StageStatus::Running, TransitionMeta::default())
                .unwrap();
            manifest
                .transition("demux", StageStatus::Completed, TransitionMeta::default())
                .unwrap();
            manifest
                .transition("asr", StageStatus::Running, TransitionMeta::default())
                .unwrap();
            // Process "dies" here: nothing else is written
        }

        let loaded = JobManifest::load(&path).unwrap();
        assert_eq!(loaded.status_of("demux"), Some(StageStatus::Completed));
        assert_eq!(loaded.status_of("asr"), Some(StageStatus::Running));
        assert_eq!(loaded.status_of("align"), Some(StageStatus::Pending));
        assert_eq!(loaded.overall_status(), OverallStatus::Running);
        assert_eq!(loaded.resumable_stages(), vec!["asr", "align"]);
    }

    #[test]
    fn truncated_manifest_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "{\"job_id\": \"job-1\", \"stages\": [").unwrap();

        let err = JobManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::Corrupt { .. }));
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let dir = tempdir().unwrap();
        let err = JobManifest::load(dir.path().join("manifest.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn impossible_state_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = manifest_in(dir.path());
        manifest.entries[2].status = StageStatus::Completed;
        manifest.save().unwrap();

        let err = JobManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::Corrupt { .. }));
        assert!(err.to_string().contains("after a pending stage"));
    }

    #[test]
    fn nothing_runs_after_a_failed_or_running_stage() {
        use StageStatus::*;
        let cases = [
            ([Completed, Failed, Completed], "after a failed stage"),
            ([Running, Completed, Pending], "after a running stage"),
            ([Running, Running, Pending], "after a running stage"),
            ([Failed, Failed, Pending], "after a failed stage"),
        ];
        for (statuses, message) in cases {
            let dir = tempdir().unwrap();
            let path = dir.path().join("manifest.json");
            let mut manifest = manifest_in(dir.path());
            for (entry, status) in manifest.entries.iter_mut().zip(statuses) {
                entry.status = status;
            }
            manifest.save().unwrap();

            let err = JobManifest::load(&path).unwrap_err();
            assert!(matches!(err, ManifestError::Corrupt { .. }), "{statuses:?}");
            assert!(err.to_string().contains(message), "{err}");
        }
    }

    #[test]
    fn halted_run_with_pending_tail_loads() {
        use StageStatus::*;
        let cases = [
            [Completed, Failed, Pending],
            [Completed, Running, Pending],
            [Completed, Skipped, Completed],
        ];
        for statuses in cases {
            let dir = tempdir().unwrap();
            let path = dir.path().join("manifest.json");
            let mut manifest = manifest_in(dir.path());
            for (entry, status) in manifest.entries.iter_mut().zip(statuses) {
                entry.status = status;
            }
            manifest.save().unwrap();
            assert!(JobManifest::load(&path).is_ok(), "{statuses:?}");
        }
    }

    #[test]
    fn file_uses_documented_keys() {
        let dir = tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        let json: serde_json::Value = fsutil::read_json(manifest.path().unwrap()).unwrap();

        for key in ["job_id", "workflow", "stages", "overall_status", "created_at", "updated_at"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        let stage = &json["stages"][0];
        assert_eq!(stage["name"], "demux");
        assert_eq!(stage["status"], "pending");
        assert!(stage.get("attempts").is_some());
    }
}
