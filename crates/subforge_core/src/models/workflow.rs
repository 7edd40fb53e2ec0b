//! Workflow and stage descriptors.
//!
//! A workflow is a named, strictly linear list of stages. Each stage is an
//! opaque external command run inside one isolated environment.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Declaration of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Stage name, unique within a workflow.
    pub name: String,
    /// Position in the workflow; stages run in ascending order.
    pub order_index: u32,
    /// Environment this stage must run in. When absent the registry resolves it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_environment: Option<String>,
    /// Command argv with `{placeholder}` variables.
    pub command_template: Vec<String>,
    /// Files (relative to the stage directory) the stage must produce.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Whether a job may be created with this stage skipped.
    #[serde(default)]
    pub optional: bool,
}

impl StageDescriptor {
    /// Create a stage with a fixed environment.
    pub fn new(
        name: impl Into<String>,
        order_index: u32,
        environment: impl Into<String>,
        command_template: &[&str],
        expected_outputs: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            order_index,
            required_environment: Some(environment.into()),
            command_template: command_template.iter().map(|s| s.to_string()).collect(),
            expected_outputs: expected_outputs.iter().map(|s| s.to_string()).collect(),
            optional: false,
        }
    }

    /// Mark the stage as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Leave the environment to registry resolution.
    pub fn without_environment(mut self) -> Self {
        self.required_environment = None;
        self
    }
}

/// A named, ordered sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (e.g. "transcribe").
    pub name: String,
    /// Short description for listings.
    #[serde(default)]
    pub description: String,
    /// Whether jobs of this workflow need at least one target language.
    #[serde(default)]
    pub requires_target_lang: bool,
    /// Stages of the workflow.
    pub stages: Vec<StageDescriptor>,
}

impl WorkflowDefinition {
    /// Create a workflow from its stages.
    pub fn new(name: impl Into<String>, stages: Vec<StageDescriptor>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            requires_target_lang: false,
            stages,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Require a target language.
    pub fn with_target_lang(mut self) -> Self {
        self.requires_target_lang = true;
        self
    }

    /// Stages sorted by `order_index`.
    pub fn ordered_stages(&self) -> Vec<&StageDescriptor> {
        let mut stages: Vec<&StageDescriptor> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.order_index);
        stages
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Check structural consistency.
    ///
    /// Returns a description of the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err(format!("workflow '{}' has no stages", self.name));
        }

        let mut names = HashSet::new();
        let mut orders = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(format!("workflow '{}' has a stage without a name", self.name));
            }
            if !is_valid_stage_name(&stage.name) {
                return Err(format!(
                    "workflow '{}' has invalid stage name '{}' (letters, digits, '_' and '.' only, not starting with '.')",
                    self.name, stage.name
                ));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(format!(
                    "workflow '{}' declares stage '{}' twice",
                    self.name, stage.name
                ));
            }
            if !orders.insert(stage.order_index) {
                return Err(format!(
                    "workflow '{}' reuses order_index {} (stage '{}')",
                    self.name, stage.order_index, stage.name
                ));
            }
            if stage.command_template.is_empty() {
                return Err(format!(
                    "stage '{}' of workflow '{}' has an empty command",
                    stage.name, self.name
                ));
            }
        }
        Ok(())
    }
}

/// Stage names become directory names under the job's `stages/` folder.
pub fn is_valid_stage_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Known workflows keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in transcribe / translate / subtitle workflows.
    pub fn builtin() -> Self {
        let demux = StageDescriptor::new(
            "demux",
            0,
            "media",
            &[
                "python", "-m", "subforge_stages.demux",
                "--input", "{input}",
                "--output", "{stage_dir}/audio.wav",
                "--config", "{config}",
            ],
            &["audio.wav"],
        );
        let asr = StageDescriptor::new(
            "asr",
            1,
            "asr",
            &[
                "python", "-m", "subforge_stages.asr",
                "--audio", "{job_dir}/stages/demux/audio.wav",
                "--language", "{source_lang}",
                "--model", "{model_size}",
                "--compute-type", "{precision}",
                "--batch-size", "{batch_size}",
                "--backend", "{backend}",
                "--output", "{stage_dir}/transcript.json",
            ],
            &["transcript.json"],
        );
        let align = StageDescriptor::new(
            "align",
            2,
            "asr",
            &[
                "python", "-m", "subforge_stages.align",
                "--audio", "{job_dir}/stages/demux/audio.wav",
                "--transcript", "{job_dir}/stages/asr/transcript.json",
                "--output", "{stage_dir}/aligned.json",
            ],
            &["aligned.json"],
        );
        let translate = StageDescriptor::new(
            "translate",
            3,
            "translation",
            &[
                "python", "-m", "subforge_stages.translate",
                "--segments", "{job_dir}/stages/align/aligned.json",
                "--source-lang", "{source_lang}",
                "--target-langs", "{target_langs}",
                "--output", "{stage_dir}/translated.json",
            ],
            &["translated.json"],
        );
        let subtitle_gen = StageDescriptor::new(
            "subtitle_gen",
            4,
            "media",
            &[
                "python", "-m", "subforge_stages.subtitles",
                "--segments", "{job_dir}/stages/translate/translated.json",
                "--output-dir", "{stage_dir}",
            ],
            &["subtitles.srt"],
        );
        let mux = StageDescriptor::new(
            "mux",
            5,
            "media",
            &[
                "python", "-m", "subforge_stages.mux",
                "--input", "{input}",
                "--subtitles", "{job_dir}/stages/subtitle_gen",
                "--output", "{stage_dir}/output.mkv",
            ],
            &["output.mkv"],
        )
        .optional();

        let mut catalog = Self::new();
        catalog.insert(
            WorkflowDefinition::new("transcribe", vec![demux.clone(), asr.clone(), align.clone()])
                .with_description("Speech to time-aligned transcript"),
        );
        catalog.insert(
            WorkflowDefinition::new(
                "translate",
                vec![demux.clone(), asr.clone(), align.clone(), translate.clone()],
            )
            .with_description("Transcript translated into the target languages")
            .with_target_lang(),
        );
        catalog.insert(
            WorkflowDefinition::new(
                "subtitle",
                vec![demux, asr, align, translate, subtitle_gen, mux],
            )
            .with_description("Translated subtitles, optionally muxed into the video")
            .with_target_lang(),
        );
        catalog
    }

    /// Add or replace a workflow.
    pub fn insert(&mut self, workflow: WorkflowDefinition) {
        self.workflows.insert(workflow.name.clone(), workflow);
    }

    /// Builder form of `insert`.
    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.insert(workflow);
        self
    }

    /// Look up a workflow by name.
    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    /// Names of all known workflows, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(|k| k.as_str()).collect()
    }

    /// Iterate over all workflows in name order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        let catalog = WorkflowCatalog::builtin();
        assert_eq!(catalog.names(), vec!["subtitle", "transcribe", "translate"]);
        for workflow in catalog.iter() {
            workflow.check().unwrap();
        }
    }

    #[test]
    fn ordered_stages_sorts_by_index() {
        let workflow = WorkflowDefinition::new(
            "w",
            vec![
                StageDescriptor::new("second", 2, "A", &["true"], &[]),
                StageDescriptor::new("first", 1, "A", &["true"], &[]),
            ],
        );
        let names: Vec<&str> = workflow.ordered_stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn check_rejects_duplicates() {
        let workflow = WorkflowDefinition::new(
            "w",
            vec![
                StageDescriptor::new("asr", 0, "A", &["true"], &[]),
                StageDescriptor::new("asr", 1, "A", &["true"], &[]),
            ],
        );
        assert!(workflow.check().unwrap_err().contains("twice"));
    }

    #[test]
    fn check_rejects_path_like_stage_names() {
        for bad in ["../x", "a/b", "..", ".hidden", "two words", "a\\b"] {
            let workflow = WorkflowDefinition::new(
                "w",
                vec![StageDescriptor::new(bad, 0, "A", &["true"], &[])],
            );
            let err = workflow.check().unwrap_err();
            assert!(err.contains("invalid stage name"), "{bad}: {err}");
        }
        assert!(is_valid_stage_name("subtitle_gen"));
        assert!(is_valid_stage_name("asr.v2"));
    }

    #[test]
    fn override_replaces_builtin() {
        let custom = WorkflowDefinition::new(
            "transcribe",
            vec![StageDescriptor::new("asr", 0, "asr", &["asr-cli"], &[])],
        );
        let catalog = WorkflowCatalog::builtin().with_workflow(custom);
        assert_eq!(catalog.get("transcribe").unwrap().stages.len(), 1);
    }
}
