//! Variable substitution for stage command templates.
//!
//! Templates use `{name}` placeholders where `name` is made of ASCII
//! letters, digits and underscores. Anything else in braces is left as-is,
//! so literal JSON in an argument survives rendering.
//!
//! Rendering is strict: a placeholder with no value is an error rather than
//! being passed through to the stage command.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Placeholders the orchestrator always provides.
pub const BUILTIN_PLACEHOLDERS: &[&str] = &[
    "job_id",
    "job_dir",
    "stage",
    "stage_dir",
    "config",
    "manifest",
    "input",
    "output_root",
    "source_lang",
    "target_lang",
    "target_langs",
    "workflow",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown placeholder '{{{name}}}' in \"{template}\"")]
    UnknownPlaceholder { name: String, template: String },
}

/// Variable substitution context for command templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable (builder form).
    pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a variable.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    /// Add every entry of a settings map, rendering JSON values as arguments.
    pub fn with_settings(mut self, settings: &BTreeMap<String, Value>) -> Self {
        for (key, value) in settings {
            self.set(key, value_to_arg(value));
        }
        self
    }

    /// Get a variable value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Substitute every placeholder in `template`.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match placeholder_at(after) {
                Some(name) => {
                    let value = self.get(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        template: template.to_string(),
                    })?;
                    out.push_str(value);
                    rest = &after[name.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Render a whole argv.
    pub fn render_all(&self, templates: &[String]) -> Result<Vec<String>, TemplateError> {
        templates.iter().map(|t| self.render(t)).collect()
    }
}

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match placeholder_at(after) {
            Some(name) => {
                names.push(name);
                rest = &after[name.len() + 1..];
            }
            None => rest = after,
        }
    }
    names
}

/// Render a settings value as a command-line argument.
pub fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// If `s` starts with `name}`, return `name`.
fn placeholder_at(s: &str) -> Option<&str> {
    let close = s.find('}')?;
    let name = &s[..close];
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_vars() {
        let ctx = TemplateContext::new()
            .with_var("stage_dir", "/jobs/j1/stages/asr")
            .with_var("model_size", "large-v3");

        assert_eq!(
            ctx.render("{stage_dir}/transcript.json").unwrap(),
            "/jobs/j1/stages/asr/transcript.json"
        );
        assert_eq!(ctx.render("--model={model_size}").unwrap(), "--model=large-v3");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let ctx = TemplateContext::new();
        let err = ctx.render("{nope}").unwrap_err();
        assert!(err.to_string().contains("{nope}"));
    }

    #[test]
    fn non_placeholder_braces_pass_through() {
        let ctx = TemplateContext::new().with_var("x", "1");
        assert_eq!(ctx.render(r#"{"a": {x}}"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(ctx.render("{}").unwrap(), "{}");
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(
            placeholders("{job_dir}/stages/{stage}/{ bad }.json"),
            vec!["job_dir", "stage"]
        );
    }

    #[test]
    fn settings_values_render_without_quotes() {
        let mut settings = BTreeMap::new();
        settings.insert("batch_size".to_string(), Value::from(16));
        settings.insert("backend".to_string(), Value::from("mlx"));
        let ctx = TemplateContext::new().with_settings(&settings);

        assert_eq!(ctx.render("{backend}:{batch_size}").unwrap(), "mlx:16");
    }
}
