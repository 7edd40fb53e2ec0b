//! What a user asks for when creating a job.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

/// Source language used when none is given.
pub const AUTO_LANG: &str = "auto";

/// Parameters for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub workflow: String,
    pub user: String,
    pub source_lang: String,
    pub target_langs: Vec<String>,
    /// User parameters; these win over hardware recommendations.
    pub params: BTreeMap<String, Value>,
    /// Optional stages to leave out of this job.
    pub skip_stages: Vec<String>,
}

impl JobRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        workflow: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            workflow: workflow.into(),
            user: user.into(),
            source_lang: AUTO_LANG.to_string(),
            target_langs: Vec::new(),
            params: BTreeMap::new(),
            skip_stages: Vec::new(),
        }
    }

    pub fn source_lang(mut self, lang: impl Into<String>) -> Self {
        self.source_lang = lang.into();
        self
    }

    /// Add a target language.
    pub fn target_lang(mut self, lang: impl Into<String>) -> Self {
        self.target_langs.push(lang.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn skip(mut self, stage: impl Into<String>) -> Self {
        self.skip_stages.push(stage.into());
        self
    }
}

/// Parse a `key=value` parameter.
///
/// The value is read as JSON when it parses (numbers, booleans, arrays),
/// otherwise it is kept as a plain string.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

/// `auto`, or a 2-3 letter language code with an optional region/script
/// subtag (`en`, `pt-BR`, `zh-Hant`).
pub fn is_valid_language(lang: &str) -> bool {
    if lang == AUTO_LANG {
        return true;
    }
    let mut parts = lang.split('-');
    let primary = parts.next().unwrap_or_default();
    if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_lowercase()) {
        return false;
    }
    match (parts.next(), parts.next()) {
        (None, _) => true,
        (Some(region), None) => {
            (2..=4).contains(&region.len()) && region.chars().all(|c| c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// User names end up in job ids and directory names.
pub fn is_valid_user(user: &str) -> bool {
    !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_params() {
        assert_eq!(parse_param("batch_size=8").unwrap(), ("batch_size".to_string(), Value::from(8)));
        assert_eq!(parse_param("diarize=true").unwrap().1, Value::from(true));
        assert_eq!(parse_param("model_size=medium").unwrap().1, Value::from("medium"));
        assert_eq!(parse_param("prompt=a=b").unwrap().1, Value::from("a=b"));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn language_codes() {
        for ok in ["auto", "en", "fra", "pt-BR", "zh-Hant"] {
            assert!(is_valid_language(ok), "{ok}");
        }
        for bad in ["", "e", "english", "EN", "pt-", "pt-BR-x", "en_US"] {
            assert!(!is_valid_language(bad), "{bad}");
        }
    }

    #[test]
    fn user_names() {
        assert!(is_valid_user("alice"));
        assert!(is_valid_user("ci_bot.2"));
        assert!(!is_valid_user(""));
        assert!(!is_valid_user("../etc"));
        assert!(!is_valid_user("a-b"));
    }

    #[test]
    fn builder_collects_fields() {
        let request = JobRequest::new("/media/in.mkv", "translate", "alice")
            .source_lang("en")
            .target_lang("fr")
            .target_lang("de")
            .param("model_size", "medium")
            .skip("mux");
        assert_eq!(request.target_langs, vec!["fr", "de"]);
        assert_eq!(request.params["model_size"], Value::from("medium"));
        assert_eq!(request.skip_stages, vec!["mux"]);
    }
}
