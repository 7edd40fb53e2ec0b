//! Reading and rewriting `subforge.toml`.
//!
//! Writes are atomic (temp file in the same directory, then rename).
//! Section updates go through `toml_edit`, so comments and ordering outside
//! the rewritten section are kept. Unknown sections are warned about and
//! otherwise left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, Settings};
use crate::environments::{EnvironmentDescriptor, EnvironmentRegistry, RegistryError};
use crate::fsutil;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access config file: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] toml::de::Error),

    #[error("Cannot encode settings as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Config is not valid TOML: {0}")]
    Syntax(#[from] toml_edit::TomlError),

    #[error("No config file at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid environment configuration: {0}")]
    Registry(#[from] RegistryError),
}

impl ConfigError {
    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "check permissions on the config file and its directory",
            ConfigError::Invalid(_) => "a key has the wrong type or a required key is missing",
            ConfigError::Syntax(_) => "fix the TOML syntax in the config file",
            ConfigError::Encode(_) => "a setting cannot be represented in TOML; report this as a bug",
            ConfigError::NotFound(_) => "pass --config <path> or create subforge.toml",
            ConfigError::Registry(e) => e.hint(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Owner of one config file and its in-memory settings.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

impl ConfigManager {
    /// Point at `config_path` with default settings; nothing is read yet.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Directory relative paths in the config are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Settings with paths exactly as written in the file.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// In-memory edits; persist them with `save()` or `update_section()`.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Settings with every relative path resolved against `base_dir()`.
    pub fn resolved(&self) -> Settings {
        self.settings.resolved_against(&self.base_dir())
    }

    /// Build the environment registry from the resolved settings.
    pub fn registry(&self) -> ConfigResult<EnvironmentRegistry> {
        Ok(EnvironmentRegistry::from_settings(&self.resolved())?)
    }

    /// Read and validate the file. A missing file is `NotFound`.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let text = fs::read_to_string(&self.config_path)?;
        self.settings = self.parse_settings(&text)?;
        tracing::debug!("Loaded config from {}", self.config_path.display());
        Ok(())
    }

    /// Like `load`, but a missing file is created from the defaults first.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            self.load()
        } else {
            self.settings = Settings::default();
            self.save()?;
            tracing::info!("Created default config at {}", self.config_path.display());
            Ok(())
        }
    }

    /// Parse and validate config content.
    ///
    /// Unknown top-level sections are logged and ignored. Environment
    /// mappings must be conflict free.
    fn parse_settings(&self, content: &str) -> ConfigResult<Settings> {
        let doc: DocumentMut = content.parse()?;
        for (key, _) in doc.iter() {
            if ConfigSection::from_table_name(key).is_none() {
                tracing::warn!(
                    "Unknown config section '{}' in {} (ignored)",
                    key,
                    self.config_path.display()
                );
            }
        }

        let settings: Settings = toml::from_str(content)?;
        EnvironmentRegistry::from_settings(&settings)?;
        Ok(settings)
    }

    /// Add or replace an environment and persist the environments section.
    ///
    /// The new mapping is checked against the other environments first.
    pub fn upsert_environment(&mut self, descriptor: EnvironmentDescriptor) -> ConfigResult<()> {
        let mut candidate = self.settings.clone();
        candidate.environments.retain(|e| e.name != descriptor.name);
        candidate.environments.push(descriptor);
        candidate.environments.sort_by(|a, b| a.name.cmp(&b.name));
        EnvironmentRegistry::from_settings(&candidate)?;

        self.settings = candidate;
        self.update_section(ConfigSection::Environments)
    }

    /// Rewrite the whole file from the in-memory settings.
    pub fn save(&self) -> ConfigResult<()> {
        let content = self.render_document()?;
        fsutil::atomic_write(&self.config_path, content.as_bytes())?;
        Ok(())
    }

    /// Replace one section of the file on disk with its in-memory value.
    ///
    /// The file is re-read first, so edits made to other sections since the
    /// last load are kept.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let on_disk = match fs::read_to_string(&self.config_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut doc: DocumentMut = on_disk.parse()?;
        let fresh = self.settings_document()?;

        let table_name = section.table_name();
        match fresh.get(table_name) {
            Some(item) => {
                let mut item = item.clone();
                // Keep whatever comment sat above the section on disk
                if let (Some(old), Some(new)) = (doc.get(table_name), item.as_table_mut()) {
                    if let Some(old_table) = old.as_table() {
                        *new.decor_mut() = old_table.decor().clone();
                    }
                }
                doc[table_name] = item;
            }
            None => {
                doc.remove(table_name);
            }
        }

        fsutil::atomic_write(&self.config_path, doc.to_string().as_bytes())?;
        tracing::debug!("Updated [{}] in {}", table_name, self.config_path.display());
        Ok(())
    }

    fn settings_document(&self) -> ConfigResult<DocumentMut> {
        let serialized = toml::to_string_pretty(&self.settings)?;
        Ok(serialized.parse()?)
    }

    /// Whole-file rendering: every section preceded by its description.
    fn render_document(&self) -> ConfigResult<String> {
        let mut doc = self.settings_document()?;

        for section in ConfigSection::ALL {
            let prefix = format!("\n# {}\n", section.description());
            match doc.get_mut(section.table_name()) {
                Some(Item::Table(table)) => table.decor_mut().set_prefix(prefix),
                Some(Item::ArrayOfTables(array)) => {
                    if let Some(first) = array.get_mut(0) {
                        first.decor_mut().set_prefix(prefix);
                    }
                }
                _ => {}
            }
        }

        let mut output = String::from("# subforge configuration\n");
        output.push_str(&doc.to_string());
        Ok(output)
    }
}
