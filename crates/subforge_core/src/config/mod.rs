//! `subforge.toml` handling.
//!
//! The file is split into sections (`[paths]`, `[hardware]`, `[registry]`,
//! `[logging]`, `[[environments]]`, `[[workflows]]`). [`ConfigManager`]
//! rewrites one section at a time so hand-written comments in the others
//! survive, and every write goes through an atomic rename.
//!
//! Paths are stored as written. Call [`ConfigManager::resolved`] to get them
//! anchored at the directory holding the config file.
//!
//! ```no_run
//! use subforge_core::config::{ConfigManager, ConfigSection};
//! use subforge_core::environments::EnvironmentDescriptor;
//!
//! let mut config = ConfigManager::new("subforge.toml");
//! config.load_or_create().unwrap();
//! config
//!     .upsert_environment(EnvironmentDescriptor::new("whisper", "envs/whisper").serving(&["asr"]))
//!     .unwrap();
//!
//! config.settings_mut().hardware.profile_ttl_hours = 6;
//! config.update_section(ConfigSection::Hardware).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ConfigSection, HardwareSettings, LoggingSettings, PathSettings, RegistrySettings, Settings,
};
