//! Isolated runtime descriptors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn default_interpreter() -> String {
    "python".to_string()
}

/// One isolated runtime (an interpreter plus its dependency set).
///
/// The runtime follows the virtualenv layout: executables live in
/// `bin/` on Unix and `Scripts\` on Windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    /// Environment name referenced by stages.
    pub name: String,
    /// Root directory of the runtime (e.g. a venv).
    pub runtime_path: PathBuf,
    /// Stages explicitly mapped to this environment.
    #[serde(default)]
    pub served_stages: Vec<String>,
    /// Dependency manifest the runtime was built from (e.g. requirements.txt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_manifest_ref: Option<PathBuf>,
    /// Binary that must exist in the runtime for it to be usable.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl EnvironmentDescriptor {
    /// Create a descriptor with the default interpreter.
    pub fn new(name: impl Into<String>, runtime_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            runtime_path: runtime_path.into(),
            served_stages: Vec::new(),
            dependency_manifest_ref: None,
            interpreter: default_interpreter(),
        }
    }

    /// Add stages served by this environment.
    pub fn serving(mut self, stages: &[&str]) -> Self {
        self.served_stages
            .extend(stages.iter().map(|s| s.to_string()));
        self
    }

    /// Set the interpreter binary name.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Set the dependency manifest.
    pub fn with_dependency_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependency_manifest_ref = Some(path.into());
        self
    }

    /// Directory holding the runtime's executables.
    pub fn bin_dir(&self) -> PathBuf {
        #[cfg(windows)]
        {
            self.runtime_path.join("Scripts")
        }
        #[cfg(not(windows))]
        {
            self.runtime_path.join("bin")
        }
    }

    /// Full path of the interpreter binary.
    pub fn interpreter_path(&self) -> PathBuf {
        #[cfg(windows)]
        {
            self.bin_dir().join(format!("{}.exe", self.interpreter))
        }
        #[cfg(not(windows))]
        {
            self.bin_dir().join(&self.interpreter)
        }
    }

    /// Whether the interpreter exists and can be executed.
    pub fn is_usable(&self) -> bool {
        is_executable(&self.interpreter_path())
    }

    /// SHA-256 of the dependency manifest, if one is declared and readable.
    pub fn fingerprint(&self) -> io::Result<Option<String>> {
        let Some(ref manifest) = self.dependency_manifest_ref else {
            return Ok(None);
        };
        let path = if manifest.is_relative() {
            self.runtime_path.join(manifest)
        } else {
            manifest.clone()
        };
        let content = fs::read(&path)?;
        let digest = Sha256::digest(&content);
        Ok(Some(format!("{:x}", digest)))
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
