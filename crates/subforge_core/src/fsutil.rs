//! Atomic file persistence helpers.
//!
//! Every orchestrator-owned file (hardware profile, job config, manifest,
//! job counters) is written to a temp file in the destination directory and
//! then renamed into place, so readers see either the old or the new content.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

/// Write `content` to `path` atomically, replacing any existing file.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp = write_temp_sibling(path, content)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `content` to `path` atomically, failing if `path` already exists.
pub fn atomic_write_new(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp = write_temp_sibling(path, content)?;
    temp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    atomic_write(path, &json)
}

/// Serialize `value` as pretty JSON into a file that must not exist yet.
pub fn write_json_new<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    atomic_write_new(path, &json)
}

/// Read and deserialize a JSON file.
///
/// Parse failures are reported with `ErrorKind::InvalidData` so callers can
/// tell corruption apart from a missing file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_temp_sibling(path: &Path, content: &[u8]) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}
