//! Per-user, per-day job counter shared by concurrent processes.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use fs2::FileExt;
use thiserror::Error;

use crate::fsutil;

/// Counter file inside the state directory.
pub const COUNTER_FILE: &str = "job_counters.json";
const LOCK_FILE: &str = "job_counters.lock";

/// Errors from job id allocation.
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Job counter I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Job counter file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CounterError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            CounterError::Io { .. } => "check that [paths] state_dir is writable",
            CounterError::Corrupt { .. } => {
                "fix or delete job_counters.json; existing job directories are never reused"
            }
        }
    }
}

/// Result type for counter operations.
pub type CounterResult<T> = Result<T, CounterError>;

/// Monotonic job counters keyed by day and user.
///
/// Increments are serialized across processes with an exclusive lock on a
/// sidecar lock file; the counter file itself is replaced by atomic rename.
#[derive(Debug, Clone)]
pub struct JobCounter {
    state_dir: PathBuf,
}

impl JobCounter {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn counter_path(&self) -> PathBuf {
        self.state_dir.join(COUNTER_FILE)
    }

    /// Allocate the next counter value for `user` on `date` (starting at 1).
    pub fn next(&self, user: &str, date: NaiveDate) -> CounterResult<u32> {
        fs::create_dir_all(&self.state_dir).map_err(|e| CounterError::io(&self.state_dir, e))?;

        let lock_path = self.state_dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CounterError::io(&lock_path, e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| CounterError::io(&lock_path, e))?;

        // The lock is released when `lock_file` is dropped
        let path = self.counter_path();
        let mut counters = self.read_counters(&path)?;
        let key = format!("{}:{}", date.format("%Y%m%d"), user);
        let value = counters
            .get(&key)
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| CounterError::Corrupt {
                path: path.clone(),
                reason: format!("counter for {} is exhausted", key),
            })?;
        counters.insert(key, value);
        fsutil::write_json_atomic(&path, &counters).map_err(|e| CounterError::io(&path, e))?;

        tracing::debug!("Allocated job counter {} for {} on {}", value, user, date);
        Ok(value)
    }

    fn read_counters(&self, path: &Path) -> CounterResult<BTreeMap<String, u32>> {
        match fsutil::read_json(path) {
            Ok(counters) => Ok(counters),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(CounterError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
            Err(e) => Err(CounterError::io(path, e)),
        }
    }
}

/// Format a job id: `job-{YYYYMMDD}-{user}-{counter:04}`.
pub fn format_job_id(date: NaiveDate, user: &str, counter: u32) -> String {
    format!("job-{}-{}-{:04}", date.format("%Y%m%d"), user, counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn job_id_format() {
        assert_eq!(format_job_id(day(), "alice", 1), "job-20250101-alice-0001");
        assert_eq!(format_job_id(day(), "bob", 12345), "job-20250101-bob-12345");
    }

    #[test]
    fn counters_are_per_user_and_day() {
        let dir = tempdir().unwrap();
        let counter = JobCounter::new(dir.path());
        let next_day = day().succ_opt().unwrap();

        assert_eq!(counter.next("alice", day()).unwrap(), 1);
        assert_eq!(counter.next("alice", day()).unwrap(), 2);
        assert_eq!(counter.next("bob", day()).unwrap(), 1);
        assert_eq!(counter.next("alice", next_day).unwrap(), 1);

        // A second handle sees the persisted state
        assert_eq!(JobCounter::new(dir.path()).next("alice", day()).unwrap(), 3);
    }

    #[test]
    fn concurrent_increments_never_collide() {
        let dir = tempdir().unwrap();
        let mut values: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let counter = JobCounter::new(dir.path());
                    s.spawn(move || counter.next("alice", day()).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        values.sort_unstable();
        assert_eq!(values, (1..=8).collect::<Vec<u32>>());
    }

    #[test]
    fn corrupt_counter_file_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "not json").unwrap();

        let err = JobCounter::new(dir.path()).next("alice", day()).unwrap_err();
        assert!(matches!(err, CounterError::Corrupt { .. }));
    }

    #[test]
    fn exhausted_counter_is_reported_not_wrapped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(COUNTER_FILE);
        fs::write(&path, r#"{"20250101:alice": 4294967295}"#).unwrap();

        let err = JobCounter::new(dir.path()).next("alice", day()).unwrap_err();
        assert!(matches!(err, CounterError::Corrupt { .. }));
        // The file is left untouched
        assert!(fs::read_to_string(&path).unwrap().contains("4294967295"));
    }
}
