//! Run Record Storage

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::RunRecord;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored data did not parse.
    #[error("Corrupt run store: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where run records live. Records are keyed by date.
pub trait RunRecordStore: Send + Sync {
    /// Dates of all stored runs, newest first.
    fn stored_dates(&self) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Record for `date`, if any.
    fn load(&self, date: &DateTime<Utc>) -> Result<Option<RunRecord>, StoreError>;

    /// Insert or replace the record with the same date.
    fn save(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Delete the record for `date`. Returns false if there was none.
    fn remove(&self, date: &DateTime<Utc>) -> Result<bool, StoreError>;
}

type RecordMap = BTreeMap<DateTime<Utc>, RunRecord>;

fn newest_first(records: &RecordMap) -> Vec<DateTime<Utc>> {
    records.keys().rev().copied().collect()
}

/// Volatile store.
#[derive(Default)]
pub struct MemoryRunStore {
    records: Mutex<RecordMap>,
}

impl MemoryRunStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunRecordStore for MemoryRunStore {
    fn stored_dates(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(newest_first(&self.lock()))
    }

    fn load(&self, date: &DateTime<Utc>) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.lock().get(date).cloned())
    }

    fn save(&self, record: RunRecord) -> Result<(), StoreError> {
        self.lock().insert(record.date, record);
        Ok(())
    }

    fn remove(&self, date: &DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.lock().remove(date).is_some())
    }
}

/// Store backed by a single JSON file. Writes replace the file atomically.
pub struct JsonRunStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    guard: Mutex<()>,
}

impl JsonRunStore {
    /// Store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RecordMap, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<RunRecord> = serde_json::from_slice(&raw)?;
        Ok(records.into_iter().map(|r| (r.date, r)).collect())
    }

    fn write(&self, records: &RecordMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&RunRecord> = records.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&list)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} runs to {}", list.len(), self.path.display());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunRecordStore for JsonRunStore {
    fn stored_dates(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let _guard = self.lock();
        Ok(newest_first(&self.read()?))
    }

    fn load(&self, date: &DateTime<Utc>) -> Result<Option<RunRecord>, StoreError> {
        let _guard = self.lock();
        Ok(self.read()?.remove(date))
    }

    fn save(&self, record: RunRecord) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut records = self.read()?;
        records.insert(record.date, record);
        self.write(&records)
    }

    fn remove(&self, date: &DateTime<Utc>) -> Result<bool, StoreError> {
        let _guard = self.lock();
        let mut records = self.read()?;
        if records.remove(date).is_none() {
            return Ok(false);
        }
        self.write(&records)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::network::protocol::{GameChange, GameEvent};

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 4, day, 12, 0, 0).unwrap()
    }

    fn exercise(store: &dyn RunRecordStore) {
        assert!(store.stored_dates().unwrap().is_empty());

        let mut run = RunRecord::new(date(2), 150);
        run.push_frame(30, GameChange::new(GameEvent::PlayerJumped).with("height", 4));
        store.save(RunRecord::new(date(1), 100)).unwrap();
        store.save(run.clone()).unwrap();
        store.save(RunRecord::new(date(3), 90)).unwrap();

        assert_eq!(store.stored_dates().unwrap(), vec![date(3), date(2), date(1)]);
        assert_eq!(store.load(&date(2)).unwrap(), Some(run));
        assert_eq!(store.load(&date(9)).unwrap(), None);

        store.save(RunRecord::new(date(1), 101)).unwrap();
        assert_eq!(store.load(&date(1)).unwrap().unwrap().score, 101);

        assert!(store.remove(&date(3)).unwrap());
        assert!(!store.remove(&date(3)).unwrap());
        assert_eq!(store.stored_dates().unwrap(), vec![date(2), date(1)]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryRunStore::new());
    }

    #[test]
    fn test_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRunStore::new(dir.path().join("runs.json"));

        exercise(&store);

        // A fresh handle sees the same data.
        let reopened = JsonRunStore::new(store.path());
        assert_eq!(reopened.stored_dates().unwrap(), vec![date(2), date(1)]);
    }

    #[test]
    fn test_json_store_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.json");
        let store = JsonRunStore::new(&path);

        store.save(RunRecord::new(date(5), 70)).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        fs::write(&path, b"not json").unwrap();

        let store = JsonRunStore::new(&path);
        assert!(matches!(store.stored_dates(), Err(StoreError::Json(_))));
    }
}
