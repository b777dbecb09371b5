//! Previous Runs List
//!
//! Row model for the single-player start screen: one row per stored run,
//! newest first, with select (race the ghost) and delete.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::store::{RunRecordStore, StoreError};
use crate::setup::GameSetupData;

/// Row date format, e.g. `04 May 09:30 AM`.
pub const RUN_DATE_FORMAT: &str = "%d %B %I:%M %p";

/// Format a run date for display.
pub fn format_run_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    date.format(RUN_DATE_FORMAT).to_string()
}

/// Run list errors.
#[derive(Debug, Error)]
pub enum RunListError {
    /// Row index past the end of the list.
    #[error("Row {index} out of range ({len} rows)")]
    RowOutOfRange {
        /// Requested row.
        index: usize,
        /// Rows in the list.
        len: usize,
    },

    /// The row's record is no longer in the store.
    #[error("No run stored for {0}")]
    MissingRecord(DateTime<Utc>),

    /// Store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Display text for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    /// Formatted run date.
    pub date_label: String,
    /// `Score: N`.
    pub score_label: String,
}

/// Snapshot of stored runs bound to a store.
pub struct RunList {
    store: Arc<dyn RunRecordStore>,
    dates: Vec<DateTime<Utc>>,
    offset: FixedOffset,
}

impl RunList {
    /// List over `store`, shown in the local time zone.
    pub fn load(store: Arc<dyn RunRecordStore>) -> Result<Self, RunListError> {
        Self::with_offset(store, Local::now().offset().fix())
    }

    /// List over `store`, shown at a fixed UTC offset.
    pub fn with_offset(
        store: Arc<dyn RunRecordStore>,
        offset: FixedOffset,
    ) -> Result<Self, RunListError> {
        let dates = store.stored_dates()?;
        Ok(Self { store, dates, offset })
    }

    /// Re-read dates from the store.
    pub fn refresh(&mut self) -> Result<(), RunListError> {
        self.dates = self.store.stored_dates()?;
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Row dates, newest first.
    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    fn date_at(&self, index: usize) -> Result<DateTime<Utc>, RunListError> {
        self.dates
            .get(index)
            .copied()
            .ok_or(RunListError::RowOutOfRange {
                index,
                len: self.dates.len(),
            })
    }

    /// Labels for row `index`. `None` if the record has vanished from the
    /// store since the snapshot.
    pub fn row(&self, index: usize) -> Result<Option<RunRow>, RunListError> {
        let date = self.date_at(index)?;
        let Some(record) = self.store.load(&date)? else {
            return Ok(None);
        };
        Ok(Some(RunRow {
            date_label: format_run_date(&record.date.with_timezone(&self.offset)),
            score_label: format!("Score: {}", record.score),
        }))
    }

    /// Setup for racing the ghost of row `index`.
    pub fn select(&self, index: usize) -> Result<GameSetupData, RunListError> {
        let date = self.date_at(index)?;
        let record = self
            .store
            .load(&date)?
            .ok_or(RunListError::MissingRecord(date))?;
        info!("Selected run from {} (score {})", date, record.score);
        Ok(GameSetupData::ghost_run(record))
    }

    /// Delete row `index` from the store, then from the list. On a store
    /// error the row stays.
    pub fn delete(&mut self, index: usize) -> Result<(), RunListError> {
        let date = self.date_at(index)?;
        if !self.store.remove(&date)? {
            warn!("Run from {} was already gone", date);
        }
        self.dates.remove(index);
        info!("Deleted run from {}", date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::records::{MemoryRunStore, RunRecord};
    use crate::setup::GameMode;

    fn date(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, day, hour, 30, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn seeded() -> (Arc<MemoryRunStore>, RunList) {
        let store = Arc::new(MemoryRunStore::new());
        store.save(RunRecord::new(date(4, 9), 420)).unwrap();
        store.save(RunRecord::new(date(5, 21), 610)).unwrap();
        let list = RunList::with_offset(store.clone(), utc()).unwrap();
        (store, list)
    }

    #[test]
    fn test_format_run_date() {
        assert_eq!(format_run_date(&date(4, 9)), "04 May 09:30 AM");
        assert_eq!(format_run_date(&date(5, 21)), "05 May 09:30 PM");

        let plus_eight = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(
            format_run_date(&date(5, 21).with_timezone(&plus_eight)),
            "06 May 05:30 AM"
        );
    }

    #[test]
    fn test_rows_newest_first() {
        let (_store, list) = seeded();
        assert_eq!(list.len(), 2);

        let first = list.row(0).unwrap().unwrap();
        assert_eq!(first.date_label, "05 May 09:30 PM");
        assert_eq!(first.score_label, "Score: 610");

        let second = list.row(1).unwrap().unwrap();
        assert_eq!(second.score_label, "Score: 420");

        assert!(matches!(
            list.row(2),
            Err(RunListError::RowOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_row_for_vanished_record() {
        let (store, list) = seeded();
        store.remove(&date(5, 21)).unwrap();
        assert_eq!(list.row(0).unwrap(), None);
    }

    #[test]
    fn test_select_starts_ghost_run() {
        let (_store, list) = seeded();
        let setup = list.select(1).unwrap();
        assert_eq!(setup.mode, GameMode::SinglePlayer);
        assert_eq!(setup.ghost.unwrap().score, 420);
    }

    #[test]
    fn test_select_missing_record() {
        let (store, list) = seeded();
        store.remove(&date(4, 9)).unwrap();
        assert!(matches!(list.select(1), Err(RunListError::MissingRecord(_))));
    }

    #[test]
    fn test_delete() {
        let (store, mut list) = seeded();
        list.delete(0).unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list.dates(), &[date(4, 9)]);
        assert_eq!(store.stored_dates().unwrap(), vec![date(4, 9)]);

        list.delete(0).unwrap();
        assert!(list.is_empty());
        assert!(matches!(list.delete(0), Err(RunListError::RowOutOfRange { .. })));
    }

    /// Store whose removals always fail.
    struct BrokenStore(Mutex<Vec<DateTime<Utc>>>);

    impl RunRecordStore for BrokenStore {
        fn stored_dates(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn load(&self, _date: &DateTime<Utc>) -> Result<Option<RunRecord>, StoreError> {
            Ok(None)
        }
        fn save(&self, record: RunRecord) -> Result<(), StoreError> {
            self.0.lock().unwrap().push(record.date);
            Ok(())
        }
        fn remove(&self, _date: &DateTime<Utc>) -> Result<bool, StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[test]
    fn test_failed_delete_keeps_row() {
        let store = Arc::new(BrokenStore(Mutex::new(vec![date(4, 9)])));
        let mut list = RunList::with_offset(store, utc()).unwrap();

        assert!(matches!(list.delete(0), Err(RunListError::Store(_))));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_refresh_picks_up_new_runs() {
        let (store, mut list) = seeded();
        store.save(RunRecord::new(date(6, 8), 50)).unwrap();
        assert_eq!(list.len(), 2);

        list.refresh().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.dates()[0], date(6, 8));
    }
}
