//! Run Records
//!
//! Finished single-player runs, kept so a later run can race a ghost of
//! them, and the list model behind the "previous runs" screen.

pub mod list;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::protocol::GameChange;

pub use list::{format_run_date, RunList, RunListError, RunRow, RUN_DATE_FORMAT};
pub use store::{JsonRunStore, MemoryRunStore, RunRecordStore, StoreError};

/// One recorded action of a ghost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostFrame {
    /// Game tick the action happened on.
    pub tick: u32,
    /// The action.
    pub change: GameChange,
}

/// A finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// When the run ended. Also the record's key.
    pub date: DateTime<Utc>,
    /// Final score.
    pub score: u32,
    /// Actions to replay as a ghost.
    #[serde(default)]
    pub ghost: Vec<GhostFrame>,
}

impl RunRecord {
    /// Record without ghost data.
    pub fn new(date: DateTime<Utc>, score: u32) -> Self {
        Self {
            date,
            score,
            ghost: Vec::new(),
        }
    }

    /// Append a ghost action.
    pub fn push_frame(&mut self, tick: u32, change: GameChange) {
        self.ghost.push(GhostFrame { tick, change });
    }
}
