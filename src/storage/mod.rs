//! Run record storage
//!
//! Finished runs are written once and read many times. The on-disk
//! backend keeps one line-oriented `run_<id>.csv` file per run (see
//! [`run_file`] for the format); the in-memory backend backs tests and
//! throwaway sessions.

pub mod local_file;
pub mod memory;
pub mod run_file;

pub use local_file::LocalRunStore;
pub use memory::InMemoryRunStore;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::types::RunRecord;

/// `generate_id` format: sortable, one-second resolution.
pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Display format of a run's start time.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid run id: {0:?}")]
    InvalidId(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

/// Persistent store for finished runs, keyed by run id.
pub trait RunStore: Send + Sync {
    /// Persist a full record. An existing record with the same id is replaced.
    fn save(&self, record: &RunRecord) -> Result<(), StorageError>;

    /// Header-only records for every stored run, newest start time first.
    ///
    /// Ordering compares the start-time strings, it does not parse them.
    fn list(&self) -> Result<Vec<RunRecord>, StorageError>;

    /// The full record, or `None` when absent or unreadable.
    fn get_by_id(&self, id: &str) -> Result<Option<RunRecord>, StorageError>;

    /// Remove a record. Missing ids are not an error.
    fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// A fresh id from the current local time.
    ///
    /// Two sessions started within the same second get the same id and the
    /// later save replaces the earlier one.
    fn generate_id(&self) -> String {
        run_id_at(&Local::now())
    }
}

pub fn run_id_at(at: &DateTime<Local>) -> String {
    at.format(RUN_ID_FORMAT).to_string()
}

pub fn start_time_at(at: &DateTime<Local>) -> String {
    at.format(START_TIME_FORMAT).to_string()
}

/// Sort header records the way `RunStore::list` promises.
pub(crate) fn sort_newest_first(records: &mut [RunRecord]) {
    records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}
