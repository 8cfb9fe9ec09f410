use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{sort_newest_first, RunStore, StorageError};
use crate::types::RunRecord;

/// A run store that lives only as long as the process.
///
/// Saves can be made to fail on demand, which is how the session
/// controller's lost-finish handling is exercised.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, RunRecord>>,
    reject_writes: AtomicBool,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Make every following `save` fail (or succeed again).
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, record: &RunRecord) -> Result<(), StorageError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(format!("run {}", record.id)));
        }
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<RunRecord>, StorageError> {
        let mut records: Vec<RunRecord> = self
            .runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(RunRecord::summary)
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<RunRecord>, StorageError> {
        Ok(self
            .runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }
}
