use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{run_file, sort_newest_first, RunStore, StorageError};
use crate::types::RunRecord;

const FILE_PREFIX: &str = "run_";
const FILE_SUFFIX: &str = ".csv";

/// A run store that keeps one `run_<id>.csv` file per run in a directory.
pub struct LocalRunStore {
    /// Directory holding the run files. Created on first save.
    base_dir: PathBuf,
}

impl LocalRunStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn get_file_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        if id.is_empty() || id.contains(|c| c == '/' || c == '\\') || id.starts_with('.') {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}{}{}", FILE_PREFIX, id, FILE_SUFFIX)))
    }

    fn id_from_file_name(name: &str) -> Option<&str> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)
            .filter(|id| !id.is_empty())
    }
}

impl RunStore for LocalRunStore {
    fn save(&self, record: &RunRecord) -> Result<(), StorageError> {
        let file_path = self.get_file_path(&record.id)?;

        fs::create_dir_all(&self.base_dir).map_err(|e| {
            StorageError::IoError(format!("Failed to create {}: {}", self.base_dir.display(), e))
        })?;

        // Write beside the target and rename, so readers never see half a record.
        let tmp_path = file_path.with_extension("csv.tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| {
                StorageError::IoError(format!("Failed to create file: {}", e))
            })?;
            file.write_all(run_file::encode(record).as_bytes())
                .map_err(|e| StorageError::IoError(format!("Failed to write data: {}", e)))?;
            file.sync_all()
                .map_err(|e| StorageError::IoError(format!("Failed to sync data: {}", e)))?;
        }
        fs::rename(&tmp_path, &file_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::IoError(format!("Failed to commit run file: {}", e))
        })?;

        log::debug!("Wrote run {} to {}", record.id, file_path.display());
        Ok(())
    }

    fn list(&self) -> Result<Vec<RunRecord>, StorageError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| StorageError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::IoError(e.to_string()))?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(Self::id_from_file_name) else {
                continue;
            };

            match fs::read_to_string(entry.path()) {
                Ok(text) => {
                    if let Some(record) = run_file::decode_header(id, &text) {
                        records.push(record);
                    }
                }
                Err(e) => log::warn!("Skipping unreadable run file {:?}: {}", name, e),
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<RunRecord>, StorageError> {
        let file_path = self.get_file_path(id)?;
        if !file_path.exists() {
            return Ok(None);
        }

        match fs::read_to_string(&file_path) {
            Ok(text) => Ok(run_file::decode(id, &text)),
            Err(e) => {
                log::warn!("Treating unreadable run file {} as absent: {}", file_path.display(), e);
                Ok(None)
            }
        }
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let file_path = self.get_file_path(id)?;

        if file_path.exists() {
            fs::remove_file(&file_path)
                .map_err(|e| StorageError::IoError(format!("Failed to delete file: {}", e)))?;
        }

        Ok(())
    }
}
