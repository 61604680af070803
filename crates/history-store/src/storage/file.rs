//! On-disk storage: one directory per history, JSON-lines segment files
//!
//! ```text
//! <root>/callhistory/default/default/
//!     structure.json
//!     00000000.jsonl
//!     00000001.jsonl
//! ```
//!
//! Each line of a segment file is one serialized [`HistoryRecord`]. Lines that
//! fail to decode, or whose names and values do not pair up, are skipped with
//! a warning so one damaged entry never hides the rest of a history.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{RecordStorage, StorageProvider};
use crate::error::{HistoryStoreError, StoreResult};
use crate::id::HistoryId;
use crate::record::{HistoryRecord, HistoryRecordStructure};

const STRUCTURE_FILE: &str = "structure.json";
const SEGMENT_EXTENSION: &str = "jsonl";

/// Segment files of one history directory
#[derive(Debug)]
pub struct FileStorage {
    history_id: HistoryId,
    dir: PathBuf,
    max_records_per_file: usize,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(history_id: HistoryId, dir: PathBuf, max_records_per_file: usize) -> Self {
        Self {
            history_id,
            dir,
            max_records_per_file: max_records_per_file.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Segment files sorted by their numeric name, oldest first
    async fn segment_files(&self) -> StoreResult<Vec<(u64, PathBuf)>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryStoreError::io(&self.dir, e)),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HistoryStoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }
            if let Some(number) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                segments.push((number, path));
            }
        }
        segments.sort_by_key(|(number, _)| *number);
        Ok(segments)
    }

    async fn segment_path(&self, index: usize) -> StoreResult<PathBuf> {
        self.segment_files()
            .await?
            .into_iter()
            .nth(index)
            .map(|(_, path)| path)
            .ok_or_else(|| HistoryStoreError::SegmentOutOfRange {
                history_id: self.history_id.to_string(),
                index,
            })
    }

    fn segment_file_name(number: u64) -> String {
        format!("{:08}.{}", number, SEGMENT_EXTENSION)
    }

    async fn read_records(path: &Path) -> StoreResult<Vec<HistoryRecord>> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| HistoryStoreError::io(path, e))?;

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) if record.is_consistent() => records.push(record),
                Ok(record) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    names = record.property_names.len(),
                    values = record.property_values.len(),
                    "Skipping history record with unmatched property values"
                ),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed history record"
                ),
            }
        }
        Ok(records)
    }

    fn encode_line(&self, record: &HistoryRecord) -> StoreResult<String> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| HistoryStoreError::format(&self.dir, e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

#[async_trait]
impl RecordStorage for FileStorage {
    async fn segment_count(&self) -> StoreResult<usize> {
        Ok(self.segment_files().await?.len())
    }

    async fn load_segment(&self, index: usize) -> StoreResult<Vec<HistoryRecord>> {
        let path = self.segment_path(index).await?;
        Self::read_records(&path).await
    }

    async fn append(&self, record: HistoryRecord) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let segments = self.segment_files().await?;
        let target = match segments.last() {
            Some((number, path)) => {
                let count = Self::read_records(path).await?.len();
                if count >= self.max_records_per_file {
                    debug!(history = %self.history_id, segment = number + 1, "Rotating history segment");
                    self.dir.join(Self::segment_file_name(number + 1))
                } else {
                    path.clone()
                }
            }
            None => {
                fs::create_dir_all(&self.dir)
                    .await
                    .map_err(|e| HistoryStoreError::io(&self.dir, e))?;
                self.dir.join(Self::segment_file_name(0))
            }
        };

        let line = self.encode_line(&record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(|e| HistoryStoreError::io(&target, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HistoryStoreError::io(&target, e))?;
        file.flush()
            .await
            .map_err(|e| HistoryStoreError::io(&target, e))?;
        Ok(())
    }

    async fn replace_segment(&self, index: usize, records: Vec<HistoryRecord>) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.segment_path(index).await?;
        let mut content = String::new();
        for record in &records {
            content.push_str(&self.encode_line(record)?);
        }

        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| HistoryStoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| HistoryStoreError::io(&path, e))?;
        Ok(())
    }
}

/// Provider for histories stored below a root directory
#[derive(Debug)]
pub struct FileStorageProvider {
    root: PathBuf,
    max_records_per_file: usize,
    opened: DashMap<HistoryId, Arc<FileStorage>>,
}

impl FileStorageProvider {
    pub fn new(root: impl Into<PathBuf>, max_records_per_file: usize) -> Self {
        Self {
            root: root.into(),
            max_records_per_file,
            opened: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_dir(&self, id: &HistoryId) -> PathBuf {
        self.root.join(id.to_relative_path())
    }

    async fn write_structure(dir: &Path, structure: &HistoryRecordStructure) -> StoreResult<()> {
        let path = dir.join(STRUCTURE_FILE);
        match fs::read_to_string(&path).await {
            Ok(existing) => {
                if let Ok(stored) = serde_json::from_str::<HistoryRecordStructure>(&existing) {
                    if &stored == structure {
                        return Ok(());
                    }
                    info!(
                        path = %path.display(),
                        stored = stored.property_count(),
                        current = structure.property_count(),
                        "History structure changed, updating"
                    );
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(HistoryStoreError::io(&path, e)),
        }

        let json = serde_json::to_string_pretty(structure)
            .map_err(|e| HistoryStoreError::format(&path, e.to_string()))?;
        fs::write(&path, json)
            .await
            .map_err(|e| HistoryStoreError::io(&path, e))
    }
}

#[async_trait]
impl StorageProvider for FileStorageProvider {
    async fn open(
        &self,
        id: &HistoryId,
        structure: &HistoryRecordStructure,
    ) -> StoreResult<Arc<dyn RecordStorage>> {
        let dir = self.history_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HistoryStoreError::io(&dir, e))?;
        Self::write_structure(&dir, structure).await?;

        let storage = self
            .opened
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(FileStorage::new(id.clone(), dir.clone(), self.max_records_per_file))
            })
            .value()
            .clone();
        Ok(storage)
    }

    async fn exists(&self, id: &HistoryId) -> StoreResult<bool> {
        let path = self.history_dir(id).join(STRUCTURE_FILE);
        fs::try_exists(&path)
            .await
            .map_err(|e| HistoryStoreError::io(&path, e))
    }

    async fn purge(&self, id_prefix: &HistoryId) -> StoreResult<()> {
        self.opened.retain(|id, _| !id_prefix.is_prefix_of(id));

        let dir = self.history_dir(id_prefix);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(path = %dir.display(), "Purged stored histories");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryStoreError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(n: usize) -> HistoryRecord {
        HistoryRecord::new(["n"], [n.to_string()], Utc::now())
    }

    #[tokio::test]
    async fn test_append_rotates_segment_files() {
        let tmp = TempDir::new().unwrap();
        let id = HistoryId::create_from_raw_id(["callhistory", "default"]).unwrap();
        let provider = FileStorageProvider::new(tmp.path(), 3);
        let storage = provider
            .open(&id, &HistoryRecordStructure::new(["n"]))
            .await
            .unwrap();

        for n in 0..7 {
            storage.append(record(n)).await.unwrap();
        }

        assert_eq!(storage.segment_count().await.unwrap(), 3);
        let first = storage.load_segment(0).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].value("n"), Some("0"));
        let last = storage.load_segment(2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].value("n"), Some("6"));

        let dir = tmp.path().join("callhistory").join("default");
        assert!(dir.join("structure.json").exists());
        assert!(dir.join("00000002.jsonl").exists());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let id = HistoryId::create_from_raw_id(["h"]).unwrap();
        let provider = FileStorageProvider::new(tmp.path(), 10);
        let storage = provider
            .open(&id, &HistoryRecordStructure::new(["n"]))
            .await
            .unwrap();
        storage.append(record(1)).await.unwrap();

        let segment = tmp.path().join("h").join("00000000.jsonl");
        let mut content = std::fs::read_to_string(&segment).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&segment, content).unwrap();
        storage.append(record(2)).await.unwrap();

        let records = storage.load_segment(0).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_segment_and_purge() {
        let tmp = TempDir::new().unwrap();
        let id = HistoryId::create_from_raw_id(["callhistory", "a"]).unwrap();
        let provider = FileStorageProvider::new(tmp.path(), 10);
        let storage = provider
            .open(&id, &HistoryRecordStructure::new(["n"]))
            .await
            .unwrap();
        storage.append(record(1)).await.unwrap();
        storage.replace_segment(0, vec![record(9)]).await.unwrap();

        let records = storage.load_segment(0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value("n"), Some("9"));
        assert!(storage.replace_segment(5, Vec::new()).await.is_err());

        assert!(provider.exists(&id).await.unwrap());
        let scope = HistoryId::create_from_raw_id(["callhistory"]).unwrap();
        provider.purge(&scope).await.unwrap();
        assert!(!provider.exists(&id).await.unwrap());
        // Purging twice is not an error
        provider.purge(&scope).await.unwrap();
    }
}
