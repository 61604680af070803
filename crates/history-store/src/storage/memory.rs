//! In-memory storage, used by tests and ephemeral clients

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{RecordStorage, StorageProvider};
use crate::error::{HistoryStoreError, StoreResult};
use crate::id::HistoryId;
use crate::record::{HistoryRecord, HistoryRecordStructure};

/// Segmented record list kept in process memory
#[derive(Debug)]
pub struct MemoryStorage {
    history_id: HistoryId,
    segments: RwLock<Vec<Vec<HistoryRecord>>>,
    max_records_per_segment: usize,
}

impl MemoryStorage {
    pub fn new(history_id: HistoryId, max_records_per_segment: usize) -> Self {
        Self {
            history_id,
            segments: RwLock::new(Vec::new()),
            max_records_per_segment: max_records_per_segment.max(1),
        }
    }
}

#[async_trait]
impl RecordStorage for MemoryStorage {
    async fn segment_count(&self) -> StoreResult<usize> {
        Ok(self.segments.read().len())
    }

    async fn load_segment(&self, index: usize) -> StoreResult<Vec<HistoryRecord>> {
        self.segments
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| HistoryStoreError::SegmentOutOfRange {
                history_id: self.history_id.to_string(),
                index,
            })
    }

    async fn append(&self, record: HistoryRecord) -> StoreResult<()> {
        let mut segments = self.segments.write();
        let needs_new_segment = segments
            .last()
            .map_or(true, |s| s.len() >= self.max_records_per_segment);
        if needs_new_segment {
            segments.push(Vec::new());
        }
        if let Some(segment) = segments.last_mut() {
            segment.push(record);
        }
        Ok(())
    }

    async fn replace_segment(&self, index: usize, records: Vec<HistoryRecord>) -> StoreResult<()> {
        let mut segments = self.segments.write();
        match segments.get_mut(index) {
            Some(segment) => {
                *segment = records;
                Ok(())
            }
            None => Err(HistoryStoreError::SegmentOutOfRange {
                history_id: self.history_id.to_string(),
                index,
            }),
        }
    }
}

/// Provider handing out [`MemoryStorage`] instances keyed by history id
#[derive(Debug)]
pub struct MemoryStorageProvider {
    histories: DashMap<HistoryId, Arc<MemoryStorage>>,
    max_records_per_segment: usize,
}

impl MemoryStorageProvider {
    pub fn new(max_records_per_segment: usize) -> Self {
        Self {
            histories: DashMap::new(),
            max_records_per_segment,
        }
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn open(
        &self,
        id: &HistoryId,
        _structure: &HistoryRecordStructure,
    ) -> StoreResult<Arc<dyn RecordStorage>> {
        let storage = self
            .histories
            .entry(id.clone())
            .or_insert_with(|| Arc::new(MemoryStorage::new(id.clone(), self.max_records_per_segment)))
            .value()
            .clone();
        Ok(storage)
    }

    async fn exists(&self, id: &HistoryId) -> StoreResult<bool> {
        Ok(self.histories.contains_key(id))
    }

    async fn purge(&self, id_prefix: &HistoryId) -> StoreResult<()> {
        let before = self.histories.len();
        self.histories.retain(|id, _| !id_prefix.is_prefix_of(id));
        debug!(
            scope = %id_prefix,
            removed = before - self.histories.len(),
            "Purged in-memory histories"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(n: usize) -> HistoryRecord {
        HistoryRecord::new(["n"], [n.to_string()], Utc::now())
    }

    #[tokio::test]
    async fn test_segments_rotate_when_full() {
        let id = HistoryId::create_from_raw_id(["test"]).unwrap();
        let storage = MemoryStorage::new(id, 2);

        for n in 0..5 {
            storage.append(record(n)).await.unwrap();
        }

        assert_eq!(storage.segment_count().await.unwrap(), 3);
        assert_eq!(storage.load_segment(0).await.unwrap().len(), 2);
        assert_eq!(storage.load_segment(2).await.unwrap().len(), 1);
        assert!(storage.load_segment(3).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_removes_scope() {
        let provider = MemoryStorageProvider::new(10);
        let structure = HistoryRecordStructure::new(["n"]);
        let a = HistoryId::create_from_raw_id(["callhistory", "a"]).unwrap();
        let b = HistoryId::create_from_raw_id(["msghistory", "b"]).unwrap();

        provider.open(&a, &structure).await.unwrap();
        provider.open(&b, &structure).await.unwrap();

        let scope = HistoryId::create_from_raw_id(["callhistory"]).unwrap();
        provider.purge(&scope).await.unwrap();

        assert!(!provider.exists(&a).await.unwrap());
        assert!(provider.exists(&b).await.unwrap());
    }
}
