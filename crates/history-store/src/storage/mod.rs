//! Storage seam for histories
//!
//! A history is stored as an ordered list of segments, oldest first. Each
//! segment holds records in append order. Readers walk segments to report
//! progress, writers append to the newest segment and rotate once it is full.

pub mod file;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::id::HistoryId;
use crate::record::{HistoryRecord, HistoryRecordStructure};

/// Record storage for one opened history
#[async_trait]
pub trait RecordStorage: Send + Sync + Debug {
    /// Number of segments currently stored
    async fn segment_count(&self) -> StoreResult<usize>;

    /// Load every record of one segment, in append order
    async fn load_segment(&self, index: usize) -> StoreResult<Vec<HistoryRecord>>;

    /// Append a record to the newest segment, rotating when it is full
    async fn append(&self, record: HistoryRecord) -> StoreResult<()>;

    /// Replace the content of an existing segment
    async fn replace_segment(&self, index: usize, records: Vec<HistoryRecord>) -> StoreResult<()>;
}

/// Opens and deletes histories on a storage backend
#[async_trait]
pub trait StorageProvider: Send + Sync + Debug {
    /// Open (creating if needed) the storage for a history
    async fn open(
        &self,
        id: &HistoryId,
        structure: &HistoryRecordStructure,
    ) -> StoreResult<Arc<dyn RecordStorage>>;

    /// Whether a history has been created on this backend
    async fn exists(&self, id: &HistoryId) -> StoreResult<bool>;

    /// Delete the history `id_prefix` and every history below it
    async fn purge(&self, id_prefix: &HistoryId) -> StoreResult<()>;
}
