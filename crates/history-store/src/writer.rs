//! Appending and rewriting history records

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{HistoryStoreError, StoreResult};
use crate::id::HistoryId;
use crate::record::{HistoryRecord, HistoryRecordStructure};
use crate::storage::RecordStorage;

/// Selects records to rewrite and computes their new field values
///
/// Used with [`HistoryWriter::update_record`].
pub trait HistoryRecordUpdater: Send + Sync {
    /// Whether `record` should be updated
    fn is_matching(&self, record: &HistoryRecord) -> bool;

    /// Field name to new value for a matching record
    fn update_changes(&self, record: &HistoryRecord) -> HashMap<String, String>;

    /// Timestamp of a record once it has been changed; the current time unless overridden
    fn updated_timestamp(&self, _record: &HistoryRecord) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Write access to one history
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    history_id: HistoryId,
    structure: HistoryRecordStructure,
    storage: Arc<dyn RecordStorage>,
}

impl HistoryWriter {
    pub(crate) fn new(
        history_id: HistoryId,
        structure: HistoryRecordStructure,
        storage: Arc<dyn RecordStorage>,
    ) -> Self {
        Self {
            history_id,
            structure,
            storage,
        }
    }

    /// Append a record whose values follow the history structure
    ///
    /// Fewer values than structure fields is allowed; the trailing fields are
    /// simply absent from the stored record.
    pub async fn add_record(&self, values: Vec<String>, timestamp: DateTime<Utc>) -> StoreResult<()> {
        if values.len() > self.structure.property_count() {
            return Err(HistoryStoreError::StructureMismatch {
                history_id: self.history_id.to_string(),
                expected: self.structure.property_count(),
                actual: values.len(),
            });
        }

        let record = HistoryRecord::from_structure(&self.structure, values, timestamp);
        trace!(history = %self.history_id, "Appending history record");
        self.storage.append(record).await
    }

    /// Rewrite the records selected by `updater`
    ///
    /// Segments are scanned oldest first. The first segment in which at least
    /// one record changes is written back, with changed records stamped by
    /// [`HistoryRecordUpdater::updated_timestamp`], and the scan stops there. Returns whether anything
    /// was rewritten.
    pub async fn update_record<U>(&self, updater: &U) -> StoreResult<bool>
    where
        U: HistoryRecordUpdater + ?Sized,
    {
        let segments = self.storage.segment_count().await?;

        for index in 0..segments {
            let mut records = self.storage.load_segment(index).await?;
            let mut changed = false;

            for record in records.iter_mut() {
                if !updater.is_matching(record) {
                    continue;
                }
                let changes = updater.update_changes(record);
                if record.apply_changes(&changes) {
                    record.timestamp = updater.updated_timestamp(record);
                    changed = true;
                }
            }

            if changed {
                debug!(history = %self.history_id, segment = index, "Rewriting updated history segment");
                self.storage.replace_segment(index, records).await?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}
