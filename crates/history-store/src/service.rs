//! Entry point for creating, looking up and purging histories

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{HistoryStoreConfig, StorageKind};
use crate::error::StoreResult;
use crate::history::History;
use crate::id::HistoryId;
use crate::record::HistoryRecordStructure;
use crate::storage::file::FileStorageProvider;
use crate::storage::memory::MemoryStorageProvider;
use crate::storage::StorageProvider;

/// Opens histories on a storage backend and caches them by id
#[derive(Debug)]
pub struct HistoryService {
    provider: Arc<dyn StorageProvider>,
    histories: DashMap<HistoryId, Arc<History>>,
}

impl HistoryService {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            histories: DashMap::new(),
        }
    }

    /// Service backed by process memory with default segment size
    pub fn in_memory() -> Self {
        let config = HistoryStoreConfig::in_memory();
        Self::new(Arc::new(MemoryStorageProvider::new(config.max_records_per_file)))
    }

    /// Service for the backend described by `config`
    pub fn from_config(config: &HistoryStoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let provider: Arc<dyn StorageProvider> = match config.storage {
            StorageKind::Memory => Arc::new(MemoryStorageProvider::new(config.max_records_per_file)),
            StorageKind::File => Arc::new(FileStorageProvider::new(
                config.root_dir.clone(),
                config.max_records_per_file,
            )),
        };
        info!(storage = ?config.storage, root = %config.root_dir.display(), "History service created");
        Ok(Self::new(provider))
    }

    /// Open the history `id`, creating it if needed
    ///
    /// A history already opened by this service is returned as is, even if a
    /// different structure is passed.
    pub async fn create_history(
        &self,
        id: HistoryId,
        structure: HistoryRecordStructure,
    ) -> StoreResult<Arc<History>> {
        if let Some(history) = self.histories.get(&id) {
            return Ok(history.value().clone());
        }

        let storage = self.provider.open(&id, &structure).await?;
        debug!(history = %id, fields = structure.property_count(), "Opened history");
        let history = Arc::new(History::new(id.clone(), structure, storage));

        // A concurrent open of the same id keeps whichever was inserted first
        let history = self.histories.entry(id).or_insert(history).value().clone();
        Ok(history)
    }

    /// Whether the history `id` has been created on the backend
    pub async fn is_history_existing(&self, id: &HistoryId) -> StoreResult<bool> {
        if self.histories.contains_key(id) {
            return Ok(true);
        }
        self.provider.exists(id).await
    }

    /// Delete the history `id_prefix` and every history below it
    ///
    /// Histories returned earlier keep working against the purged backend
    /// but are no longer handed out by [`HistoryService::create_history`].
    pub async fn purge_locally_stored_history(&self, id_prefix: &HistoryId) -> StoreResult<()> {
        self.histories.retain(|id, _| !id_prefix.is_prefix_of(id));
        self.provider.purge(id_prefix).await?;
        info!(scope = %id_prefix, "Purged locally stored history");
        Ok(())
    }
}
