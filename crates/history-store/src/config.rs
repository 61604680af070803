//! Storage configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryStoreError, StoreResult};

/// Default number of records kept in one segment before rotating
pub const DEFAULT_MAX_RECORDS_PER_FILE: usize = 150;

/// Default directory, relative to the working directory, for on-disk histories
pub const DEFAULT_ROOT_DIR: &str = "history_ver1.0";

/// Which backend histories are stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process memory, lost on exit
    #[default]
    Memory,
    /// JSON-lines segment files below [`HistoryStoreConfig::root_dir`]
    File,
}

/// History store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryStoreConfig {
    pub storage: StorageKind,
    pub root_dir: PathBuf,
    pub max_records_per_file: usize,
}

impl Default for HistoryStoreConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Memory,
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            max_records_per_file: DEFAULT_MAX_RECORDS_PER_FILE,
        }
    }
}

impl HistoryStoreConfig {
    /// Configuration for an in-memory store
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for an on-disk store rooted at `root_dir`
    pub fn on_disk(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageKind::File,
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_records_per_file(mut self, max: usize) -> Self {
        self.max_records_per_file = max;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.max_records_per_file == 0 {
            return Err(HistoryStoreError::invalid_configuration(
                "max_records_per_file",
                "must be greater than zero",
            ));
        }
        if self.storage == StorageKind::File && self.root_dir.as_os_str().is_empty() {
            return Err(HistoryStoreError::invalid_configuration(
                "root_dir",
                "required for file storage",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HistoryStoreConfig::default();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.max_records_per_file, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(HistoryStoreConfig::in_memory()
            .with_max_records_per_file(0)
            .validate()
            .is_err());
        assert!(HistoryStoreConfig::on_disk("").validate().is_err());
        assert!(HistoryStoreConfig::on_disk("/var/lib/history").validate().is_ok());
    }
}
