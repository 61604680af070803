//! Call history configuration
//!
//! ```toml
//! history_scope = "callhistory"
//! default_contact_id = "default"
//! skip_completed_elsewhere = true
//! keyword_case_sensitive = false
//!
//! [store]
//! storage = "file"
//! root_dir = "/var/lib/rvoip/history"
//! max_records_per_file = 150
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use rvoip_history_store::HistoryStoreConfig;

use crate::error::{CallHistoryError, CallHistoryResult};
use crate::logging::LoggingConfig;

/// First component of every call history id
pub const DEFAULT_HISTORY_SCOPE: &str = "callhistory";

/// Contact id used when a call is not tied to a local or remote contact
pub const DEFAULT_CONTACT_ID: &str = "default";

/// Configuration of the call history service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallHistoryConfig {
    /// Scope under which call histories are stored and purged
    pub history_scope: String,
    /// Local/remote id used for the shared history
    pub default_contact_id: String,
    /// Backend for the history store
    pub store: HistoryStoreConfig,
    /// Do not record unanswered calls that were picked up on another device
    pub skip_completed_elsewhere: bool,
    /// Case sensitivity of peer keyword searches
    pub keyword_case_sensitive: bool,
    pub logging: LoggingConfig,
}

impl Default for CallHistoryConfig {
    fn default() -> Self {
        Self {
            history_scope: DEFAULT_HISTORY_SCOPE.to_string(),
            default_contact_id: DEFAULT_CONTACT_ID.to_string(),
            store: HistoryStoreConfig::default(),
            skip_completed_elsewhere: true,
            keyword_case_sensitive: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl CallHistoryConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> CallHistoryResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CallHistoryError::config("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> CallHistoryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CallHistoryError::config(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn with_store(mut self, store: HistoryStoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_skip_completed_elsewhere(mut self, skip: bool) -> Self {
        self.skip_completed_elsewhere = skip;
        self
    }

    pub fn with_keyword_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.keyword_case_sensitive = case_sensitive;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn validate(&self) -> CallHistoryResult<()> {
        if self.history_scope.is_empty() {
            return Err(CallHistoryError::config("history_scope", "must not be empty"));
        }
        if self.default_contact_id.is_empty() {
            return Err(CallHistoryError::config("default_contact_id", "must not be empty"));
        }
        self.store.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_history_store::StorageKind;

    #[test]
    fn test_defaults() {
        let config = CallHistoryConfig::default();
        assert_eq!(config.history_scope, "callhistory");
        assert_eq!(config.default_contact_id, "default");
        assert!(config.skip_completed_elsewhere);
        assert!(!config.keyword_case_sensitive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CallHistoryConfig::from_toml_str(
            r#"
            keyword_case_sensitive = true

            [store]
            storage = "file"
            root_dir = "/tmp/history"
            "#,
        )
        .unwrap();

        assert!(config.keyword_case_sensitive);
        assert_eq!(config.store.storage, StorageKind::File);
        assert_eq!(config.store.max_records_per_file, 150);
        assert_eq!(config.history_scope, "callhistory");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(CallHistoryConfig::from_toml_str("history_scope = \"\"").is_err());
        assert!(CallHistoryConfig::from_toml_str("[store]\nmax_records_per_file = 0").is_err());
        assert!(CallHistoryConfig::from_toml_str("not toml at all [").is_err());
    }
}
