//! History-store: append-only structured record storage
//!
//! This crate provides the generic history persistence layer used by the rvoip
//! history services (call history today). A history is an append-only log of
//! [`HistoryRecord`]s that share a [`HistoryRecordStructure`] (an ordered list
//! of property names), addressed by a hierarchical [`HistoryId`].
//!
//! ## Layering
//! ```text
//! HistoryService -> History -> {HistoryReader, HistoryWriter} -> RecordStorage
//! ```
//!
//! - [`HistoryService`] opens and caches histories and purges whole scopes
//! - [`HistoryReader`] runs date, keyword and "last N" queries, reporting
//!   0–100 progress to registered [`HistorySearchProgressListener`]s
//! - [`HistoryWriter`] appends records and rewrites matching ones in place
//! - [`RecordStorage`] / [`StorageProvider`] are the storage seam, with an
//!   in-memory and an on-disk JSON-lines implementation
//!
//! ## Example
//!
//! ```rust
//! use rvoip_history_store::{HistoryId, HistoryRecordStructure, HistoryService};
//! use chrono::Utc;
//!
//! # async fn example() -> rvoip_history_store::StoreResult<()> {
//! let service = HistoryService::in_memory();
//! let id = HistoryId::create_from_raw_id(["callhistory", "default", "default"])?;
//! let structure = HistoryRecordStructure::new(["callStart", "dir"]);
//!
//! let history = service.create_history(id, structure).await?;
//! history
//!     .writer()
//!     .add_record(vec!["1700000000000".into(), "out".into()], Utc::now())
//!     .await?;
//!
//! let records = history.reader().find_last(10).await?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod id;
pub mod progress;
pub mod reader;
pub mod record;
pub mod service;
pub mod storage;
pub mod writer;

pub use config::{HistoryStoreConfig, StorageKind};
pub use error::{HistoryStoreError, StoreResult};
pub use history::History;
pub use id::HistoryId;
pub use progress::{
    HistorySearchProgressListener, ProgressEvent, SearchCancellation, PROGRESS_MAXIMUM_VALUE,
    PROGRESS_MINIMUM_VALUE,
};
pub use reader::HistoryReader;
pub use record::{HistoryRecord, HistoryRecordStructure};
pub use service::HistoryService;
pub use storage::{
    file::{FileStorage, FileStorageProvider},
    memory::{MemoryStorage, MemoryStorageProvider},
    RecordStorage, StorageProvider,
};
pub use writer::{HistoryRecordUpdater, HistoryWriter};

/// History-store version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
