//! Persistence of call records in the history store
//!
//! - [`codec`] maps a [`crate::CallRecord`] to and from a flat history record
//! - [`progress`] aggregates reader progress for call history listeners
//! - [`service`] writes finished calls and runs the call history queries

pub mod codec;
pub mod progress;
pub mod service;

pub use codec::{decode_call_record, encode_call_record, record_structure, STRUCTURE_NAMES};
pub use progress::{CallHistoryProgressEvent, CallHistorySearchProgressListener, SearchProgressWrapper};
pub use service::{compare_by_recency, CallHistoryPersistence, MetaContact};
