//! # Call History - Call recording and search for rvoip clients
//!
//! This crate records every call placed or received through a telephony
//! provider and makes the history searchable:
//! - **tracker**: turns live call and peer events into [`CallRecord`]s
//! - **persistence**: writes finished records to a history store and runs
//!   date, keyword and peer queries with aggregated search progress
//! - **contact_source**: free-text search returning labelled results for UIs
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_call_history::{
//!     CallHistoryService, CallId, CallInfo, CallPeerInfo, CallPeerState, SystemClock,
//! };
//!
//! # async fn example() {
//! let service = CallHistoryService::in_memory(Arc::new(SystemClock));
//! let tracker = service.tracker();
//!
//! // Normally driven by a TelephonyProvider the service is registered on
//! let call_id = CallId::new();
//! tracker.on_outgoing_call(&CallInfo::new(call_id));
//! tracker.on_peer_added(
//!     call_id,
//!     &CallPeerInfo::new("sip:bob@example.com", CallPeerState::Connecting),
//! );
//! tracker.on_call_ended(call_id).await;
//!
//! let calls = service.find_by_peer("sip:bob@example.com", 10).await;
//! assert_eq!(calls.len(), 1);
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TelephonyProvider --events--> LiveCallTracker --finished call--> CallHistoryPersistence
//!                                                                        |
//!                    CallHistoryService / CallHistoryContactSource <--queries
//! ```
//!
//! Recording is best-effort: store failures are logged and never reach the
//! telephony event path.

pub mod clock;
pub mod config;
pub mod contact_source;
pub mod error;
pub mod events;
pub mod logging;
pub mod persistence;
pub mod records;
pub mod service;
pub mod tracker;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CallHistoryConfig;
pub use contact_source::{
    CallHistoryContactQuery, CallHistoryContactSource, ContactQueryStatus, SourceContact,
};
pub use error::{CallHistoryError, CallHistoryResult};
pub use events::{
    CallEndCause, CallHistoryPeerRecordEvent, CallHistoryPeerRecordListener, CallId, CallInfo,
    CallListener, CallPeerInfo, CallState, TelephonyProvider,
};
pub use logging::{setup_logging, LoggingConfig};
pub use persistence::{
    compare_by_recency, CallHistoryPersistence, CallHistoryProgressEvent,
    CallHistorySearchProgressListener, MetaContact, SearchProgressWrapper,
};
pub use records::{CallDirection, CallPeerRecord, CallPeerState, CallRecord};
pub use service::CallHistoryService;
pub use tracker::{CallRecordSink, LiveCallTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
