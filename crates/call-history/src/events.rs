//! Telephony events consumed by call history and events it emits
//!
//! Telephony backends describe calls with [`CallInfo`] / [`CallPeerInfo`]
//! snapshots and deliver lifecycle notifications through [`CallListener`].
//! A backend is represented by a [`TelephonyProvider`]; the call history
//! service registers itself as a listener on every provider that supports
//! basic telephony.
//!
//! # Example
//!
//! ```rust
//! use rvoip_call_history::events::{CallId, CallInfo, CallPeerInfo};
//! use rvoip_call_history::records::CallPeerState;
//!
//! let call = CallInfo::new(CallId::new())
//!     .with_account_id("sip:me@example.com")
//!     .with_peer(CallPeerInfo::new("sip:alice@example.com", CallPeerState::Connecting));
//! assert_eq!(call.peers.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::CallPeerState;

/// Reason code of a call that was cleared normally
pub const NORMAL_CALL_CLEARING: i32 = 200;

/// Reason text of a call that was answered on another device
pub const CALL_COMPLETED_ELSEWHERE: &str = "Call completed elsewhere";

/// Opaque handle of a live call, compared by value
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Coarse state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Ringing or dialing, not yet answered
    Initialization,
    InProgress,
    Ended,
    Unknown,
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEndCause {
    pub reason_code: i32,
    pub reason_text: Option<String>,
}

impl CallEndCause {
    pub fn new(reason_code: i32, reason_text: Option<String>) -> Self {
        Self {
            reason_code,
            reason_text,
        }
    }

    pub fn is_normal_clearing(&self) -> bool {
        self.reason_code == NORMAL_CALL_CLEARING
    }

    pub fn is_completed_elsewhere(&self) -> bool {
        self.reason_text.as_deref() == Some(CALL_COMPLETED_ELSEWHERE)
    }
}

/// Snapshot of one peer of a live call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPeerInfo {
    pub address: String,
    pub display_name: Option<String>,
    pub state: CallPeerState,
}

impl CallPeerInfo {
    pub fn new(address: impl Into<String>, state: CallPeerState) -> Self {
        Self {
            address: address.into(),
            display_name: None,
            state,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Snapshot of a live call as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub call_id: CallId,
    /// Unique id of the account the call was placed or received on
    pub account_id: Option<String>,
    /// Peers already on the call when the event was raised
    pub peers: Vec<CallPeerInfo>,
}

impl CallInfo {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            account_id: None,
            peers: Vec::new(),
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_peer(mut self, peer: CallPeerInfo) -> Self {
        self.peers.push(peer);
        self
    }
}

/// Receives call and call peer lifecycle events from a telephony backend
///
/// Events for one call are expected in causal order. Implementations must
/// not fail; anything unexpected is logged and ignored.
#[async_trait]
pub trait CallListener: Send + Sync {
    async fn incoming_call_received(&self, call: &CallInfo);

    async fn outgoing_call_created(&self, call: &CallInfo);

    /// The call is over, without further detail
    async fn call_ended(&self, call_id: CallId);

    /// The call changed state; `cause` is set for some transitions into [`CallState::Ended`]
    async fn call_state_changed(
        &self,
        call_id: CallId,
        old_state: CallState,
        new_state: CallState,
        cause: Option<&CallEndCause>,
    );

    async fn call_peer_added(&self, call_id: CallId, peer: &CallPeerInfo);

    /// `peer.state` is the state the peer had when it left
    async fn call_peer_removed(&self, call_id: CallId, peer: &CallPeerInfo);

    async fn peer_state_changed(
        &self,
        call_id: CallId,
        peer_address: &str,
        old_state: CallPeerState,
        new_state: CallPeerState,
    );
}

/// A telephony backend (one registered account)
pub trait TelephonyProvider: Send + Sync {
    fn protocol_name(&self) -> &str;

    fn account_id(&self) -> &str;

    /// Whether the backend can place and receive calls
    fn supports_basic_telephony(&self) -> bool;

    fn add_call_listener(&self, listener: Arc<dyn CallListener>);

    fn remove_call_listener(&self, listener: &Arc<dyn CallListener>);
}

/// Emitted each time a peer record is created for a live call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHistoryPeerRecordEvent {
    pub peer_address: String,
    pub start_time: DateTime<Utc>,
    pub account_id: Option<String>,
}

/// Receives [`CallHistoryPeerRecordEvent`]s
pub trait CallHistoryPeerRecordListener: Send + Sync {
    fn call_peer_record_received(&self, event: &CallHistoryPeerRecordEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_compare_by_value() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a.to_string().starts_with("call-"));
    }

    #[test]
    fn test_end_cause_classification() {
        let elsewhere = CallEndCause::new(NORMAL_CALL_CLEARING, Some(CALL_COMPLETED_ELSEWHERE.into()));
        assert!(elsewhere.is_normal_clearing());
        assert!(elsewhere.is_completed_elsewhere());

        let busy = CallEndCause::new(486, None);
        assert!(!busy.is_normal_clearing());
        assert!(!busy.is_completed_elsewhere());
    }
}
