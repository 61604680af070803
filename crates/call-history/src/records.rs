//! Call and call peer records
//!
//! A [`CallRecord`] is created by the live call tracker when a call is first
//! seen and mutated as peers join, change state and leave. Once the call ends
//! it is written to the history store and only read-only copies come back
//! from queries, so every mutator here is crate-private.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::CallId;

/// End reason stored when the call did not end with a known cause
pub const UNKNOWN_END_REASON: i32 = -1;

/// Whether we placed the call or received it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    #[serde(rename = "in")]
    In,
    #[serde(rename = "out")]
    Out,
}

impl CallDirection {
    /// Persisted form, `in` or `out`
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::In => "in",
            CallDirection::Out => "out",
        }
    }

    /// Parse the persisted form; anything but `in` is treated as outgoing
    pub fn from_persisted(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("in") {
            CallDirection::In
        } else {
            CallDirection::Out
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one call peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPeerState {
    Unknown,
    InitiatingCall,
    IncomingCall,
    Connecting,
    AlertingRemoteSide,
    Connected,
    OnHoldLocally,
    OnHoldRemotely,
    OnHoldMutually,
    Busy,
    Failed,
    Disconnected,
}

impl CallPeerState {
    const ALL: [CallPeerState; 12] = [
        CallPeerState::Unknown,
        CallPeerState::InitiatingCall,
        CallPeerState::IncomingCall,
        CallPeerState::Connecting,
        CallPeerState::AlertingRemoteSide,
        CallPeerState::Connected,
        CallPeerState::OnHoldLocally,
        CallPeerState::OnHoldRemotely,
        CallPeerState::OnHoldMutually,
        CallPeerState::Busy,
        CallPeerState::Failed,
        CallPeerState::Disconnected,
    ];

    /// Persisted state name
    pub fn as_state_str(&self) -> &'static str {
        match self {
            CallPeerState::Unknown => "Unknown",
            CallPeerState::InitiatingCall => "Initiating Call",
            CallPeerState::IncomingCall => "Incoming Call",
            CallPeerState::Connecting => "Connecting",
            CallPeerState::AlertingRemoteSide => "Alerting Remote User (Ringing)",
            CallPeerState::Connected => "Connected",
            CallPeerState::OnHoldLocally => "Locally On Hold",
            CallPeerState::OnHoldRemotely => "Remotely On Hold",
            CallPeerState::OnHoldMutually => "Mutually On Hold",
            CallPeerState::Busy => "Busy",
            CallPeerState::Failed => "Failed",
            CallPeerState::Disconnected => "Disconnected",
        }
    }

    /// Parse a persisted state name; unrecognised names map to [`CallPeerState::Unknown`]
    pub fn from_state_str(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| s.as_state_str() == value)
            .unwrap_or(CallPeerState::Unknown)
    }

    pub fn is_on_hold(&self) -> bool {
        matches!(
            self,
            CallPeerState::OnHoldLocally | CallPeerState::OnHoldRemotely | CallPeerState::OnHoldMutually
        )
    }

    /// Connected, or connected but held
    pub fn is_live(&self) -> bool {
        *self == CallPeerState::Connected || self.is_on_hold()
    }
}

impl fmt::Display for CallPeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_state_str())
    }
}

/// One remote party of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPeerRecord {
    peer_address: String,
    display_name: Option<String>,
    secondary_address: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    state: Option<CallPeerState>,
}

impl CallPeerRecord {
    pub fn new(peer_address: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            peer_address: peer_address.into(),
            display_name: None,
            secondary_address: None,
            start_time,
            end_time: None,
            state: None,
        }
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Alternate address of the peer, e.g. a phone number for a SIP contact
    pub fn secondary_address(&self) -> Option<&str> {
        self.secondary_address.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Last known state; `None` for records persisted before states were stored
    pub fn state(&self) -> Option<CallPeerState> {
        self.state
    }

    pub(crate) fn set_display_name(&mut self, name: Option<String>) {
        self.display_name = name;
    }

    pub(crate) fn set_secondary_address(&mut self, address: Option<String>) {
        self.secondary_address = address;
    }

    pub(crate) fn set_start_time(&mut self, start: DateTime<Utc>) {
        self.start_time = start;
    }

    pub(crate) fn set_end_time(&mut self, end: Option<DateTime<Utc>>) {
        self.end_time = end;
    }

    pub(crate) fn set_state(&mut self, state: Option<CallPeerState>) {
        self.state = state;
    }
}

/// One call, live or historical
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Live call this record tracks; not persisted
    #[serde(skip)]
    source_call: Option<CallId>,
    direction: CallDirection,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    peer_records: Vec<CallPeerRecord>,
    end_reason: i32,
    account_id: Option<String>,
}

impl CallRecord {
    pub fn new(direction: CallDirection, start_time: DateTime<Utc>) -> Self {
        Self {
            source_call: None,
            direction,
            start_time,
            end_time: None,
            peer_records: Vec::new(),
            end_reason: UNKNOWN_END_REASON,
            account_id: None,
        }
    }

    pub(crate) fn for_call(call_id: CallId, direction: CallDirection, start_time: DateTime<Utc>) -> Self {
        Self {
            source_call: Some(call_id),
            ..Self::new(direction, start_time)
        }
    }

    pub fn source_call(&self) -> Option<CallId> {
        self.source_call
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn peer_records(&self) -> &[CallPeerRecord] {
        &self.peer_records
    }

    /// Protocol reason code the call ended with, [`UNKNOWN_END_REASON`] if none
    pub fn end_reason(&self) -> i32 {
        self.end_reason
    }

    /// Account that handled the call
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Time between start and end, `None` while the call is still running
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn find_peer_record(&self, address: &str) -> Option<&CallPeerRecord> {
        self.peer_records.iter().find(|p| p.peer_address == address)
    }

    pub(crate) fn find_peer_record_mut(&mut self, address: &str) -> Option<&mut CallPeerRecord> {
        self.peer_records.iter_mut().find(|p| p.peer_address == address)
    }

    pub(crate) fn peer_records_mut(&mut self) -> &mut Vec<CallPeerRecord> {
        &mut self.peer_records
    }

    pub(crate) fn set_start_time(&mut self, start: DateTime<Utc>) {
        self.start_time = start;
    }

    /// Set the end time, closing every peer record that has no end yet
    pub(crate) fn set_end_time(&mut self, end: DateTime<Utc>) {
        self.end_time = Some(end);
        for peer in self.peer_records.iter_mut().filter(|p| p.end_time.is_none()) {
            peer.end_time = Some(end);
        }
    }

    pub(crate) fn set_end_reason(&mut self, reason: i32) {
        self.end_reason = reason;
    }

    pub(crate) fn set_account_id(&mut self, account_id: Option<String>) {
        self.account_id = account_id;
    }

    pub(crate) fn clear_source_call(&mut self) {
        self.source_call = None;
    }
}
