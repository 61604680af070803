//! Live call tracking
//!
//! [`LiveCallTracker`] owns the in-memory table of calls that are still in
//! progress. It turns telephony events into [`CallRecord`] mutations and
//! hands each finished record to a [`CallRecordSink`] exactly once, when the
//! call ends.
//!
//! Lookups that miss (events for calls never seen, duplicate end events,
//! peers never added) are silent no-ops.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::events::{
    CallEndCause, CallHistoryPeerRecordEvent, CallHistoryPeerRecordListener, CallId, CallInfo,
    CallListener, CallPeerInfo, CallState,
};
use crate::records::{CallDirection, CallPeerRecord, CallPeerState, CallRecord};

/// Destination for finished call records
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    /// Persist a finished record; failures are handled by the sink
    async fn write_call(&self, record: &CallRecord);
}

/// A tracked call and the peers that have already left it
#[derive(Debug)]
struct LiveCall {
    record: CallRecord,
    removed_peers: HashSet<String>,
}

/// In-memory table of calls in progress
pub struct LiveCallTracker {
    live_calls: DashMap<CallId, LiveCall>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn CallRecordSink>,
    peer_record_listeners: RwLock<Vec<Arc<dyn CallHistoryPeerRecordListener>>>,
    skip_completed_elsewhere: bool,
}

impl std::fmt::Debug for LiveCallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCallTracker")
            .field("live_calls", &self.live_calls.len())
            .field("clock", &self.clock)
            .field("skip_completed_elsewhere", &self.skip_completed_elsewhere)
            .finish()
    }
}

impl LiveCallTracker {
    pub fn new(sink: Arc<dyn CallRecordSink>) -> Self {
        Self::with_clock(sink, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn CallRecordSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            live_calls: DashMap::new(),
            clock,
            sink,
            peer_record_listeners: RwLock::new(Vec::new()),
            skip_completed_elsewhere: true,
        }
    }

    /// Whether calls answered on another device are left out of history
    pub fn with_skip_completed_elsewhere(mut self, skip: bool) -> Self {
        self.skip_completed_elsewhere = skip;
        self
    }

    /// Number of calls currently tracked
    pub fn len(&self) -> usize {
        self.live_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_calls.is_empty()
    }

    pub fn is_tracking(&self, call_id: CallId) -> bool {
        self.live_calls.contains_key(&call_id)
    }

    /// Copy of the live record for `call_id`
    pub fn snapshot(&self, call_id: CallId) -> Option<CallRecord> {
        self.live_calls.get(&call_id).map(|c| c.record.clone())
    }

    pub fn add_peer_record_listener(&self, listener: Arc<dyn CallHistoryPeerRecordListener>) {
        let mut listeners = self.peer_record_listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_peer_record_listener(&self, listener: &Arc<dyn CallHistoryPeerRecordListener>) {
        self.peer_record_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn on_incoming_call(&self, call: &CallInfo) {
        self.on_new_call(call, CallDirection::In);
    }

    pub fn on_outgoing_call(&self, call: &CallInfo) {
        self.on_new_call(call, CallDirection::Out);
    }

    /// Start tracking `call` unless it is already tracked, then add the peers
    /// it already has
    fn on_new_call(&self, call: &CallInfo, direction: CallDirection) {
        match self.live_calls.entry(call.call_id) {
            Entry::Occupied(_) => {
                trace!(call_id = %call.call_id, "Call already tracked");
                return;
            }
            Entry::Vacant(slot) => {
                let mut record = CallRecord::for_call(call.call_id, direction, self.clock.now());
                record.set_account_id(call.account_id.clone());
                slot.insert(LiveCall {
                    record,
                    removed_peers: HashSet::new(),
                });
            }
        }
        debug!(call_id = %call.call_id, %direction, peers = call.peers.len(), "Tracking new call");

        for peer in &call.peers {
            self.on_peer_added(call.call_id, peer);
        }
    }

    /// Add a peer record with start and end set to now
    pub fn on_peer_added(&self, call_id: CallId, peer: &CallPeerInfo) {
        let now = self.clock.now();
        let account_id = {
            let Some(mut live) = self.live_calls.get_mut(&call_id) else {
                trace!(%call_id, peer = %peer.address, "Peer added to untracked call");
                return;
            };

            let mut record = CallPeerRecord::new(peer.address.clone(), now);
            record.set_end_time(Some(now));
            record.set_display_name(peer.display_name.clone());
            record.set_state(Some(peer.state));
            live.record.peer_records_mut().push(record);
            live.record.account_id().map(str::to_string)
        };

        debug!(%call_id, peer = %peer.address, "Peer joined call");
        self.fire_peer_record_event(CallHistoryPeerRecordEvent {
            peer_address: peer.address.clone(),
            start_time: now,
            account_id,
        });
    }

    /// Record the state the peer left with and close its time on the air
    pub fn on_peer_removed(&self, call_id: CallId, peer: &CallPeerInfo) {
        let now = self.clock.now();
        let Some(mut live) = self.live_calls.get_mut(&call_id) else {
            trace!(%call_id, peer = %peer.address, "Peer removed from untracked call");
            return;
        };
        let live = &mut *live;

        let Some(record) = live.record.find_peer_record_mut(&peer.address) else {
            trace!(%call_id, peer = %peer.address, "Removed peer was never added");
            return;
        };

        if peer.state != CallPeerState::Disconnected {
            record.set_state(Some(peer.state));
        }
        if record.state().is_some_and(|s| s.is_live()) {
            record.set_end_time(Some(now));
        }
        live.removed_peers.insert(peer.address.clone());
        debug!(%call_id, peer = %peer.address, state = ?record.state(), "Peer left call");
    }

    /// Track a peer state change
    ///
    /// Transitions into `Disconnected` are left to [`Self::on_peer_removed`].
    /// The start time is reset when the peer connects, but not when it
    /// resumes from hold.
    pub fn on_peer_state_changed(
        &self,
        call_id: CallId,
        peer_address: &str,
        old_state: CallPeerState,
        new_state: CallPeerState,
    ) {
        if new_state == CallPeerState::Disconnected {
            return;
        }
        let now = self.clock.now();
        let Some(mut live) = self.live_calls.get_mut(&call_id) else {
            return;
        };
        let Some(record) = live.record.find_peer_record_mut(peer_address) else {
            return;
        };

        if new_state == CallPeerState::Connected && !old_state.is_on_hold() {
            record.set_start_time(now);
        }
        record.set_state(Some(new_state));
        trace!(%call_id, peer = peer_address, from = %old_state, to = %new_state, "Peer state changed");
    }

    /// The call ended without further detail
    pub async fn on_call_ended(&self, call_id: CallId) -> Option<CallRecord> {
        self.on_call_ended_with(call_id, None, None).await
    }

    /// Finalize the call, hand it to the sink and stop tracking it
    ///
    /// A call that ends while still initializing was never answered: its end
    /// time equals its start time and a normal-clearing cause is kept as the
    /// end reason. Such a call completed on another device is not written
    /// when configured so. Returns the finalized record, or `None` if the
    /// call was not tracked.
    pub async fn on_call_ended_with(
        &self,
        call_id: CallId,
        old_state: Option<CallState>,
        cause: Option<&CallEndCause>,
    ) -> Option<CallRecord> {
        let Some((_, mut live)) = self.live_calls.remove(&call_id) else {
            trace!(%call_id, "End of untracked call");
            return None;
        };
        let now = self.clock.now();
        let mut write = true;

        if old_state == Some(CallState::Initialization) {
            let start = live.record.start_time();
            live.record.set_end_time(start);
            if let Some(cause) = cause.filter(|c| c.is_normal_clearing()) {
                live.record.set_end_reason(cause.reason_code);
                if cause.is_completed_elsewhere() && self.skip_completed_elsewhere {
                    write = false;
                }
            }
        } else {
            // Peers still on the air when the call ends leave with it
            let removed = &live.removed_peers;
            for peer in live.record.peer_records_mut() {
                if !removed.contains(peer.peer_address()) && peer.state().is_some_and(|s| s.is_live()) {
                    peer.set_end_time(Some(now));
                }
            }
            live.record.set_end_time(now);
        }
        live.record.clear_source_call();

        debug!(%call_id, write, peers = live.record.peer_records().len(), "Call ended");
        if write {
            self.sink.write_call(&live.record).await;
        }
        Some(live.record)
    }

    /// Set the secondary address of live peer records matching `peer_address`
    /// and `start`; returns whether any matched
    pub fn update_secondary_address(
        &self,
        start: DateTime<Utc>,
        peer_address: &str,
        secondary: &str,
    ) -> bool {
        let mut found = false;
        for mut live in self.live_calls.iter_mut() {
            for peer in live.record.peer_records_mut() {
                if peer.peer_address() == peer_address && peer.start_time() == start {
                    peer.set_secondary_address(Some(secondary.to_string()));
                    found = true;
                }
            }
        }
        found
    }

    fn fire_peer_record_event(&self, event: CallHistoryPeerRecordEvent) {
        let listeners = self.peer_record_listeners.read().clone();
        for listener in listeners {
            listener.call_peer_record_received(&event);
        }
    }
}

#[async_trait]
impl CallListener for LiveCallTracker {
    async fn incoming_call_received(&self, call: &CallInfo) {
        self.on_incoming_call(call);
    }

    async fn outgoing_call_created(&self, call: &CallInfo) {
        self.on_outgoing_call(call);
    }

    async fn call_ended(&self, call_id: CallId) {
        self.on_call_ended(call_id).await;
    }

    async fn call_state_changed(
        &self,
        call_id: CallId,
        old_state: CallState,
        new_state: CallState,
        cause: Option<&CallEndCause>,
    ) {
        if new_state == CallState::Ended {
            self.on_call_ended_with(call_id, Some(old_state), cause).await;
        }
    }

    async fn call_peer_added(&self, call_id: CallId, peer: &CallPeerInfo) {
        self.on_peer_added(call_id, peer);
    }

    async fn call_peer_removed(&self, call_id: CallId, peer: &CallPeerInfo) {
        self.on_peer_removed(call_id, peer);
    }

    async fn peer_state_changed(
        &self,
        call_id: CallId,
        peer_address: &str,
        old_state: CallPeerState,
        new_state: CallPeerState,
    ) {
        self.on_peer_state_changed(call_id, peer_address, old_state, new_state);
    }
}
