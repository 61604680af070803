//! Call history service
//!
//! [`CallHistoryService`] is the front door of this crate. It wires a
//! [`LiveCallTracker`] to a [`CallHistoryPersistence`], registers the tracker
//! on telephony providers and exposes the history queries.
//!
//! ```rust
//! use rvoip_call_history::{CallHistoryConfig, CallHistoryService};
//!
//! # async fn example() -> rvoip_call_history::CallHistoryResult<()> {
//! let service = CallHistoryService::from_config(CallHistoryConfig::default())?;
//! let recent = service.find_last(20).await;
//! assert!(recent.is_empty());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{debug, info};

use rvoip_history_store::HistoryService;

use crate::clock::{Clock, SystemClock};
use crate::config::CallHistoryConfig;
use crate::error::CallHistoryResult;
use crate::events::{CallHistoryPeerRecordListener, CallListener, TelephonyProvider};
use crate::persistence::{CallHistoryPersistence, CallHistorySearchProgressListener, MetaContact};
use crate::records::CallRecord;
use crate::tracker::{CallRecordSink, LiveCallTracker};

/// Records calls from telephony providers and answers history queries
pub struct CallHistoryService {
    config: CallHistoryConfig,
    persistence: Arc<CallHistoryPersistence>,
    tracker: Arc<LiveCallTracker>,
    /// The tracker as registered on providers; kept so removal finds the same listener
    call_listener: Arc<dyn CallListener>,
    providers: DashSet<String>,
}

impl std::fmt::Debug for CallHistoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHistoryService")
            .field("config", &self.config)
            .field("persistence", &self.persistence)
            .field("tracker", &self.tracker)
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl CallHistoryService {
    pub fn new(
        persistence: Arc<CallHistoryPersistence>,
        config: CallHistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sink: Arc<dyn CallRecordSink> = persistence.clone();
        let tracker = Arc::new(
            LiveCallTracker::with_clock(sink, clock)
                .with_skip_completed_elsewhere(config.skip_completed_elsewhere),
        );
        let call_listener: Arc<dyn CallListener> = tracker.clone();

        Self {
            config,
            persistence,
            tracker,
            call_listener,
            providers: DashSet::new(),
        }
    }

    /// Service over the store described by `config`
    pub fn from_config(config: CallHistoryConfig) -> CallHistoryResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`Self::from_config`] with an explicit time source
    pub fn with_clock(config: CallHistoryConfig, clock: Arc<dyn Clock>) -> CallHistoryResult<Self> {
        let persistence = Arc::new(CallHistoryPersistence::from_config(&config)?);
        info!(
            scope = %config.history_scope,
            storage = ?config.store.storage,
            "Call history service created"
        );
        Ok(Self::new(persistence, config, clock))
    }

    /// Service keeping its history in memory
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let config = CallHistoryConfig::default();
        let persistence = Arc::new(CallHistoryPersistence::new(
            Arc::new(HistoryService::in_memory()),
            &config,
        ));
        Self::new(persistence, config, clock)
    }

    pub fn config(&self) -> &CallHistoryConfig {
        &self.config
    }

    pub fn persistence(&self) -> &Arc<CallHistoryPersistence> {
        &self.persistence
    }

    pub fn tracker(&self) -> &Arc<LiveCallTracker> {
        &self.tracker
    }

    /// Start recording calls from `provider` if it supports basic telephony
    pub fn handle_provider_added(&self, provider: &dyn TelephonyProvider) {
        if !provider.supports_basic_telephony() {
            debug!(
                account = provider.account_id(),
                protocol = provider.protocol_name(),
                "Provider has no basic telephony, not recording calls"
            );
            return;
        }
        if !self.providers.insert(provider.account_id().to_string()) {
            return;
        }
        provider.add_call_listener(self.call_listener.clone());
        info!(
            account = provider.account_id(),
            protocol = provider.protocol_name(),
            "Recording call history"
        );
    }

    /// Stop recording calls from `provider`
    pub fn handle_provider_removed(&self, provider: &dyn TelephonyProvider) {
        if !provider.supports_basic_telephony() {
            return;
        }
        if self.providers.remove(provider.account_id()).is_none() {
            return;
        }
        provider.remove_call_listener(&self.call_listener);
        info!(account = provider.account_id(), "Stopped recording call history");
    }

    /// Attach to every provider already registered
    pub fn start(&self, providers: &[Arc<dyn TelephonyProvider>]) {
        for provider in providers {
            self.handle_provider_added(provider.as_ref());
        }
        debug!(providers = self.providers.len(), "Call history service started");
    }

    pub fn stop(&self, providers: &[Arc<dyn TelephonyProvider>]) {
        for provider in providers {
            self.handle_provider_removed(provider.as_ref());
        }
        debug!("Call history service stopped");
    }

    /// Number of providers calls are recorded from
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn find_by_start_date(&self, start: DateTime<Utc>) -> Vec<CallRecord> {
        self.persistence.find_by_start_date(start).await
    }

    pub async fn find_by_end_date(&self, end: DateTime<Utc>) -> Vec<CallRecord> {
        self.persistence.find_by_end_date(end).await
    }

    pub async fn find_by_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CallRecord> {
        self.persistence.find_by_period(start, end).await
    }

    pub async fn find_last(&self, count: usize) -> Vec<CallRecord> {
        self.persistence.find_last(count).await
    }

    pub async fn find_by_peer(&self, address: &str, count: usize) -> Vec<CallRecord> {
        self.persistence.find_by_peer(address, count).await
    }

    pub async fn find_by_keywords(&self, keywords: &[String], case_sensitive: bool) -> Vec<CallRecord> {
        self.persistence.find_by_keywords(keywords, case_sensitive).await
    }

    pub async fn find_by_period_with_keywords(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        keywords: &[String],
        case_sensitive: bool,
    ) -> Vec<CallRecord> {
        self.persistence
            .find_by_period_with_keywords(start, end, keywords, case_sensitive)
            .await
    }

    pub async fn find_by_start_date_for(
        &self,
        contact: &MetaContact,
        start: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        self.persistence.find_by_start_date_for(contact, start).await
    }

    pub async fn find_by_end_date_for(
        &self,
        contact: &MetaContact,
        end: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        self.persistence.find_by_end_date_for(contact, end).await
    }

    pub async fn find_by_period_for(
        &self,
        contact: &MetaContact,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        self.persistence.find_by_period_for(contact, start, end).await
    }

    pub async fn find_last_for(
        &self,
        contact: &MetaContact,
        count: usize,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        self.persistence.find_last_for(contact, count).await
    }

    pub fn add_search_progress_listener(&self, listener: Arc<dyn CallHistorySearchProgressListener>) {
        self.persistence.add_search_progress_listener(listener);
    }

    pub fn remove_search_progress_listener(&self, listener: &Arc<dyn CallHistorySearchProgressListener>) {
        self.persistence.remove_search_progress_listener(listener);
    }

    pub fn add_call_history_record_listener(&self, listener: Arc<dyn CallHistoryPeerRecordListener>) {
        self.tracker.add_peer_record_listener(listener);
    }

    pub fn remove_call_history_record_listener(&self, listener: &Arc<dyn CallHistoryPeerRecordListener>) {
        self.tracker.remove_peer_record_listener(listener);
    }

    /// Set the secondary address of the peer `peer_address` that started at `start`
    ///
    /// A live call is updated in place. Otherwise the stored record is
    /// rewritten. Returns whether a record was found.
    pub async fn update_call_record_peer_secondary_address(
        &self,
        start: DateTime<Utc>,
        peer_address: &str,
        secondary: &str,
    ) -> CallHistoryResult<bool> {
        if self
            .tracker
            .update_secondary_address(start, peer_address, secondary)
        {
            debug!(peer = peer_address, "Updated secondary address of live call");
            return Ok(true);
        }
        self.persistence
            .update_peer_secondary_address(start, peer_address, secondary)
            .await
    }

    /// Delete every stored call history
    pub async fn erase_locally_stored_history(&self) -> CallHistoryResult<()> {
        self.persistence.erase_locally_stored_history().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{CallId, CallInfo, CallPeerInfo};
    use crate::records::CallPeerState;
    use chrono::Duration;
    use parking_lot::Mutex;

    struct FakeProvider {
        account: String,
        telephony: bool,
        listeners: Mutex<Vec<Arc<dyn CallListener>>>,
    }

    impl FakeProvider {
        fn new(account: &str, telephony: bool) -> Self {
            Self {
                account: account.to_string(),
                telephony,
                listeners: Mutex::new(Vec::new()),
            }
        }

        fn listener_count(&self) -> usize {
            self.listeners.lock().len()
        }
    }

    impl TelephonyProvider for FakeProvider {
        fn protocol_name(&self) -> &str {
            "SIP"
        }

        fn account_id(&self) -> &str {
            &self.account
        }

        fn supports_basic_telephony(&self) -> bool {
            self.telephony
        }

        fn add_call_listener(&self, listener: Arc<dyn CallListener>) {
            self.listeners.lock().push(listener);
        }

        fn remove_call_listener(&self, listener: &Arc<dyn CallListener>) {
            self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_registers_only_on_telephony_providers() {
        let service = CallHistoryService::in_memory(Arc::new(ManualClock::new(t0())));
        let sip = Arc::new(FakeProvider::new("sip:me@example.com", true));
        let chat = Arc::new(FakeProvider::new("xmpp:me@example.com", false));
        let providers: Vec<Arc<dyn TelephonyProvider>> = vec![sip.clone(), chat.clone()];

        service.start(&providers);
        service.start(&providers);
        assert_eq!(sip.listener_count(), 1);
        assert_eq!(chat.listener_count(), 0);
        assert_eq!(service.provider_count(), 1);

        service.stop(&providers);
        assert_eq!(sip.listener_count(), 0);
        assert_eq!(service.provider_count(), 0);
    }

    #[tokio::test]
    async fn test_events_through_provider_listener_are_persisted() {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = CallHistoryService::in_memory(clock.clone());
        let provider = FakeProvider::new("sip:me@example.com", true);
        service.handle_provider_added(&provider);

        let listener = provider.listeners.lock()[0].clone();
        let call_id = CallId::new();
        listener
            .outgoing_call_created(&CallInfo::new(call_id).with_account_id("sip:me@example.com"))
            .await;
        clock.advance(Duration::seconds(1));
        listener
            .call_peer_added(
                call_id,
                &CallPeerInfo::new("sip:alice@example.com", CallPeerState::Connecting),
            )
            .await;
        clock.advance(Duration::seconds(5));
        listener.call_ended(call_id).await;

        let calls = service.find_last(10).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].account_id(), Some("sip:me@example.com"));
        assert_eq!(calls[0].end_time(), Some(t0() + Duration::seconds(6)));
    }

    #[tokio::test]
    async fn test_secondary_address_prefers_live_call() {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = CallHistoryService::in_memory(clock.clone());
        let tracker = service.tracker().clone();

        let call_id = CallId::new();
        tracker.on_incoming_call(
            &CallInfo::new(call_id).with_peer(CallPeerInfo::new("+15550100", CallPeerState::IncomingCall)),
        );

        let updated = service
            .update_call_record_peer_secondary_address(t0(), "+15550100", "sip:bob@example.com")
            .await
            .unwrap();
        assert!(updated);

        let live = tracker.snapshot(call_id).unwrap();
        assert_eq!(
            live.peer_records()[0].secondary_address(),
            Some("sip:bob@example.com")
        );

        clock.advance(Duration::seconds(3));
        tracker.on_call_ended(call_id).await;

        // Already set, so the stored record no longer matches
        let updated = service
            .update_call_record_peer_secondary_address(t0(), "+15550100", "sip:other@example.com")
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_secondary_address_rewrites_stored_call() {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = CallHistoryService::in_memory(clock.clone());
        let tracker = service.tracker().clone();

        let call_id = CallId::new();
        tracker.on_incoming_call(
            &CallInfo::new(call_id).with_peer(CallPeerInfo::new("+15550100", CallPeerState::IncomingCall)),
        );
        clock.advance(Duration::seconds(3));
        tracker.on_call_ended(call_id).await;
        let window = (t0(), t0() + Duration::minutes(1));
        assert_eq!(service.find_by_period(window.0, window.1).await.len(), 1);

        let updated = service
            .update_call_record_peer_secondary_address(t0(), "+15550100", "sip:bob@example.com")
            .await
            .unwrap();
        assert!(updated);

        let calls = service.find_last(1).await;
        assert_eq!(
            calls[0].peer_records()[0].secondary_address(),
            Some("sip:bob@example.com")
        );

        // The rewritten call stays filed under its own end time
        let calls = service.find_by_period(window.0, window.1).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].peer_records()[0].secondary_address(), Some("sip:bob@example.com"));
    }

    #[tokio::test]
    async fn test_erase_removes_history() {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = CallHistoryService::in_memory(clock.clone());
        let tracker = service.tracker().clone();

        let call_id = CallId::new();
        tracker.on_outgoing_call(&CallInfo::new(call_id));
        clock.advance(Duration::seconds(1));
        tracker.on_call_ended(call_id).await;
        assert_eq!(service.find_last(10).await.len(), 1);

        service.erase_locally_stored_history().await.unwrap();
        assert!(service.find_last(10).await.is_empty());
    }
}
