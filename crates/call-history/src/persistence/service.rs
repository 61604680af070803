//! Call history persistence adapter
//!
//! [`CallHistoryPersistence`] stores finished [`CallRecord`]s in histories
//! named `[scope, local, remote]` and answers the call history queries.
//!
//! Store failures never reach callers of the query methods: they are logged
//! and the query returns whatever could be read. Records that cannot be
//! decoded are skipped. Every result list is ordered by [`compare_by_recency`].

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use rvoip_history_store::{
    History, HistoryId, HistoryReader, HistoryRecord, HistorySearchProgressListener, HistoryService,
    SearchCancellation, StoreResult,
};

use super::codec::{
    decode_call_record, encode_call_record, encode_list_entry, record_structure,
    SecondaryAddressUpdater, PARTICIPANT_IDS,
};
use super::progress::{CallHistorySearchProgressListener, SearchProgressWrapper};
use crate::config::CallHistoryConfig;
use crate::error::{CallHistoryError, CallHistoryResult};
use crate::records::CallRecord;
use crate::tracker::CallRecordSink;

/// A contact known under several addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaContact {
    pub display_name: String,
    pub addresses: Vec<String>,
}

impl MetaContact {
    pub fn new(display_name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            display_name: display_name.into(),
            addresses,
        }
    }
}

/// Most recent first: descending start, then descending end, then peer addresses
pub fn compare_by_recency(a: &CallRecord, b: &CallRecord) -> Ordering {
    b.start_time()
        .cmp(&a.start_time())
        .then_with(|| b.end_time().cmp(&a.end_time()))
        .then_with(|| {
            a.peer_records()
                .iter()
                .map(|p| p.peer_address())
                .cmp(b.peer_records().iter().map(|p| p.peer_address()))
        })
}

/// One reader query, run the same way on every searched history
#[derive(Debug, Clone, Copy)]
enum Query<'a> {
    StartDate(DateTime<Utc>),
    EndDate(DateTime<Utc>),
    Period(DateTime<Utc>, DateTime<Utc>),
    Keywords(&'a [String], bool),
    PeriodWithKeywords(DateTime<Utc>, DateTime<Utc>, &'a [String], bool),
}

impl Query<'_> {
    async fn run(&self, reader: &HistoryReader) -> StoreResult<Vec<HistoryRecord>> {
        match *self {
            Query::StartDate(start) => reader.find_by_start_date(start).await,
            Query::EndDate(end) => reader.find_by_end_date(end).await,
            Query::Period(start, end) => reader.find_by_period(start, end).await,
            Query::Keywords(keywords, case_sensitive) => {
                reader
                    .find_by_keywords(keywords, PARTICIPANT_IDS, case_sensitive)
                    .await
            }
            Query::PeriodWithKeywords(start, end, keywords, case_sensitive) => {
                reader
                    .find_by_period_with_keywords(start, end, keywords, PARTICIPANT_IDS, case_sensitive)
                    .await
            }
        }
    }
}

/// Writes finished calls and runs call history queries
///
/// Searches that report progress run one at a time: the registered
/// listeners follow a single search from 0 to 100 before the next begins.
pub struct CallHistoryPersistence {
    store: Arc<HistoryService>,
    scope: String,
    default_contact_id: String,
    keyword_case_sensitive: bool,
    progress_listeners: RwLock<Vec<Arc<SearchProgressWrapper>>>,
    search_lock: Mutex<()>,
}

impl std::fmt::Debug for CallHistoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHistoryPersistence")
            .field("scope", &self.scope)
            .field("default_contact_id", &self.default_contact_id)
            .field("keyword_case_sensitive", &self.keyword_case_sensitive)
            .field("progress_listeners", &self.progress_listeners.read().len())
            .finish()
    }
}

impl CallHistoryPersistence {
    pub fn new(store: Arc<HistoryService>, config: &CallHistoryConfig) -> Self {
        Self {
            store,
            scope: config.history_scope.clone(),
            default_contact_id: config.default_contact_id.clone(),
            keyword_case_sensitive: config.keyword_case_sensitive,
            progress_listeners: RwLock::new(Vec::new()),
            search_lock: Mutex::new(()),
        }
    }

    /// Adapter over a store built from `config.store`
    pub fn from_config(config: &CallHistoryConfig) -> CallHistoryResult<Self> {
        config.validate()?;
        let store = HistoryService::from_config(&config.store)?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<HistoryService> {
        &self.store
    }

    /// Id of the history shared by `local` and `remote`; absent or empty parts use the default id
    pub fn history_id(&self, local: Option<&str>, remote: Option<&str>) -> CallHistoryResult<HistoryId> {
        let pick = |id: Option<&str>| {
            id.filter(|s| !s.is_empty())
                .unwrap_or(&self.default_contact_id)
                .to_string()
        };
        Ok(HistoryId::create_from_raw_id([
            self.scope.clone(),
            pick(local),
            pick(remote),
        ])?)
    }

    /// Open (creating if needed) the history shared by `local` and `remote`
    pub async fn history(&self, local: Option<&str>, remote: Option<&str>) -> CallHistoryResult<Arc<History>> {
        let id = self.history_id(local, remote)?;
        Ok(self.store.create_history(id, record_structure()).await?)
    }

    /// Append a finished call to the default history
    pub async fn write_call_record(&self, record: &CallRecord) -> CallHistoryResult<()> {
        self.write_call_to(record, None, None).await
    }

    /// Append a finished call to the history shared by `local` and `remote`
    ///
    /// The record is stamped with the call's end time.
    pub async fn write_call_to(
        &self,
        record: &CallRecord,
        local: Option<&str>,
        remote: Option<&str>,
    ) -> CallHistoryResult<()> {
        let values = encode_call_record(record)?;
        let timestamp = record
            .end_time()
            .ok_or_else(|| CallHistoryError::invalid_record("call has no end time"))?;
        let history = self.history(local, remote).await?;
        history.writer().add_record(values, timestamp).await?;
        debug!(
            history = %history.id(),
            direction = %record.direction(),
            peers = record.peer_records().len(),
            "Call record written"
        );
        Ok(())
    }

    /// Register a listener for the progress of every following search
    pub fn add_search_progress_listener(&self, listener: Arc<dyn CallHistorySearchProgressListener>) {
        let mut wrappers = self.progress_listeners.write();
        if !wrappers.iter().any(|w| Arc::ptr_eq(w.listener(), &listener)) {
            wrappers.push(Arc::new(SearchProgressWrapper::new(listener)));
        }
    }

    pub fn remove_search_progress_listener(&self, listener: &Arc<dyn CallHistorySearchProgressListener>) {
        self.progress_listeners
            .write()
            .retain(|w| !Arc::ptr_eq(w.listener(), listener));
    }

    pub fn search_progress_listener_count(&self) -> usize {
        self.progress_listeners.read().len()
    }

    /// Calls written at or after `start`
    pub async fn find_by_start_date(&self, start: DateTime<Utc>) -> Vec<CallRecord> {
        self.search_default(Query::StartDate(start), None).await
    }

    /// Calls written before `end`
    pub async fn find_by_end_date(&self, end: DateTime<Utc>) -> Vec<CallRecord> {
        self.search_default(Query::EndDate(end), None).await
    }

    /// Calls written in `[start, end)`
    pub async fn find_by_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CallRecord> {
        self.search_default(Query::Period(start, end), None).await
    }

    /// Calls in which some peer address contains every keyword
    pub async fn find_by_keywords(&self, keywords: &[String], case_sensitive: bool) -> Vec<CallRecord> {
        self.search_default(Query::Keywords(keywords, case_sensitive), None)
            .await
    }

    /// Same as [`Self::find_by_keywords`], stopping early once `cancellation` is set
    pub async fn find_by_keywords_cancellable(
        &self,
        keywords: &[String],
        case_sensitive: bool,
        cancellation: &SearchCancellation,
    ) -> Vec<CallRecord> {
        self.search_default(Query::Keywords(keywords, case_sensitive), Some(cancellation))
            .await
    }

    /// Calls written in `[start, end)` whose peer addresses contain every keyword
    pub async fn find_by_period_with_keywords(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        keywords: &[String],
        case_sensitive: bool,
    ) -> Vec<CallRecord> {
        self.search_default(
            Query::PeriodWithKeywords(start, end, keywords, case_sensitive),
            None,
        )
        .await
    }

    /// The `count` most recently written calls; reports no progress
    pub async fn find_last(&self, count: usize) -> Vec<CallRecord> {
        let history = match self.history(None, None).await {
            Ok(history) => history,
            Err(e) => {
                error!(error = %e, "Failed to open call history");
                return Vec::new();
            }
        };
        match history.reader().find_last(count).await {
            Ok(records) => decode_sorted(records),
            Err(e) => {
                warn!(history = %history.id(), error = %e, "Call history query failed");
                Vec::new()
            }
        }
    }

    /// The `count` most recent calls with a peer whose address is `address`
    ///
    /// The store is searched for the stored form of `address` inside the
    /// peer list, then only calls with an exactly matching peer are kept.
    /// Both steps compare case-insensitively unless keyword search is
    /// configured case-sensitive.
    pub async fn find_by_peer(&self, address: &str, count: usize) -> Vec<CallRecord> {
        let case_sensitive = self.keyword_case_sensitive;
        let keywords = [encode_list_entry(address)];
        let mut calls = self
            .search_default(Query::Keywords(&keywords, case_sensitive), None)
            .await;

        let wanted = if case_sensitive {
            address.to_string()
        } else {
            address.to_lowercase()
        };
        calls.retain(|call| {
            call.peer_records().iter().any(|p| {
                if case_sensitive {
                    p.peer_address() == wanted
                } else {
                    p.peer_address().to_lowercase() == wanted
                }
            })
        });
        calls.truncate(count);
        calls
    }

    /// Calls written in `[start, end)` across several histories
    ///
    /// Registered progress listeners see one 0..=100 stream for the whole
    /// search.
    pub async fn find_by_period_across(
        &self,
        history_ids: &[HistoryId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<CallRecord> {
        let mut histories = Vec::with_capacity(history_ids.len());
        for id in history_ids {
            match self.store.create_history(id.clone(), record_structure()).await {
                Ok(history) => histories.push(history),
                Err(e) => error!(history = %id, error = %e, "Failed to open call history"),
            }
        }
        self.search(&histories, Query::Period(start, end), None).await
    }

    pub async fn find_by_start_date_for(
        &self,
        _contact: &MetaContact,
        _start: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        Err(CallHistoryError::not_implemented("call history by meta contact"))
    }

    pub async fn find_by_end_date_for(
        &self,
        _contact: &MetaContact,
        _end: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        Err(CallHistoryError::not_implemented("call history by meta contact"))
    }

    pub async fn find_by_period_for(
        &self,
        _contact: &MetaContact,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        Err(CallHistoryError::not_implemented("call history by meta contact"))
    }

    pub async fn find_last_for(
        &self,
        _contact: &MetaContact,
        _count: usize,
    ) -> CallHistoryResult<Vec<CallRecord>> {
        Err(CallHistoryError::not_implemented("call history by meta contact"))
    }

    /// Delete every call history under the configured scope
    pub async fn erase_locally_stored_history(&self) -> CallHistoryResult<()> {
        let scope = HistoryId::create_from_raw_id([self.scope.clone()])?;
        self.store.purge_locally_stored_history(&scope).await?;
        Ok(())
    }

    /// Set the secondary address of a stored peer that started at `start`
    ///
    /// Returns whether a stored record was rewritten.
    pub async fn update_peer_secondary_address(
        &self,
        start: DateTime<Utc>,
        peer_address: &str,
        secondary: &str,
    ) -> CallHistoryResult<bool> {
        let updater = SecondaryAddressUpdater {
            start,
            peer_address: peer_address.to_string(),
            secondary: secondary.to_string(),
        };
        let history = self.history(None, None).await?;
        Ok(history.writer().update_record(&updater).await?)
    }

    async fn search_default(
        &self,
        query: Query<'_>,
        cancellation: Option<&SearchCancellation>,
    ) -> Vec<CallRecord> {
        match self.history(None, None).await {
            Ok(history) => self.search(&[history], query, cancellation).await,
            Err(e) => {
                error!(error = %e, "Failed to open call history");
                Vec::new()
            }
        }
    }

    async fn search(
        &self,
        histories: &[Arc<History>],
        query: Query<'_>,
        cancellation: Option<&SearchCancellation>,
    ) -> Vec<CallRecord> {
        let _running = self.search_lock.lock().await;
        let attached = self.attach_progress(histories);

        let mut records = Vec::new();
        for history in histories {
            let reader = match cancellation {
                Some(token) => history.reader().with_cancellation(token.clone()),
                None => history.reader().clone(),
            };
            match query.run(&reader).await {
                Ok(found) => records.extend(found),
                Err(e) => warn!(history = %history.id(), error = %e, "Call history query failed"),
            }
        }

        self.detach_progress(histories, &attached);
        decode_sorted(records)
    }

    /// Point every registered listener at `histories` for one search
    fn attach_progress(&self, histories: &[Arc<History>]) -> Vec<Arc<SearchProgressWrapper>> {
        let wrappers = self.progress_listeners.read().clone();
        for wrapper in &wrappers {
            wrapper.clear();
            wrapper.set_contact_count(histories.len());
            let listener: Arc<dyn HistorySearchProgressListener> = wrapper.clone();
            for history in histories {
                history.reader().add_search_progress_listener(listener.clone());
            }
        }
        wrappers
    }

    fn detach_progress(&self, histories: &[Arc<History>], wrappers: &[Arc<SearchProgressWrapper>]) {
        for wrapper in wrappers {
            let listener: Arc<dyn HistorySearchProgressListener> = wrapper.clone();
            for history in histories {
                history.reader().remove_search_progress_listener(&listener);
            }
            wrapper.clear();
        }
    }
}

fn decode_sorted(records: Vec<HistoryRecord>) -> Vec<CallRecord> {
    let mut calls: Vec<CallRecord> = records
        .iter()
        .filter_map(|record| match decode_call_record(record) {
            Ok(call) => Some(call),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable call record");
                None
            }
        })
        .collect();
    calls.sort_by(compare_by_recency);
    calls
}

#[async_trait]
impl CallRecordSink for CallHistoryPersistence {
    async fn write_call(&self, record: &CallRecord) {
        if let Err(e) = self.write_call_record(record).await {
            error!(error = %e, start = %record.start_time(), "Failed to write call record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::progress::CallHistoryProgressEvent;
    use crate::records::{CallDirection, CallPeerRecord, CallPeerState};
    use chrono::Duration;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn persistence() -> CallHistoryPersistence {
        CallHistoryPersistence::new(Arc::new(HistoryService::in_memory()), &CallHistoryConfig::default())
    }

    fn finished_call(start: DateTime<Utc>, peers: &[&str]) -> CallRecord {
        let mut call = CallRecord::new(CallDirection::Out, start);
        for peer in peers {
            let mut record = CallPeerRecord::new(*peer, start);
            record.set_state(Some(CallPeerState::Connected));
            call.peer_records_mut().push(record);
        }
        call.set_end_time(start + Duration::seconds(30));
        call
    }

    struct Recorder(Mutex<Vec<i32>>);

    impl CallHistorySearchProgressListener for Recorder {
        fn progress_changed(&self, event: &CallHistoryProgressEvent) {
            self.0.lock().push(event.progress);
        }
    }

    #[tokio::test]
    async fn test_find_by_period_is_most_recent_first() {
        let persistence = persistence();
        for minutes in [0, 10, 20] {
            let call = finished_call(t0() + Duration::minutes(minutes), &["sip:alice@example.com"]);
            persistence.write_call_record(&call).await.unwrap();
        }

        let calls = persistence
            .find_by_period(t0(), t0() + Duration::hours(1))
            .await;
        let starts: Vec<_> = calls.iter().map(|c| c.start_time()).collect();

        assert_eq!(
            starts,
            vec![
                t0() + Duration::minutes(20),
                t0() + Duration::minutes(10),
                t0()
            ]
        );
    }

    #[tokio::test]
    async fn test_find_by_peer_filters_partial_matches() {
        let persistence = persistence();
        persistence
            .write_call_record(&finished_call(t0(), &["41234"]))
            .await
            .unwrap();
        persistence
            .write_call_record(&finished_call(t0() + Duration::minutes(1), &["123", "555"]))
            .await
            .unwrap();

        let substring = persistence.find_by_keywords(&["123".to_string()], false).await;
        assert_eq!(substring.len(), 2);

        let exact = persistence.find_by_peer("123", 10).await;
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].peer_records()[0].peer_address(), "123");

        assert!(persistence.find_by_peer("123", 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_peer_matches_stored_form_of_address() {
        let persistence = persistence();
        persistence
            .write_call_record(&finished_call(t0(), &["Smith, J", "sip:x@example.com"]))
            .await
            .unwrap();
        persistence
            .write_call_record(&finished_call(t0() + Duration::minutes(1), &["say \"hi\""]))
            .await
            .unwrap();
        persistence
            .write_call_record(&finished_call(t0() + Duration::minutes(2), &["ÉLODIE@example.com"]))
            .await
            .unwrap();

        assert_eq!(persistence.find_by_peer("Smith, J", 10).await.len(), 1);
        assert_eq!(persistence.find_by_peer("smith, j", 10).await.len(), 1);
        assert_eq!(persistence.find_by_peer("say \"hi\"", 10).await.len(), 1);

        let calls = persistence.find_by_peer("élodie@example.com", 10).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].peer_records()[0].peer_address(), "ÉLODIE@example.com");
    }

    #[tokio::test]
    async fn test_find_last_returns_newest() {
        let persistence = persistence();
        for minutes in 0..5 {
            let call = finished_call(t0() + Duration::minutes(minutes), &["sip:bob@example.com"]);
            persistence.write_call_record(&call).await.unwrap();
        }

        let calls = persistence.find_last(2).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].start_time(), t0() + Duration::minutes(4));
        assert_eq!(calls[1].start_time(), t0() + Duration::minutes(3));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unfinished_call_is_not_written() {
        let persistence = persistence();
        let call = CallRecord::new(CallDirection::In, t0());

        assert!(persistence.write_call_record(&call).await.is_err());
        // The sink swallows the failure
        persistence.write_call(&call).await;
        assert!(logs_contain("Failed to write call record"));
        assert!(persistence.find_last(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_meta_contact_queries_are_not_implemented() {
        let persistence = persistence();
        let contact = MetaContact::new("Alice", vec!["sip:alice@example.com".into()]);

        let err = persistence.find_last_for(&contact, 5).await.unwrap_err();
        assert_eq!(err.category(), "unsupported");
        assert!(persistence.find_by_start_date_for(&contact, t0()).await.is_err());
        assert!(persistence.find_by_end_date_for(&contact, t0()).await.is_err());
        assert!(persistence
            .find_by_period_for(&contact, t0(), t0())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_progress_listener_registration_and_stream() {
        let persistence = persistence();
        persistence
            .write_call_record(&finished_call(t0(), &["sip:carol@example.com"]))
            .await
            .unwrap();

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listener: Arc<dyn CallHistorySearchProgressListener> = recorder.clone();
        persistence.add_search_progress_listener(listener.clone());
        persistence.add_search_progress_listener(listener.clone());
        assert_eq!(persistence.search_progress_listener_count(), 1);

        persistence.find_by_start_date(t0()).await;
        let seen = recorder.0.lock().clone();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));

        // Listeners are detached from the reader after the search
        let history = persistence.history(None, None).await.unwrap();
        assert_eq!(history.reader().search_progress_listener_count(), 0);

        persistence.remove_search_progress_listener(&listener);
        assert_eq!(persistence.search_progress_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_history_id_falls_back_to_default() {
        let persistence = persistence();
        let id = persistence.history_id(None, Some("")).unwrap();
        assert_eq!(id.to_string(), "callhistory/default/default");

        let id = persistence
            .history_id(Some("sip:me@example.com"), Some("sip:alice@example.com"))
            .unwrap();
        assert_eq!(id.to_string(), "callhistory/sip:me@example.com/sip:alice@example.com");
    }

    #[test]
    fn test_equal_starts_break_ties_on_end_then_peers() {
        let early_end = finished_call(t0(), &["b"]);
        let mut late_end = finished_call(t0(), &["a"]);
        late_end.set_end_time(t0() + Duration::minutes(5));
        let same_end = finished_call(t0(), &["a"]);

        let mut calls = vec![early_end.clone(), late_end.clone(), same_end.clone()];
        calls.sort_by(compare_by_recency);

        assert_eq!(calls[0], late_end);
        assert_eq!(calls[1], same_end);
        assert_eq!(calls[2], early_end);
    }
}
