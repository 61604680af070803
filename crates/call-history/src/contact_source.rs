//! Free-text search over call history, for contact search UIs
//!
//! A [`CallHistoryContactQuery`] turns each matching [`CallRecord`] into a
//! [`SourceContact`] labelled `"<peers> <yyyy-MM-dd HH:mm> (<HH:MM:SS>)"`.
//! An empty query lists the most recent calls.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use rvoip_history_store::SearchCancellation;

use crate::persistence::CallHistoryPersistence;
use crate::records::CallRecord;

/// Display name of the call history contact source
pub const CALL_HISTORY_SOURCE_NAME: &str = "Call history";

/// Where a contact query stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactQueryStatus {
    /// Created but not run yet
    Pending,
    Completed,
    Cancelled,
}

/// One search result wrapping a call record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContact {
    pub display_name: String,
    pub label: String,
    pub record: CallRecord,
}

impl SourceContact {
    pub fn from_record(record: CallRecord) -> Self {
        let display_name = record
            .peer_records()
            .first()
            .map(|p| p.display_name().unwrap_or(p.peer_address()).to_string())
            .unwrap_or_default();
        Self {
            label: contact_label(&record),
            display_name,
            record,
        }
    }
}

/// `"<peer addresses> <yyyy-MM-dd HH:mm> (<HH:MM:SS>)"`, times in UTC
pub fn contact_label(record: &CallRecord) -> String {
    let peers = record
        .peer_records()
        .iter()
        .map(|p| p.peer_address())
        .collect::<Vec<_>>()
        .join(", ");
    let duration = record.duration().unwrap_or_else(Duration::zero);
    format!(
        "{} {} ({})",
        peers,
        record.start_time().format("%Y-%m-%d %H:%M"),
        format_duration(duration)
    )
}

/// `HH:MM:SS`; negative durations count as zero
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Creates contact queries over one call history
#[derive(Debug, Clone)]
pub struct CallHistoryContactSource {
    persistence: Arc<CallHistoryPersistence>,
    case_sensitive: bool,
}

impl CallHistoryContactSource {
    pub fn new(persistence: Arc<CallHistoryPersistence>) -> Self {
        Self {
            persistence,
            case_sensitive: false,
        }
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn display_name(&self) -> &'static str {
        CALL_HISTORY_SOURCE_NAME
    }

    /// Prepare a query for at most `count` calls matching `text`
    ///
    /// Whitespace-separated words of `text` must all appear in the peer
    /// addresses of a call. Nothing is searched until
    /// [`CallHistoryContactQuery::run`] is awaited.
    pub fn create_contact_query(&self, text: &str, count: usize) -> CallHistoryContactQuery {
        CallHistoryContactQuery {
            persistence: self.persistence.clone(),
            query_string: text.trim().to_string(),
            max_count: count,
            case_sensitive: self.case_sensitive,
            cancellation: SearchCancellation::new(),
            state: Mutex::new(QueryState {
                status: ContactQueryStatus::Pending,
                contacts: Vec::new(),
            }),
        }
    }
}

#[derive(Debug)]
struct QueryState {
    status: ContactQueryStatus,
    contacts: Vec<SourceContact>,
}

/// A running or finished call history contact search
#[derive(Debug)]
pub struct CallHistoryContactQuery {
    persistence: Arc<CallHistoryPersistence>,
    query_string: String,
    max_count: usize,
    case_sensitive: bool,
    cancellation: SearchCancellation,
    state: Mutex<QueryState>,
}

impl CallHistoryContactQuery {
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Run the search and store its results
    ///
    /// A query cancelled before or during the search ends as
    /// [`ContactQueryStatus::Cancelled`] and keeps what was found so far.
    pub async fn run(&self) -> ContactQueryStatus {
        if self.cancellation.is_cancelled() {
            self.state.lock().status = ContactQueryStatus::Cancelled;
            return ContactQueryStatus::Cancelled;
        }

        let mut records = if self.query_string.is_empty() {
            self.persistence.find_last(self.max_count).await
        } else {
            let keywords: Vec<String> = self
                .query_string
                .split_whitespace()
                .map(str::to_string)
                .collect();
            self.persistence
                .find_by_keywords_cancellable(&keywords, self.case_sensitive, &self.cancellation)
                .await
        };
        records.truncate(self.max_count);

        let status = if self.cancellation.is_cancelled() {
            ContactQueryStatus::Cancelled
        } else {
            ContactQueryStatus::Completed
        };
        debug!(query = %self.query_string, results = records.len(), ?status, "Call history contact query finished");

        let mut state = self.state.lock();
        state.contacts = records.into_iter().map(SourceContact::from_record).collect();
        state.status = status;
        status
    }

    /// Ask the search to stop
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn status(&self) -> ContactQueryStatus {
        self.state.lock().status
    }

    /// Results so far, most recent call first
    pub fn contacts(&self) -> Vec<SourceContact> {
        self.state.lock().contacts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallHistoryConfig;
    use crate::records::{CallDirection, CallPeerRecord, CallPeerState};
    use chrono::{DateTime, Utc};
    use rvoip_history_store::HistoryService;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-05T14:07:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn call(start: DateTime<Utc>, peers: &[&str], seconds: i64) -> CallRecord {
        let mut call = CallRecord::new(CallDirection::In, start);
        for peer in peers {
            let mut record = CallPeerRecord::new(*peer, start);
            record.set_state(Some(CallPeerState::Connected));
            call.peer_records_mut().push(record);
        }
        call.set_end_time(start + Duration::seconds(seconds));
        call
    }

    async fn source_with_calls() -> CallHistoryContactSource {
        let persistence = Arc::new(CallHistoryPersistence::new(
            Arc::new(HistoryService::in_memory()),
            &CallHistoryConfig::default(),
        ));
        persistence
            .write_call_record(&call(t0(), &["sip:alice@example.com"], 65))
            .await
            .unwrap();
        persistence
            .write_call_record(&call(
                t0() + Duration::hours(1),
                &["sip:bob@example.com", "sip:alice@example.com"],
                3725,
            ))
            .await
            .unwrap();
        CallHistoryContactSource::new(persistence)
    }

    #[test]
    fn test_label_format() {
        let record = call(t0(), &["sip:alice@example.com", "+15550100"], 3725);
        assert_eq!(
            contact_label(&record),
            "sip:alice@example.com, +15550100 2024-03-05 14:07 (01:02:05)"
        );
        assert_eq!(format_duration(Duration::seconds(-5)), "00:00:00");
    }

    #[tokio::test]
    async fn test_keyword_query_most_recent_first() {
        let source = source_with_calls().await;
        let query = source.create_contact_query("ALICE", 10);

        assert_eq!(query.status(), ContactQueryStatus::Pending);
        assert_eq!(query.run().await, ContactQueryStatus::Completed);

        let contacts = query.contacts();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].display_name, "sip:bob@example.com");
        assert_eq!(contacts[1].label, "sip:alice@example.com 2024-03-05 14:07 (00:01:05)");
    }

    #[tokio::test]
    async fn test_empty_query_lists_recent_calls() {
        let source = source_with_calls().await;
        let query = source.create_contact_query("  ", 1);
        query.run().await;

        let contacts = query.contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].record.start_time(), t0() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_cancelled_query_does_not_search() {
        let source = source_with_calls().await;
        let query = source.create_contact_query("alice", 10);
        query.cancel();

        assert_eq!(query.run().await, ContactQueryStatus::Cancelled);
        assert!(query.contacts().is_empty());
        assert_eq!(query.status(), ContactQueryStatus::Cancelled);
    }
}
