//! Queries over one history
//!
//! Every query except the "last N" family walks all segments in order and
//! reports progress to the registered [`HistorySearchProgressListener`]s:
//! [`PROGRESS_MINIMUM_VALUE`] first, then a step after each examined record,
//! then [`PROGRESS_MAXIMUM_VALUE`] if the steps did not already reach it.
//! Results are returned oldest first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::id::HistoryId;
use crate::progress::{
    HistorySearchProgressListener, ProgressEvent, ProgressListeners, SearchCancellation,
    PROGRESS_MAXIMUM_VALUE, PROGRESS_MINIMUM_VALUE,
};
use crate::record::HistoryRecord;
use crate::storage::RecordStorage;

/// Keyword restriction applied to one field of each record
#[derive(Debug, Clone)]
struct KeywordFilter<'a> {
    keywords: &'a [String],
    field: &'a str,
    case_sensitive: bool,
}

impl KeywordFilter<'_> {
    /// A record matches when it has the field and the field contains every keyword
    fn matches(&self, record: &HistoryRecord) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let Some(value) = record.value(self.field) else {
            return false;
        };

        if self.case_sensitive {
            self.keywords.iter().all(|k| value.contains(k.as_str()))
        } else {
            let value = value.to_lowercase();
            self.keywords
                .iter()
                .all(|k| value.contains(&k.to_lowercase()))
        }
    }
}

/// Start-inclusive, end-exclusive period check; a missing bound is open
fn is_in_period(
    timestamp: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.map_or(true, |s| s <= timestamp) && end.map_or(true, |e| timestamp < e)
}

/// Read access to one history
///
/// Cloning is cheap and clones share the listener registry.
#[derive(Clone)]
pub struct HistoryReader {
    history_id: HistoryId,
    storage: Arc<dyn RecordStorage>,
    listeners: Arc<ProgressListeners>,
    cancellation: Option<SearchCancellation>,
}

impl std::fmt::Debug for HistoryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryReader")
            .field("history_id", &self.history_id)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl HistoryReader {
    pub(crate) fn new(history_id: HistoryId, storage: Arc<dyn RecordStorage>) -> Self {
        Self {
            history_id,
            storage,
            listeners: Arc::new(ProgressListeners::default()),
            cancellation: None,
        }
    }

    /// A reader whose searches stop once `token` is cancelled
    pub fn with_cancellation(&self, token: SearchCancellation) -> Self {
        Self {
            cancellation: Some(token),
            ..self.clone()
        }
    }

    pub fn history_id(&self) -> &HistoryId {
        &self.history_id
    }

    pub fn add_search_progress_listener(&self, listener: Arc<dyn HistorySearchProgressListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_search_progress_listener(&self, listener: &Arc<dyn HistorySearchProgressListener>) {
        self.listeners.remove(listener);
    }

    pub fn search_progress_listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Records written at or after `start`
    pub async fn find_by_start_date(&self, start: DateTime<Utc>) -> StoreResult<Vec<HistoryRecord>> {
        self.find(Some(start), None, None).await
    }

    /// Records written before `end`
    pub async fn find_by_end_date(&self, end: DateTime<Utc>) -> StoreResult<Vec<HistoryRecord>> {
        self.find(None, Some(end), None).await
    }

    /// Records written in `[start, end)`
    pub async fn find_by_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        self.find(Some(start), Some(end), None).await
    }

    /// Records whose `field` contains `keyword`
    pub async fn find_by_keyword(
        &self,
        keyword: &str,
        field: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<HistoryRecord>> {
        self.find_by_keywords(&[keyword.to_string()], field, case_sensitive)
            .await
    }

    /// Records whose `field` contains every one of `keywords`
    pub async fn find_by_keywords(
        &self,
        keywords: &[String],
        field: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let filter = KeywordFilter {
            keywords,
            field,
            case_sensitive,
        };
        self.find(None, None, Some(&filter)).await
    }

    /// Records written in `[start, end)` whose `field` contains every keyword
    pub async fn find_by_period_with_keywords(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        keywords: &[String],
        field: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let filter = KeywordFilter {
            keywords,
            field,
            case_sensitive,
        };
        self.find(Some(start), Some(end), Some(&filter)).await
    }

    /// The `count` most recently appended records, oldest first
    ///
    /// Reads segments newest first and stops once enough records are found.
    /// No progress is reported.
    pub async fn find_last(&self, count: usize) -> StoreResult<Vec<HistoryRecord>> {
        self.find_last_matching(count, None).await
    }

    /// The `count` most recently appended records whose `field` contains every keyword
    pub async fn find_last_with_keywords(
        &self,
        count: usize,
        keywords: &[String],
        field: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let filter = KeywordFilter {
            keywords,
            field,
            case_sensitive,
        };
        self.find_last_matching(count, Some(&filter)).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(SearchCancellation::is_cancelled)
    }

    async fn find_last_matching(
        &self,
        count: usize,
        filter: Option<&KeywordFilter<'_>>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let mut found = Vec::new();
        if count == 0 {
            return Ok(found);
        }

        let segments = self.storage.segment_count().await?;
        for index in (0..segments).rev() {
            if self.is_cancelled() {
                break;
            }
            let records = match self.storage.load_segment(index).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(history = %self.history_id, segment = index, error = %e, "Skipping unreadable segment");
                    continue;
                }
            };

            for record in records.into_iter().rev() {
                if filter.map_or(true, |f| f.matches(&record)) {
                    found.push(record);
                    if found.len() == count {
                        break;
                    }
                }
            }
            if found.len() == count {
                break;
            }
        }

        found.reverse();
        found.sort_by_key(|r| r.timestamp);
        Ok(found)
    }

    async fn find(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        filter: Option<&KeywordFilter<'_>>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let keywords = filter.map(|f| f.keywords.to_vec()).unwrap_or_default();
        let fire = |progress: i32| {
            self.listeners.fire(&ProgressEvent {
                start_date: start,
                end_date: end,
                keywords: keywords.clone(),
                progress,
            })
        };

        let segments = self.storage.segment_count().await?;
        let segment_step = if segments == 0 {
            f64::from(PROGRESS_MAXIMUM_VALUE)
        } else {
            f64::from(PROGRESS_MAXIMUM_VALUE) / segments as f64
        };
        let mut current = f64::from(PROGRESS_MINIMUM_VALUE);
        let mut found = Vec::new();

        fire(PROGRESS_MINIMUM_VALUE);

        for index in 0..segments {
            if self.is_cancelled() {
                debug!(history = %self.history_id, "Search cancelled");
                found.sort_by_key(|r: &HistoryRecord| r.timestamp);
                return Ok(found);
            }

            let records = match self.storage.load_segment(index).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(history = %self.history_id, segment = index, error = %e, "Skipping unreadable segment");
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            let record_step = segment_step / records.len() as f64;
            for record in records {
                if is_in_period(record.timestamp, start, end)
                    && filter.map_or(true, |f| f.matches(&record))
                {
                    found.push(record);
                }
                current += record_step;
                fire(current as i32);
            }
        }

        if (current as i32) < PROGRESS_MAXIMUM_VALUE {
            fire(PROGRESS_MAXIMUM_VALUE);
        }

        found.sort_by_key(|r| r.timestamp);
        Ok(found)
    }
}
