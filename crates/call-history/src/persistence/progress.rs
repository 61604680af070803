//! Progress aggregation across several history readers
//!
//! A call history search may run over `N` histories, each reader reporting
//! its own 0..=100 progress. [`SearchProgressWrapper`] sits between the
//! readers and one [`CallHistorySearchProgressListener`] and turns those
//! streams into a single non-decreasing 0..=100 stream: every reader delta is
//! divided by `N`, and once all `N` readers have reported their maximum the
//! total is forced to exactly 100 to absorb division losses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use rvoip_history_store::{HistorySearchProgressListener, ProgressEvent, PROGRESS_MAXIMUM_VALUE};

/// Progress of a call history search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHistoryProgressEvent {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub keywords: Vec<String>,
    /// Aggregated progress over every searched history
    pub progress: i32,
}

/// Receives aggregated search progress
pub trait CallHistorySearchProgressListener: Send + Sync {
    fn progress_changed(&self, event: &CallHistoryProgressEvent);
}

#[derive(Debug, Default)]
struct ProgressState {
    contact_count: i32,
    completed_contacts: i32,
    current_progress: i32,
    last_history_progress: i32,
}

/// Adapts one call history listener to the per-reader progress protocol
pub struct SearchProgressWrapper {
    listener: Arc<dyn CallHistorySearchProgressListener>,
    state: Mutex<ProgressState>,
}

impl SearchProgressWrapper {
    pub fn new(listener: Arc<dyn CallHistorySearchProgressListener>) -> Self {
        Self {
            listener,
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn listener(&self) -> &Arc<dyn CallHistorySearchProgressListener> {
        &self.listener
    }

    /// Prepare for a search over `count` histories
    pub fn set_contact_count(&self, count: usize) {
        self.state.lock().contact_count = i32::try_from(count).unwrap_or(i32::MAX);
    }

    /// Reset every counter; required before the wrapper is reused
    pub fn clear(&self) {
        *self.state.lock() = ProgressState::default();
    }

    /// Map one reader's progress value to the aggregated value
    pub fn map_progress(&self, history_progress: i32) -> i32 {
        let mut state = self.state.lock();
        let contacts = state.contact_count.max(1);

        state.current_progress += (history_progress - state.last_history_progress) / contacts;

        if history_progress == PROGRESS_MAXIMUM_VALUE {
            state.completed_contacts += 1;
            state.last_history_progress = 0;
            if state.completed_contacts >= contacts {
                state.current_progress = PROGRESS_MAXIMUM_VALUE;
            }
        } else {
            state.last_history_progress = history_progress;
        }

        state.current_progress
    }
}

impl HistorySearchProgressListener for SearchProgressWrapper {
    fn progress_changed(&self, event: &ProgressEvent) {
        let progress = self.map_progress(event.progress);
        self.listener.progress_changed(&CallHistoryProgressEvent {
            start_date: event.start_date,
            end_date: event.end_date,
            keywords: event.keywords.clone(),
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<i32>>);

    impl CallHistorySearchProgressListener for Recorder {
        fn progress_changed(&self, event: &CallHistoryProgressEvent) {
            self.0.lock().push(event.progress);
        }
    }

    fn wrapper() -> (SearchProgressWrapper, Arc<Recorder>) {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        (SearchProgressWrapper::new(recorder.clone()), recorder)
    }

    #[test]
    fn test_three_readers_reach_exactly_one_hundred() {
        let (wrapper, _) = wrapper();
        wrapper.set_contact_count(3);

        let mut seen = Vec::new();
        for _reader in 0..3 {
            for p in [0, 7, 33, 34, 66, 99, 100] {
                seen.push(wrapper.map_progress(p));
            }
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "not monotonic: {seen:?}");
        assert_eq!(seen.last(), Some(&100));
        // Division losses keep the total below 100 until the last reader completes
        assert!(seen[seen.len() - 2] < 100);
    }

    #[test]
    fn test_single_reader_passes_through() {
        let (wrapper, recorder) = wrapper();
        wrapper.set_contact_count(1);

        for p in [0, 25, 50, 100] {
            wrapper.progress_changed(&ProgressEvent {
                start_date: None,
                end_date: None,
                keywords: Vec::new(),
                progress: p,
            });
        }
        assert_eq!(*recorder.0.lock(), vec![0, 25, 50, 100]);
    }

    #[test]
    fn test_clear_resets_between_searches() {
        let (wrapper, _) = wrapper();
        wrapper.set_contact_count(2);
        wrapper.map_progress(50);
        wrapper.map_progress(100);
        wrapper.clear();

        wrapper.set_contact_count(1);
        assert_eq!(wrapper.map_progress(40), 40);
        assert_eq!(wrapper.map_progress(100), 100);
    }

    #[test]
    fn test_zero_contact_count_does_not_divide_by_zero() {
        let (wrapper, _) = wrapper();
        assert_eq!(wrapper.map_progress(30), 30);
        assert_eq!(wrapper.map_progress(100), 100);
    }
}
