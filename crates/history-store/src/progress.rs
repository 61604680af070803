//! Search progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Progress value fired when a search starts
pub const PROGRESS_MINIMUM_VALUE: i32 = 0;

/// Progress value fired when a search is complete
pub const PROGRESS_MAXIMUM_VALUE: i32 = 100;

/// Progress notification for one running search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Lower bound of the searched period, if any
    pub start_date: Option<DateTime<Utc>>,
    /// Upper bound of the searched period, if any
    pub end_date: Option<DateTime<Utc>>,
    /// Keywords the search is filtering on
    pub keywords: Vec<String>,
    /// Current progress between [`PROGRESS_MINIMUM_VALUE`] and [`PROGRESS_MAXIMUM_VALUE`]
    pub progress: i32,
}

/// Receives progress updates from a [`crate::HistoryReader`]
///
/// Called synchronously from the searching task, so implementations should
/// return quickly.
pub trait HistorySearchProgressListener: Send + Sync {
    fn progress_changed(&self, event: &ProgressEvent);
}

/// Listener registry compared by `Arc` identity
#[derive(Default)]
pub(crate) struct ProgressListeners {
    listeners: RwLock<Vec<Arc<dyn HistorySearchProgressListener>>>,
}

impl ProgressListeners {
    pub(crate) fn add(&self, listener: Arc<dyn HistorySearchProgressListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn HistorySearchProgressListener>) {
        self.listeners.write().retain(|l| !same_listener(l, listener));
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn fire(&self, event: &ProgressEvent) {
        // Snapshot so listeners may (un)register while being notified
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.progress_changed(event);
        }
    }
}

fn same_listener(
    a: &Arc<dyn HistorySearchProgressListener>,
    b: &Arc<dyn HistorySearchProgressListener>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Shared flag that asks a running search to stop early
///
/// A cancelled search returns the records matched so far and does not fire
/// the final maximum progress value.
#[derive(Debug, Clone, Default)]
pub struct SearchCancellation {
    cancelled: Arc<AtomicBool>,
}

impl SearchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder(Mutex<Vec<i32>>);

    impl HistorySearchProgressListener for Recorder {
        fn progress_changed(&self, event: &ProgressEvent) {
            self.0.lock().push(event.progress);
        }
    }

    fn event(progress: i32) -> ProgressEvent {
        ProgressEvent {
            start_date: None,
            end_date: None,
            keywords: Vec::new(),
            progress,
        }
    }

    #[test]
    fn test_listeners_deduplicated_by_identity() {
        let registry = ProgressListeners::default();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listener: Arc<dyn HistorySearchProgressListener> = recorder.clone();

        registry.add(listener.clone());
        registry.add(listener.clone());
        assert_eq!(registry.len(), 1);

        registry.fire(&event(42));
        assert_eq!(*recorder.0.lock(), vec![42]);

        registry.remove(&listener);
        assert_eq!(registry.len(), 0);
        registry.fire(&event(100));
        assert_eq!(*recorder.0.lock(), vec![42]);
    }

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let token = SearchCancellation::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
