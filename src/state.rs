use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{GroupedDataset, RawRecord};

/// One fully reconstructed dataset. Never modified after publication.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub dataset: Arc<GroupedDataset>,
    /// Newest record of the fetched window, shown as the channel's current reading.
    pub latest: Option<RawRecord>,
    pub fetched_at: DateTime<Utc>,
    pub reconstructed_at: DateTime<Utc>,
    pub record_count: usize,
}

/// What a consumer sees at a given moment.
#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_success: Option<DateTime<Utc>>,
    pub refreshing: bool,
    pub last_error: Option<String>,
}

impl StatusView {
    pub fn dataset(&self) -> Option<&GroupedDataset> {
        self.snapshot.as_deref().map(|s| s.dataset.as_ref())
    }
}

// Snapshot and error change together under one lock.
#[derive(Default)]
struct Published {
    snapshot: Option<Arc<Snapshot>>,
    last_error: Option<String>,
}

#[derive(Default)]
pub struct SnapshotStore {
    // Replaced wholesale; readers clone the Arc and never observe a partial rebuild.
    published: RwLock<Published>,
    refreshing: AtomicBool,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Published> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.read().snapshot.clone()
    }

    pub fn has_snapshot(&self) -> bool {
        self.read().snapshot.is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusView {
        let (snapshot, last_error) = {
            let published = self.read();
            (published.snapshot.clone(), published.last_error.clone())
        };
        StatusView {
            last_success: snapshot.as_ref().map(|s| s.fetched_at),
            snapshot,
            refreshing: self.is_refreshing(),
            last_error,
        }
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        *self.write() = Published {
            snapshot: Some(Arc::new(snapshot)),
            last_error: None,
        };
    }

    /// Records a failed cycle and reports whether a snapshot is still being served.
    pub(crate) fn record_error(&self, message: String) -> bool {
        let mut published = self.write();
        published.last_error = Some(message);
        published.snapshot.is_some()
    }

    /// Marks a refresh as in flight. Returns `None` if one already is.
    pub(crate) fn begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard { store: self })
    }
}

/// Clears the in-flight flag when the cycle ends, however it ends.
pub(crate) struct RefreshGuard<'a> {
    store: &'a SnapshotStore,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.store.refreshing.store(false, Ordering::Release);
    }
}
