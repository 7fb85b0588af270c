use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{FeedSettings, FieldMapping};
use crate::error::{Error, Result};
use crate::model::RawRecord;
use crate::processor::reconstruct;
use crate::source::FeedSource;
use crate::state::{Snapshot, SnapshotStore};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Upper bound for a single fetch attempt.
    pub timeout: Duration,
    /// Attempts made after the first one fails.
    pub retries: u32,
    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            timeout: settings.timeout,
            retries: settings.retries,
            backoff: Duration::from_secs(2),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retries: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published { devices: usize, records: usize },
    /// Another cycle was still running.
    Skipped,
}

/// A failed cycle. The previous snapshot, if any, is still being served.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{error}")]
pub struct RefreshFailure {
    pub error: Error,
    pub snapshot_available: bool,
}

/// Runs fetch → reconstruct → publish cycles against one store.
pub struct Refresher<S, C = SystemClock> {
    source: S,
    clock: C,
    mapping: FieldMapping,
    policy: RetryPolicy,
    store: Arc<SnapshotStore>,
}

impl<S: FeedSource> Refresher<S> {
    pub fn new(source: S, mapping: FieldMapping, policy: RetryPolicy) -> Self {
        Self::with_clock(source, SystemClock, mapping, policy)
    }
}

impl<S: FeedSource, C: Clock> Refresher<S, C> {
    pub fn with_clock(source: S, clock: C, mapping: FieldMapping, policy: RetryPolicy) -> Self {
        Self {
            source,
            clock,
            mapping,
            policy,
            store: Arc::new(SnapshotStore::new()),
        }
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    /// Runs one cycle unless one is already in flight.
    pub async fn refresh_once(&self) -> std::result::Result<RefreshOutcome, RefreshFailure> {
        let Some(_guard) = self.store.begin_refresh() else {
            debug!("refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let records = self.fetch_with_retry().await.map_err(|e| self.fail(e))?;
        let fetched_at = self.clock.now();

        if records.is_empty() && !self.store.has_snapshot() {
            return Err(self.fail(Error::NoData));
        }

        let reconstructed_at = self.clock.now();
        let dataset = reconstruct(&records, &self.mapping, reconstructed_at);
        let outcome = RefreshOutcome::Published {
            devices: dataset.len(),
            records: records.len(),
        };

        self.store.publish(Snapshot {
            dataset: Arc::new(dataset),
            // the feed returns oldest first
            latest: records.last().cloned(),
            fetched_at,
            reconstructed_at,
            record_count: records.len(),
        });
        Ok(outcome)
    }

    /// Refreshes once immediately and then every `interval` until `shutdown` resolves.
    /// A cycle still in flight at shutdown is abandoned without publishing.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = &mut shutdown => break,
                result = self.refresh_once() => log_outcome(result),
            }
        }
        info!("refresh loop stopped");
    }

    async fn fetch_with_retry(&self) -> Result<Vec<RawRecord>> {
        let mut attempt = 0_u32;
        loop {
            let result = tokio::time::timeout(self.policy.timeout, self.source.fetch())
                .await
                .unwrap_or_else(|_| {
                    let millis = u64::try_from(self.policy.timeout.as_millis()).unwrap_or(u64::MAX);
                    Err(Error::Timeout(millis))
                });

            match result {
                Ok(records) => return Ok(records),
                Err(e) if attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(attempt, code = e.code(), "feed fetch failed, retrying: {e}");
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, error: Error) -> RefreshFailure {
        let snapshot_available = self.store.record_error(error.description());
        RefreshFailure {
            error,
            snapshot_available,
        }
    }
}

fn log_outcome(result: std::result::Result<RefreshOutcome, RefreshFailure>) {
    match result {
        Ok(RefreshOutcome::Published { devices, records }) => {
            info!(devices, records, "published snapshot");
        }
        Ok(RefreshOutcome::Skipped) => {}
        Err(failure) if failure.snapshot_available => {
            warn!(code = failure.error.code(), "refresh failed, serving previous snapshot: {failure}");
        }
        Err(failure) => {
            error!(code = failure.error.code(), "refresh failed, no data available: {failure}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Notify;

    use super::*;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 8, 18, 0, 0).unwrap()
    }

    /// Replays queued responses, then keeps answering with empty windows.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<RawRecord>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<RawRecord>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<RawRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn records() -> Vec<RawRecord> {
        vec![
            RawRecord::new(t0() - chrono::Duration::seconds(60))
                .with_field("field1", "3")
                .with_field("field2", "A")
                .with_field("field3", "_p~iF~ps|U"),
            RawRecord::new(t0() - chrono::Duration::seconds(30))
                .with_field("field1", "3")
                .with_field("field2", "A"),
        ]
    }

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    fn refresher(
        source: ScriptedSource,
        retries: u32,
    ) -> Refresher<ScriptedSource, FixedClock> {
        Refresher::with_clock(
            source,
            FixedClock(t0()),
            FieldMapping::scooter(),
            fast_policy(retries),
        )
    }

    #[tokio::test]
    async fn publishes_reconstructed_snapshot() {
        let refresher = refresher(ScriptedSource::new(vec![Ok(records())]), 0);

        let outcome = refresher.refresh_once().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Published { devices: 1, records: 2 });

        let status = refresher.store().status();
        assert!(!status.refreshing);
        assert_eq!(status.last_success, Some(t0()));
        assert!(status.dataset().unwrap().is_current_trip("A", "3"));

        let snapshot = status.snapshot.unwrap();
        assert_eq!(snapshot.latest.as_ref(), records().last());
        assert_eq!(snapshot.record_count, 2);
    }

    #[tokio::test]
    async fn empty_window_has_no_latest_reading() {
        let source = ScriptedSource::new(vec![Ok(records()), Ok(Vec::new())]);
        let refresher = refresher(source, 0);
        refresher.refresh_once().await.unwrap();
        refresher.refresh_once().await.unwrap();

        assert_eq!(refresher.store().current().unwrap().latest, None);
    }

    #[tokio::test]
    async fn first_load_failure_reports_no_snapshot() {
        let source = ScriptedSource::new(vec![Err(Error::Fetch("HTTP 503".into()))]);
        let refresher = refresher(source, 0);

        let failure = refresher.refresh_once().await.unwrap_err();
        assert_eq!(failure.error, Error::Fetch("HTTP 503".into()));
        assert!(!failure.snapshot_available);

        let status = refresher.store().status();
        assert!(status.snapshot.is_none());
        assert_eq!(
            status.last_error.as_deref(),
            Some("code: fetch_error, description: HTTP 503")
        );
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(records()),
            Err(Error::Fetch("connection reset".into())),
            Ok(records()),
        ]);
        let refresher = refresher(source, 0);
        refresher.refresh_once().await.unwrap();
        let before = refresher.store().current().unwrap();

        let failure = refresher.refresh_once().await.unwrap_err();
        assert!(failure.snapshot_available);
        let status = refresher.store().status();
        assert!(Arc::ptr_eq(status.snapshot.as_ref().unwrap(), &before));
        assert!(status.last_error.is_some());

        refresher.refresh_once().await.unwrap();
        assert_eq!(refresher.store().last_error(), None);
    }

    #[tokio::test]
    async fn empty_feed_is_error_only_on_first_load() {
        let source = ScriptedSource::new(vec![Ok(Vec::new()), Ok(records()), Ok(Vec::new())]);
        let refresher = refresher(source, 0);

        let failure = refresher.refresh_once().await.unwrap_err();
        assert_eq!(failure.error, Error::NoData);
        assert!(!failure.snapshot_available);

        refresher.refresh_once().await.unwrap();
        let outcome = refresher.refresh_once().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Published { devices: 0, records: 0 });
        assert!(refresher.store().status().dataset().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let source = ScriptedSource::new(vec![
            Err(Error::Fetch("HTTP 502".into())),
            Err(Error::Fetch("HTTP 502".into())),
            Ok(records()),
        ]);
        let refresher = refresher(source, 2);

        refresher.refresh_once().await.unwrap();
        assert_eq!(refresher.source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retries() {
        let source = ScriptedSource::new(vec![
            Err(Error::Fetch("HTTP 502".into())),
            Err(Error::Fetch("HTTP 504".into())),
        ]);
        let refresher = refresher(source, 1);

        let failure = refresher.refresh_once().await.unwrap_err();
        assert_eq!(failure.error, Error::Fetch("HTTP 504".into()));
        assert_eq!(refresher.source.calls.load(Ordering::SeqCst), 2);
    }

    struct SlowSource;

    #[async_trait]
    impl FeedSource for SlowSource {
        async fn fetch(&self) -> Result<Vec<RawRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        let refresher = Refresher::with_clock(SlowSource, FixedClock(t0()), FieldMapping::scooter(), policy);

        let failure = refresher.refresh_once().await.unwrap_err();
        assert_eq!(failure.error, Error::Timeout(20));
        assert!(!refresher.store().is_refreshing());
    }

    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl FeedSource for GatedSource {
        async fn fetch(&self) -> Result<Vec<RawRecord>> {
            self.gate.notified().await;
            Ok(records())
        }
    }

    #[tokio::test]
    async fn overlapping_refresh_is_skipped() {
        let refresher = Refresher::with_clock(
            GatedSource { gate: Notify::new() },
            FixedClock(t0()),
            FieldMapping::scooter(),
            fast_policy(0),
        );

        let (first, second) = tokio::join!(refresher.refresh_once(), async {
            while !refresher.store().is_refreshing() {
                tokio::task::yield_now().await;
            }
            let outcome = refresher.refresh_once().await;
            refresher.source.gate.notify_one();
            outcome
        });

        assert_eq!(second, Ok(RefreshOutcome::Skipped));
        assert_eq!(first, Ok(RefreshOutcome::Published { devices: 1, records: 2 }));
    }

    #[tokio::test]
    async fn run_refreshes_eagerly_and_stops_on_shutdown() {
        let refresher = refresher(ScriptedSource::new(vec![Ok(records())]), 0);

        refresher
            .run(Duration::from_secs(60), tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(refresher.source.calls.load(Ordering::SeqCst), 1);
        assert!(refresher.store().has_snapshot());
    }

    #[tokio::test]
    async fn shutdown_interrupts_cycle_in_flight() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(20),
            retries: 2,
            backoff: Duration::from_secs(2),
        };
        let refresher = Refresher::with_clock(SlowSource, FixedClock(t0()), FieldMapping::scooter(), policy);

        let stopped = tokio::time::timeout(
            Duration::from_secs(1),
            refresher.run(Duration::from_secs(60), tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;

        assert!(stopped.is_ok(), "run kept waiting on the fetch after shutdown");
        assert!(!refresher.store().is_refreshing());
        assert!(!refresher.store().has_snapshot());
    }
}
