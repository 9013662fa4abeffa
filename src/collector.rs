//! Per-pair recording loop.
//!
//! A [`Collector`] owns one feed connection and one snapshot store. It runs
//! connection cycles (connect, subscribe, receive) until its deadline passes
//! or it is stopped, waiting a fixed delay after each failed cycle. A cycle
//! that ends in a graceful peer close reconnects immediately.
//!
//! Within a run, messages are handled strictly one at a time: decode,
//! normalize, compute metrics, persist, count.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use strum::Display;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::CollectorConfig;
use crate::error::{ConfigError, RecorderError, StoreError};
use crate::feed::{FeedConnection, InboundMessage};
use crate::metrics;
use crate::observer::{CollectorObserver, Progress, TracingObserver};
use crate::orderbook::{normalize_ladder, Snapshot};
use crate::store::SnapshotStore;

/// Upper bound on a run's duration, keeping the deadline representable.
const MAX_RUN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The configured duration elapsed.
    Deadline,
    /// [`StopHandle::stop`] was called.
    Stopped,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSummary {
    pub trading_pair: String,
    /// Recording session finalized by this run.
    pub session_id: i64,
    /// Snapshots persisted.
    pub snapshots: u64,
    /// Connection cycles started.
    pub cycles: u64,
    /// Cycles that ended in an error.
    pub failed_cycles: u64,
    /// Wall-clock run time.
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

/// Requests a running collector to stop.
///
/// Cloneable and idempotent; stopping an already stopped collector is a no-op.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    /// Ask the collector to stop. The active connection is closed and the
    /// session finalized before [`Collector::run`] returns.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How one connection cycle ended without error.
enum CycleEnd {
    /// Peer closed gracefully; reconnect at once.
    PeerClosed,
    Interrupted(StopReason),
}

/// Result of racing an operation against stop and deadline.
enum Guarded<T> {
    Done(T),
    Interrupted(StopReason),
}

/// Progress counters for one run.
struct RunState {
    started: Instant,
    deadline: Instant,
    next_report: Instant,
    snapshots: u64,
    cycles: u64,
    failed_cycles: u64,
}

/// Records one trading pair's order book until a deadline or a stop request.
pub struct Collector<F: FeedConnection> {
    config: CollectorConfig,
    feed: F,
    store: SnapshotStore,
    observer: Arc<dyn CollectorObserver>,
    cancel: CancellationToken,
}

impl<F: FeedConnection> Collector<F> {
    /// Create a collector. Invalid settings are fatal and never retried.
    pub fn new(
        config: CollectorConfig,
        feed: F,
        store: SnapshotStore,
        observer: Arc<dyn CollectorObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            feed,
            store,
            observer,
            cancel: CancellationToken::new(),
        })
    }

    /// Create a collector reporting through [`TracingObserver`].
    pub fn with_tracing(
        config: CollectorConfig,
        feed: F,
        store: SnapshotStore,
    ) -> Result<Self, ConfigError> {
        Self::new(config, feed, store, Arc::new(TracingObserver))
    }

    /// Stop when `token` is cancelled, e.g. a child of a process-wide token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle for stopping this collector from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Record until the deadline or a stop request.
    ///
    /// Consumes the collector: the session it opens is finalized exactly
    /// once, whichever way the run ends. Only failing to open or finalize
    /// the session is returned as an error; cycle errors are reported to the
    /// observer and retried.
    pub async fn run(mut self) -> Result<CollectorSummary, RecorderError> {
        let started = Instant::now();
        let mut state = RunState {
            started,
            deadline: started + self.config.duration.min(MAX_RUN),
            next_report: started + self.config.progress_interval,
            snapshots: 0,
            cycles: 0,
            failed_cycles: 0,
        };

        let session_id = self
            .store
            .start_session(&self.config.trading_pair, self.config.depth_levels)?;

        let stop_reason = self.run_cycles(&mut state).await;

        self.feed.close().await;
        self.store.end_session(session_id, state.snapshots)?;

        let summary = CollectorSummary {
            trading_pair: self.config.trading_pair.clone(),
            session_id,
            snapshots: state.snapshots,
            cycles: state.cycles,
            failed_cycles: state.failed_cycles,
            elapsed: started.elapsed(),
            stop_reason,
        };
        self.observer.on_stopped(&summary);
        Ok(summary)
    }

    async fn run_cycles(&mut self, state: &mut RunState) -> StopReason {
        let pair = self.config.trading_pair.clone();

        loop {
            if self.cancel.is_cancelled() {
                return StopReason::Stopped;
            }
            if Instant::now() >= state.deadline {
                return StopReason::Deadline;
            }

            if state.cycles > 0 {
                metrics::inc_ws_reconnects(&pair);
            }
            state.cycles += 1;

            match self.run_cycle(state).await {
                Ok(CycleEnd::PeerClosed) => self.observer.on_disconnected(&pair),
                Ok(CycleEnd::Interrupted(reason)) => return reason,
                Err(e) => {
                    state.failed_cycles += 1;
                    metrics::inc_cycle_failures(&pair);

                    let delay = self.config.reconnect_delay;
                    self.observer.on_error(&pair, &e, delay);

                    let wake = Instant::now() + delay;
                    if let Guarded::Interrupted(reason) =
                        guarded(&self.cancel, state.deadline, sleep_until(wake)).await
                    {
                        return reason;
                    }
                }
            }
        }
    }

    async fn run_cycle(&mut self, state: &mut RunState) -> Result<CycleEnd, RecorderError> {
        let pairs = [self.config.trading_pair.clone()];

        if let Guarded::Interrupted(reason) =
            guarded(&self.cancel, state.deadline, self.feed.connect()).await.transpose()?
        {
            return Ok(CycleEnd::Interrupted(reason));
        }
        if let Guarded::Interrupted(reason) =
            guarded(&self.cancel, state.deadline, self.feed.subscribe(&pairs)).await.transpose()?
        {
            return Ok(CycleEnd::Interrupted(reason));
        }
        self.observer.on_connected(&self.config.trading_pair, state.cycles);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ReceiveEvent::Interrupted(StopReason::Stopped),
                _ = sleep_until(state.deadline) => ReceiveEvent::Interrupted(StopReason::Deadline),
                _ = sleep_until(state.next_report) => ReceiveEvent::ReportDue,
                msg = self.feed.next_message() => ReceiveEvent::Message(msg),
            };

            match event {
                ReceiveEvent::Interrupted(reason) => return Ok(CycleEnd::Interrupted(reason)),
                ReceiveEvent::ReportDue => self.report_progress(state),
                ReceiveEvent::Message(Ok(Some(text))) => self.handle_message(&text, state)?,
                ReceiveEvent::Message(Ok(None)) => return Ok(CycleEnd::PeerClosed),
                ReceiveEvent::Message(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Decode one message and persist it if it carries a two-sided book.
    ///
    /// Undecodable messages are reported and dropped; only store failures
    /// end the cycle.
    fn handle_message(&self, text: &str, state: &mut RunState) -> Result<(), StoreError> {
        let pair = &self.config.trading_pair;

        let book = match InboundMessage::decode(text) {
            Ok(InboundMessage::Snapshot { book, .. }) => book,
            Ok(InboundMessage::SubscriptionAck { detail }) => {
                self.observer.on_subscription_ack(pair, &detail);
                return Ok(());
            }
            Ok(InboundMessage::Unrecognized { .. }) => return Ok(()),
            Err(e) => {
                metrics::inc_decode_errors(pair);
                self.observer.on_decode_error(pair, &e);
                return Ok(());
            }
        };

        let bids = normalize_ladder(book.bids(), self.config.depth_levels);
        let asks = normalize_ladder(book.asks(), self.config.depth_levels);
        if bids.is_empty() || asks.is_empty() {
            metrics::inc_snapshots_discarded(pair);
            return Ok(());
        }

        let snapshot = Snapshot::new(pair.clone(), Utc::now(), book.sequence_number(), bids, asks);

        let start = std::time::Instant::now();
        self.store.insert(&snapshot)?;
        metrics::record_store_insert_latency(start, pair);
        metrics::inc_snapshots_persisted(pair);

        state.snapshots += 1;
        Ok(())
    }

    /// An unreadable database size is reported as `None`; it never ends
    /// the cycle.
    fn report_progress(&self, state: &mut RunState) {
        let now = Instant::now();
        self.observer.on_progress(&Progress {
            trading_pair: self.config.trading_pair.clone(),
            snapshots: state.snapshots,
            elapsed: now.saturating_duration_since(state.started),
            remaining: state.deadline.saturating_duration_since(now),
            store_bytes: self.store.size_on_disk().ok(),
        });
        state.next_report = now + self.config.progress_interval;
    }
}

enum ReceiveEvent {
    Interrupted(StopReason),
    ReportDue,
    Message(Result<Option<String>, crate::error::FeedError>),
}

impl<T, E> Guarded<Result<T, E>> {
    fn transpose(self) -> Result<Guarded<T>, E> {
        match self {
            Guarded::Done(Ok(v)) => Ok(Guarded::Done(v)),
            Guarded::Done(Err(e)) => Err(e),
            Guarded::Interrupted(reason) => Ok(Guarded::Interrupted(reason)),
        }
    }
}

/// Race `fut` against a stop request and the run deadline.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: impl Future<Output = T>,
) -> Guarded<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Interrupted(StopReason::Stopped),
        _ = sleep_until(deadline) => Guarded::Interrupted(StopReason::Deadline),
        out = fut => Guarded::Done(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{MockEvent, MockFeed};
    use crate::observer::{ObservedEvent, RecordingObserver};
    use crate::store::SnapshotQuery;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const BOOK: &str = r#"{"type":"FULL_ORDERBOOK_UPDATE","Bids":[{"Price":"100.0","Orders":[{"quantity":"1.0"},{"quantity":"0.5"}]}],"Asks":[{"Price":"101.0","Orders":[{"quantity":"2.0"}]}],"LastChange":42}"#;
    const ONE_SIDED: &str = r#"{"type":"FULL_ORDERBOOK_UPDATE","Bids":[],"Asks":[{"Price":"101.0","Orders":[{"quantity":"2.0"}]}]}"#;

    fn config(duration_secs: u64) -> CollectorConfig {
        CollectorConfig::new("BTC-ZAR", 10, Duration::from_secs(duration_secs))
    }

    fn collector(
        feed: MockFeed,
        duration_secs: u64,
    ) -> (Collector<MockFeed>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let store = SnapshotStore::open_in_memory().unwrap();
        let collector = Collector::new(config(duration_secs), feed, store, observer.clone()).unwrap();
        (collector, observer)
    }

    #[test]
    fn invalid_config_is_fatal() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let result = Collector::with_tracing(
            CollectorConfig::new("BTC-ZAR", 0, Duration::from_secs(1)),
            MockFeed::new(),
            store,
        );
        assert!(matches!(result, Err(ConfigError::InvalidDepth(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn persists_two_sided_books_until_deadline() {
        let feed = MockFeed::new().with_messages([BOOK, ONE_SIDED, "{garbage", BOOK]);
        let log = feed.log();
        let (collector, observer) = collector(feed, 30);

        let summary = collector.run().await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::Deadline);
        assert_eq!(summary.snapshots, 2);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failed_cycles, 0);
        assert_eq!(summary.elapsed, Duration::from_secs(30));

        let log = log.lock().unwrap();
        assert_eq!(log.subscriptions, vec![vec!["BTC-ZAR".to_string()]]);
        assert_eq!(log.close_calls, 1);

        let events = observer.events();
        assert!(events.contains(&ObservedEvent::DecodeError));
        assert!(matches!(events.last(), Some(ObservedEvent::Stopped(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let feed = MockFeed::new().with_connect_failures(2);
        let log = feed.log();
        let (collector, observer) = collector(feed, 60);

        let summary = collector.run().await.unwrap();

        let attempts = log.lock().unwrap().connect_attempts.clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(5));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(5));

        assert_eq!(observer.error_count(), 2);
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failed_cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_close_reconnects_immediately() {
        let feed = MockFeed::new()
            .with_session(vec![MockEvent::Message(BOOK.to_string()), MockEvent::Close])
            .with_messages([BOOK]);
        let log = feed.log();
        let (collector, observer) = collector(feed, 10);

        let summary = collector.run().await.unwrap();

        let attempts = log.lock().unwrap().connect_attempts.clone();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1], attempts[0]);
        assert_eq!(summary.snapshots, 2);
        assert_eq!(observer.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_waits_before_reconnecting() {
        let feed = MockFeed::new()
            .with_session(vec![MockEvent::Fail("reset".to_string())])
            .with_messages(Vec::<String>::new());
        let log = feed.log();
        let (collector, observer) = collector(feed, 20);

        collector.run().await.unwrap();

        let attempts = log.lock().unwrap().connect_attempts.clone();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(5));
        assert_eq!(observer.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_ends_cycle_and_waits_before_reconnecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc_zar_orderbook.db");
        let store = SnapshotStore::open(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_insert BEFORE INSERT ON orderbook_snapshots \
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let feed = MockFeed::new()
            .with_messages([BOOK])
            .with_messages([BOOK])
            .with_messages([BOOK]);
        let log = feed.log();
        let observer = Arc::new(RecordingObserver::new());

        let summary = Collector::new(config(12), feed, store, observer.clone())
            .unwrap()
            .run()
            .await
            .unwrap();

        // Failures at 0s, 5s and 10s; the deadline cuts the last wait.
        assert_eq!(summary.snapshots, 0);
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failed_cycles, 3);
        assert_eq!(summary.stop_reason, StopReason::Deadline);

        let attempts = log.lock().unwrap().connect_attempts.clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(5));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(5));

        let errors: Vec<(String, Duration)> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::Error { message, retry_in } => Some((message, retry_in)),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 3);
        for (message, retry_in) in &errors {
            assert!(
                message.contains("store error: sqlite error: disk full"),
                "unexpected error: {message}"
            );
            assert_eq!(*retry_in, Duration::from_secs(5));
        }

        let store = SnapshotStore::open(&path).unwrap();
        let session = store.session(summary.session_id).unwrap().unwrap();
        assert!(session.is_closed());
        assert_eq!(session.total_snapshots, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_ladder_elements_still_persist_the_book() {
        let book = r#"{"type":"FULL_ORDERBOOK_UPDATE","Bids":[null,{"Price":"100","Orders":["junk",{"quantity":"1.5"}]}],"Asks":[{"Price":"101","Orders":"x"},{"Price":"102","Orders":[{"quantity":"2"}]}],"LastChange":9}"#;
        let feed = MockFeed::new().with_messages([book]);
        let observer = Arc::new(RecordingObserver::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc_zar_orderbook.db");
        let store = SnapshotStore::open(&path).unwrap();

        let summary = Collector::new(config(5), feed, store, observer.clone())
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.snapshots, 1);
        assert!(!observer.events().contains(&ObservedEvent::DecodeError));

        let rows = SnapshotStore::open(&path)
            .unwrap()
            .query(&SnapshotQuery::all())
            .unwrap();
        let snap = &rows[0].snapshot;
        assert_eq!(
            snap.bids.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
            vec![(dec!(100), dec!(1.5))]
        );
        assert_eq!(
            snap.asks.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
            vec![(dec!(102), dec!(2))]
        );
        assert_eq!(snap.sequence_number, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_receive_and_finalizes_once() {
        let feed = MockFeed::new().with_messages([BOOK]);
        let log = feed.log();
        let (collector, observer) = collector(feed, 3600);
        let stop = collector.stop_handle();

        let task = tokio::spawn(collector.run());
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop.stop();
        stop.stop();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert_eq!(summary.snapshots, 1);
        assert!(stop.is_stopped());
        assert_eq!(log.lock().unwrap().close_calls, 1);

        let stopped = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, ObservedEvent::Stopped(_)))
            .count();
        assert_eq!(stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_reconnect_delay() {
        let feed = MockFeed::new().with_connect_failures(usize::MAX);
        let log = feed.log();
        let (collector, _observer) = collector(feed, 3600);
        let stop = collector.stop_handle();

        let task = tokio::spawn(collector.run());
        tokio::time::sleep(Duration::from_secs(7)).await;
        stop.stop();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert_eq!(log.lock().unwrap().connect_attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_once_per_interval() {
        let feed = MockFeed::new().with_messages([BOOK]);
        let observer = Arc::new(RecordingObserver::new());
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("btc_zar_orderbook.db")).unwrap();

        Collector::new(config(150), feed, store, observer.clone())
            .unwrap()
            .run()
            .await
            .unwrap();

        // Reports at 60s and 120s; the run ends at 150s.
        assert_eq!(observer.progress_count(), 2);
        let first = observer
            .events()
            .into_iter()
            .find_map(|e| match e {
                ObservedEvent::Progress(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(first.snapshots, 1);
        assert_eq!(first.elapsed, Duration::from_secs(60));
        assert_eq!(first.remaining, Duration::from_secs(90));
        assert!(first.store_bytes.is_some_and(|bytes| bytes > 0));
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_snapshot_contents() {
        let feed = MockFeed::new().with_messages([BOOK]);
        let observer = Arc::new(RecordingObserver::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc_zar_orderbook.db");
        let store = SnapshotStore::open(&path).unwrap();

        let summary = Collector::new(config(5), feed, store, observer)
            .unwrap()
            .run()
            .await
            .unwrap();

        let store = SnapshotStore::open(&path).unwrap();
        let rows = store.query(&SnapshotQuery::all().pair("BTC-ZAR")).unwrap();
        assert_eq!(rows.len(), 1);

        let snap = &rows[0].snapshot;
        assert_eq!(snap.sequence_number, Some(42));
        assert_eq!(snap.bids.len(), 1);
        assert_eq!((snap.bids[0].price, snap.bids[0].quantity), (dec!(100.0), dec!(1.5)));
        assert_eq!((snap.asks[0].price, snap.asks[0].quantity), (dec!(101.0), dec!(2.0)));
        assert_eq!(snap.spread, Some(dec!(1.0)));
        assert_eq!(snap.mid_price, Some(dec!(100.5)));
        assert_eq!(snap.bid_depth, dec!(150.0));
        assert_eq!(snap.ask_depth, dec!(202.0));

        let session = store.session(summary.session_id).unwrap().unwrap();
        assert!(session.is_closed());
        assert_eq!(session.total_snapshots, 1);
        assert_eq!(session.depth_levels, 10);
    }
}
