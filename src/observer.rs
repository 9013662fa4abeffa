//! Collector event reporting.
//!
//! The collector never logs directly. Everything it has to say goes through
//! a [`CollectorObserver`] handed to it at construction.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::collector::CollectorSummary;
use crate::error::{DecodeError, RecorderError};
use crate::utils::format_duration;

/// Periodic progress report for one trading pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Pair being recorded.
    pub trading_pair: String,
    /// Snapshots persisted so far in this run.
    pub snapshots: u64,
    /// Time since the run started.
    pub elapsed: Duration,
    /// Time left until the run deadline.
    pub remaining: Duration,
    /// Database size on disk, `None` when it could not be read.
    pub store_bytes: Option<u64>,
}

/// Receives collector lifecycle events.
pub trait CollectorObserver: Send + Sync {
    /// A connection cycle connected and sent its subscription.
    fn on_connected(&self, trading_pair: &str, cycle: u64);

    /// The exchange acknowledged the subscription.
    fn on_subscription_ack(&self, trading_pair: &str, detail: &str);

    /// The peer closed the connection gracefully; reconnecting immediately.
    fn on_disconnected(&self, trading_pair: &str);

    /// Periodic progress, at most once per progress interval.
    fn on_progress(&self, progress: &Progress);

    /// A connection cycle failed; the collector retries after `retry_in`.
    fn on_error(&self, trading_pair: &str, error: &RecorderError, retry_in: Duration);

    /// An inbound message was discarded because it could not be decoded.
    fn on_decode_error(&self, trading_pair: &str, error: &DecodeError);

    /// The run finished and its session was finalized.
    fn on_stopped(&self, summary: &CollectorSummary);
}

/// Default observer: forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CollectorObserver for TracingObserver {
    fn on_connected(&self, trading_pair: &str, cycle: u64) {
        info!(pair = trading_pair, cycle, "Subscribed to order book feed");
    }

    fn on_subscription_ack(&self, trading_pair: &str, detail: &str) {
        info!(pair = trading_pair, detail, "Subscription confirmed");
    }

    fn on_disconnected(&self, trading_pair: &str) {
        info!(pair = trading_pair, "Connection closed by exchange, reconnecting");
    }

    fn on_progress(&self, progress: &Progress) {
        let store_mb = match progress.store_bytes {
            Some(bytes) => format!("{:.2}", bytes as f64 / (1024.0 * 1024.0)),
            None => {
                warn!(pair = %progress.trading_pair, "Could not read database size");
                "unknown".to_string()
            }
        };
        info!(
            pair = %progress.trading_pair,
            snapshots = progress.snapshots,
            store_mb = %store_mb,
            elapsed = %format_duration(progress.elapsed.as_secs()),
            remaining = %format_duration(progress.remaining.as_secs()),
            "Recording progress"
        );
    }

    fn on_error(&self, trading_pair: &str, error: &RecorderError, retry_in: Duration) {
        error!(
            pair = trading_pair,
            error = %error,
            retry_in_secs = retry_in.as_secs(),
            "Collector cycle failed"
        );
    }

    fn on_decode_error(&self, trading_pair: &str, error: &DecodeError) {
        warn!(pair = trading_pair, error = %error, "Discarding undecodable message");
    }

    fn on_stopped(&self, summary: &CollectorSummary) {
        info!(
            pair = %summary.trading_pair,
            session_id = summary.session_id,
            snapshots = summary.snapshots,
            cycles = summary.cycles,
            failed_cycles = summary.failed_cycles,
            reason = %summary.stop_reason,
            "Recording finished"
        );
        debug!(elapsed = %format_duration(summary.elapsed.as_secs()), "Run duration");
    }
}

/// An event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Connected { cycle: u64 },
    SubscriptionAck,
    Disconnected,
    Progress(Progress),
    Error { message: String, retry_in: Duration },
    DecodeError,
    Stopped(CollectorSummary),
}

/// Observer that records every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events observed so far, in order.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of cycle errors observed.
    pub fn error_count(&self) -> usize {
        self.count(|e| matches!(e, ObservedEvent::Error { .. }))
    }

    /// Number of progress reports observed.
    pub fn progress_count(&self) -> usize {
        self.count(|e| matches!(e, ObservedEvent::Progress(_)))
    }

    fn count(&self, pred: impl Fn(&ObservedEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| pred(e)).count())
            .unwrap_or(0)
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl CollectorObserver for RecordingObserver {
    fn on_connected(&self, _trading_pair: &str, cycle: u64) {
        self.push(ObservedEvent::Connected { cycle });
    }

    fn on_subscription_ack(&self, _trading_pair: &str, _detail: &str) {
        self.push(ObservedEvent::SubscriptionAck);
    }

    fn on_disconnected(&self, _trading_pair: &str) {
        self.push(ObservedEvent::Disconnected);
    }

    fn on_progress(&self, progress: &Progress) {
        self.push(ObservedEvent::Progress(progress.clone()));
    }

    fn on_error(&self, _trading_pair: &str, error: &RecorderError, retry_in: Duration) {
        self.push(ObservedEvent::Error {
            message: error.to_string(),
            retry_in,
        });
    }

    fn on_decode_error(&self, _trading_pair: &str, _error: &DecodeError) {
        self.push(ObservedEvent::DecodeError);
    }

    fn on_stopped(&self, summary: &CollectorSummary) {
        self.push(ObservedEvent::Stopped(summary.clone()));
    }
}
