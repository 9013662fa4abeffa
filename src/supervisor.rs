//! Runs one collector per trading pair.
//!
//! Each pair gets its own task, store file and feed connection. Pairs share
//! nothing but the cancellation token, so one pair failing leaves the
//! others recording.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::collector::{Collector, CollectorSummary};
use crate::config::Config;
use crate::error::RecorderError;
use crate::feed::WsFeedConnection;
use crate::observer::{CollectorObserver, TracingObserver};
use crate::store::SnapshotStore;

/// How one pair's run ended.
#[derive(Debug)]
pub struct PairOutcome {
    pub trading_pair: String,
    /// The run summary, or why the pair could not be recorded.
    pub result: Result<CollectorSummary, RecorderError>,
}

/// Record every pair in `pairs` until the configured duration elapses or
/// `cancel` is cancelled. Outcomes are returned in `pairs` order.
pub async fn run_all(config: &Config, pairs: &[String], cancel: CancellationToken) -> Vec<PairOutcome> {
    run_all_with(config, pairs, cancel, Arc::new(TracingObserver)).await
}

/// [`run_all`] with a caller-supplied observer shared by every pair.
pub async fn run_all_with(
    config: &Config,
    pairs: &[String],
    cancel: CancellationToken,
    observer: Arc<dyn CollectorObserver>,
) -> Vec<PairOutcome> {
    info!(pairs = ?pairs, depth = config.depth_levels, days = config.duration_days, "Starting collectors");

    let handles: Vec<(String, JoinHandle<Result<CollectorSummary, RecorderError>>)> = pairs
        .iter()
        .map(|pair| {
            let task = record_pair(config.clone(), pair.clone(), cancel.child_token(), observer.clone());
            (pair.clone(), tokio::spawn(task))
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (trading_pair, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(pair = %trading_pair, error = %e, "Collector task panicked");
                Err(RecorderError::Io(std::io::Error::other(e.to_string())))
            }
        };

        if let Err(e) = &result {
            error!(pair = %trading_pair, error = %e, "Collector failed");
        }
        outcomes.push(PairOutcome { trading_pair, result });
    }

    info!("All collectors stopped");
    outcomes
}

async fn record_pair(
    config: Config,
    trading_pair: String,
    cancel: CancellationToken,
    observer: Arc<dyn CollectorObserver>,
) -> Result<CollectorSummary, RecorderError> {
    let path = config.db_path(&trading_pair);
    let store = SnapshotStore::open(&path)?;
    let feed = WsFeedConnection::new(config.valr_ws_url.clone());

    info!(pair = %trading_pair, db = %path.display(), "Collector starting");

    let collector = Collector::new(config.collector_config(&trading_pair), feed, store, observer)?
        .with_cancellation(cancel);
    collector.run().await
}
