//! Order book normalization.
//!
//! This module handles:
//! - Ladder, snapshot and session types
//! - Aggregation of per-order quantities into fixed-depth ladders
//! - Derived metrics (spread, mid price, notional depth)

pub mod aggregator;
pub mod types;

pub use aggregator::{compute_metrics, mid_price, normalize_ladder, notional_depth};
pub use types::{BookMetrics, Ladder, PriceLevel, RecordingSession, Snapshot, StoredSnapshot};
