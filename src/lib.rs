//! VALR order book recorder.
//!
//! This library records full-depth order book snapshots from VALR's trade
//! WebSocket into one SQLite file per trading pair, for later analysis.
//!
//! # Pipeline
//!
//! ```text
//! WebSocket text ─► InboundMessage ─► normalize_ladder ─► Snapshot ─► SnapshotStore
//!   (feed)            (decode once)     (depth, sums)      (metrics)     (SQLite)
//! ```
//!
//! A [`collector::Collector`] drives that pipeline for one pair over a
//! bounded duration, reconnecting after failures. The
//! [`supervisor`] runs one collector per pair.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`feed`]: Wire types and the WebSocket connection
//! - [`orderbook`]: Ladder normalization and book metrics
//! - [`store`]: Snapshot persistence, query and CSV export
//! - [`observer`]: Collector event reporting
//! - [`collector`]: Per-pair recording loop
//! - [`supervisor`]: Multi-pair fan-out
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod collector;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod observer;
pub mod orderbook;
pub mod store;
pub mod supervisor;
pub mod utils;

pub use collector::{Collector, CollectorSummary, StopHandle, StopReason};
pub use config::{CollectorConfig, Config};
pub use error::{RecorderError, Result};
pub use store::SnapshotStore;
