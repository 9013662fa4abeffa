//! Order book types and data structures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Single aggregated price level in a ladder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total quantity of all orders resting at this price.
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Notional value of the level (price * quantity).
    pub fn notional(&self) -> Decimal {
        self.price.saturating_mul(self.quantity)
    }
}

/// One side of the book, best level first.
///
/// Bids descend by price and asks ascend; the order is whatever the feed
/// delivered, it is never re-sorted here.
pub type Ladder = Vec<PriceLevel>;

/// Scalars derived from a bid/ask ladder pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookMetrics {
    /// First bid price.
    pub best_bid: Option<Decimal>,
    /// First ask price.
    pub best_ask: Option<Decimal>,
    /// `best_ask - best_bid`; present only when both sides are.
    pub spread: Option<Decimal>,
    /// `(best_bid + best_ask) / 2`; present only when both sides are.
    pub mid_price: Option<Decimal>,
    /// Sum of price * quantity over the bid ladder.
    pub bid_depth: Decimal,
    /// Sum of price * quantity over the ask ladder.
    pub ask_depth: Decimal,
}

/// A normalized, timestamped capture of both ladders plus derived metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Capture instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// Trading pair in display format (`BTC-ZAR`).
    pub trading_pair: String,
    /// Exchange sequence counter (`LastChange`), if supplied.
    pub sequence_number: Option<i64>,
    /// Bid ladder, best first.
    pub bids: Ladder,
    /// Ask ladder, best first.
    pub asks: Ladder,
    /// Sum of price * quantity over bids.
    pub bid_depth: Decimal,
    /// Sum of price * quantity over asks.
    pub ask_depth: Decimal,
    /// Best ask minus best bid.
    pub spread: Option<Decimal>,
    /// Midpoint of best bid and best ask.
    pub mid_price: Option<Decimal>,
}

impl Snapshot {
    /// Build a snapshot from normalized ladders, computing derived metrics.
    pub fn new(
        trading_pair: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence_number: Option<i64>,
        bids: Ladder,
        asks: Ladder,
    ) -> Self {
        let metrics = super::aggregator::compute_metrics(&bids, &asks);
        Self {
            timestamp,
            trading_pair: trading_pair.into(),
            sequence_number,
            bids,
            asks,
            bid_depth: metrics.bid_depth,
            ask_depth: metrics.ask_depth,
            spread: metrics.spread,
            mid_price: metrics.mid_price,
        }
    }

    /// Best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Both sides carry at least one level; only such snapshots are stored.
    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }
}

/// A snapshot as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// Row identity assigned on insert.
    pub id: i64,
    /// The persisted snapshot.
    pub snapshot: Snapshot,
}

/// Bookkeeping record spanning one collector run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    /// Session identity.
    pub id: i64,
    /// When the collector started.
    pub start_time: DateTime<Utc>,
    /// When the collector stopped; `None` while running.
    pub end_time: Option<DateTime<Utc>>,
    /// Trading pair recorded.
    pub trading_pair: String,
    /// Configured ladder depth.
    pub depth_levels: usize,
    /// Snapshots persisted during the run, written once at close.
    pub total_snapshots: u64,
}

impl RecordingSession {
    /// Whether the session has been finalized.
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_level_notional() {
        let level = PriceLevel::new(dec!(100.0), dec!(1.5));
        assert_eq!(level.notional(), dec!(150.0));
    }

    #[test]
    fn snapshot_best_prices() {
        let snapshot = Snapshot::new(
            "BTC-ZAR",
            Utc::now(),
            Some(7),
            vec![
                PriceLevel::new(dec!(0.48), dec!(50)),
                PriceLevel::new(dec!(0.47), dec!(100)),
            ],
            vec![PriceLevel::new(dec!(0.50), dec!(50))],
        );

        assert_eq!(snapshot.best_bid(), Some(dec!(0.48)));
        assert_eq!(snapshot.best_ask(), Some(dec!(0.50)));
        assert_eq!(snapshot.spread, Some(dec!(0.02)));
        assert!(snapshot.is_two_sided());
    }

    #[test]
    fn one_sided_snapshot_has_no_spread() {
        let snapshot = Snapshot::new(
            "BTC-ZAR",
            Utc::now(),
            None,
            vec![PriceLevel::new(dec!(100), dec!(1))],
            Vec::new(),
        );

        assert!(!snapshot.is_two_sided());
        assert_eq!(snapshot.spread, None);
        assert_eq!(snapshot.mid_price, None);
        assert_eq!(snapshot.bid_depth, dec!(100));
        assert_eq!(snapshot.ask_depth, Decimal::ZERO);
    }
}
