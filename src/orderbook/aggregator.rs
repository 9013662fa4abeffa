//! Ladder normalization and derived book metrics.

use rust_decimal::Decimal;

use super::types::{BookMetrics, Ladder, PriceLevel};
use crate::feed::messages::RawLevel;

/// Aggregate raw levels into at most `depth` price levels.
///
/// The first `depth` raw levels are considered in feed order. For each one
/// the order quantities are summed; unparsable quantities count as zero and
/// an unparsable price drops the level. Only levels with a positive price
/// and positive total quantity are emitted.
pub fn normalize_ladder(levels: &[RawLevel], depth: usize) -> Ladder {
    levels
        .iter()
        .take(depth)
        .filter_map(aggregate_level)
        .collect()
}

fn aggregate_level(level: &RawLevel) -> Option<PriceLevel> {
    let price = level.price()?;
    let quantity = level
        .orders()
        .iter()
        .filter_map(|order| order.quantity())
        .try_fold(Decimal::ZERO, |total, q| total.checked_add(q))?;

    if price > Decimal::ZERO && quantity > Decimal::ZERO {
        Some(PriceLevel::new(price, quantity))
    } else {
        None
    }
}

/// Derive best prices, spread, mid price and notional depth from two ladders.
pub fn compute_metrics(bids: &[PriceLevel], asks: &[PriceLevel]) -> BookMetrics {
    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);

    let (spread, mid_price) = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => (Some(ask - bid), Some(mid_price(bid, ask))),
        _ => (None, None),
    };

    BookMetrics {
        best_bid,
        best_ask,
        spread,
        mid_price,
        bid_depth: notional_depth(bids),
        ask_depth: notional_depth(asks),
    }
}

/// Midpoint of two prices.
pub fn mid_price(bid: Decimal, ask: Decimal) -> Decimal {
    (bid + ask) / Decimal::TWO
}

/// Sum of price * quantity across a ladder.
pub fn notional_depth(levels: &[PriceLevel]) -> Decimal {
    levels
        .iter()
        .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.notional()))
}
