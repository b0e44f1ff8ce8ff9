//! Fair-probability estimation for the value signal.
//!
//! The fair price anchors on the size-weighted micro-price; confidence is a
//! blend of four book-quality heuristics, each mapped to [0, 1].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Market, Orderbook};

/// Fair probability never leaves this band; extreme books get clipped
/// toward the tails rather than trusted outright.
const FAIR_FLOOR: Decimal = dec!(0.10);
const FAIR_CEIL: Decimal = dec!(0.90);

/// Reference values that map each heuristic onto [0, 1].
const FULL_CONFIDENCE_LEVELS: f64 = 20.0;
const WIDE_SPREAD: f64 = 0.10;
const FULL_CONFIDENCE_LIQUIDITY: f64 = 10_000.0;
const FULL_CONFIDENCE_VOLUME: f64 = 10_000.0;

/// Fair-value estimate for one token.
#[derive(Debug, Clone)]
pub struct FairValue {
    pub fair: Decimal,
    pub confidence: f64,
    pub micro: Decimal,
    pub mid: Decimal,
}

/// Estimate fair probability and confidence from a validated book.
/// Returns `None` when the book has no two-sided touch.
pub fn estimate(market: &Market, book: &Orderbook) -> Option<FairValue> {
    let micro = book.micro_price()?;
    let mid = book.mid_price()?;
    let spread = book.spread()?;

    let order_count_score =
        ((book.bids.len() + book.asks.len()) as f64 / FULL_CONFIDENCE_LEVELS).min(1.0);
    let spread_score = (1.0 - spread.to_f64().unwrap_or(1.0) / WIDE_SPREAD).clamp(0.0, 1.0);
    let liquidity_score = market
        .liquidity_24h
        .and_then(|l| l.to_f64())
        .map(|l| (l / FULL_CONFIDENCE_LIQUIDITY).min(1.0))
        .unwrap_or(0.0);
    let volume_score = market
        .volume_24h
        .and_then(|v| v.to_f64())
        .map(|v| (v / FULL_CONFIDENCE_VOLUME).min(1.0))
        .unwrap_or(0.0);

    let confidence =
        (order_count_score + spread_score + liquidity_score + volume_score) / 4.0;

    let fair = micro.clamp(FAIR_FLOOR, FAIR_CEIL);

    Some(FairValue {
        fair,
        confidence,
        micro,
        mid,
    })
}
