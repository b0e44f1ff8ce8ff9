//! Quote computation.
//!
//! Pure functions from a book snapshot and per-token state to a two-sided
//! quote: micro-price anchor, inventory skew, bounded order-book-imbalance
//! skew, optional fair-value blend, profile-scaled spread, and clamps that
//! keep both quotes strictly inside the observed touch.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{Activation, FairValue, MakerConfig, MakerTuning, Orderbook};

use crate::state::QuoteProfile;

/// Quotes sit at least this far inside the touch and apart from each other.
pub const QUOTE_EPS: Decimal = dec!(0.00001);

const PRICE_FLOOR: Decimal = dec!(0.01);
const PRICE_CEIL: Decimal = dec!(0.99);

#[derive(Debug, Clone, PartialEq)]
pub struct QuotePair {
    pub bid: Decimal,
    pub ask: Decimal,
    pub fair: Decimal,
    pub micro: Decimal,
    pub spread: Decimal,
}

pub struct QuoteInputs<'a> {
    pub book: &'a Orderbook,
    /// Signed net exposure in shares.
    pub net_shares: Decimal,
    pub maker: &'a MakerConfig,
    pub tuning: &'a MakerTuning,
    pub profile: QuoteProfile,
    /// Fair-value signal, when the value blend is enabled.
    pub value: Option<&'a FairValue>,
    /// Extra spread applied while recovering from a detected fill.
    pub fill_risk_bump: bool,
}

/// Compute the two-sided quote. `None` means the book gives no safe quote
/// (one-sided, degenerate touch, or the clamps collapse the spread).
pub fn compute_quotes(inputs: &QuoteInputs) -> Option<QuotePair> {
    let book = inputs.book;
    book.validate().ok()?;
    let micro = book.micro_price()?;
    let best_bid = book.best_bid()?.price;
    let best_ask = book.best_ask()?.price;

    // Inventory skew: shift fair away from the side we are long.
    let bias = if inputs.maker.max_position > Decimal::ZERO {
        (inputs.net_shares / inputs.maker.max_position).clamp(dec!(-1), dec!(1))
    } else {
        Decimal::ZERO
    };
    let mut fair =
        micro * (Decimal::ONE - bias * inputs.maker.inventory_skew_factor * inputs.maker.spread);

    // Order-book-imbalance skew, bounded.
    let bid_depth = top_depth(&book.bids, inputs.tuning.depth_levels);
    let ask_depth = top_depth(&book.asks, inputs.tuning.depth_levels);
    let total = bid_depth + ask_depth;
    if total > Decimal::ZERO {
        let imbalance = (bid_depth - ask_depth) / total;
        let skew = (imbalance * inputs.tuning.imbalance_weight * inputs.maker.spread)
            .clamp(-inputs.tuning.max_imbalance_skew, inputs.tuning.max_imbalance_skew);
        fair *= Decimal::ONE + skew;
    }

    // Optional blend toward the value-signal fair price.
    if let Some(value) = inputs.value {
        if inputs.maker.use_value_signal && value.confidence >= inputs.maker.value_confidence_min {
            let weight = Decimal::try_from(
                (value.confidence * inputs.maker.value_signal_weight).min(0.9),
            )
            .unwrap_or(Decimal::ZERO);
            fair = fair * (Decimal::ONE - weight) + value.fair * weight;
        }
    }

    let mut spread = (inputs.maker.spread * inputs.profile.spread_scale(inputs.tuning))
        .clamp(inputs.maker.min_spread, inputs.maker.max_spread);
    if inputs.fill_risk_bump {
        spread += inputs.tuning.fill_risk_spread_bump;
    }
    let half = spread / dec!(2);

    // Clamp both quotes strictly inside the touch, then into (0.01, 0.99).
    let low = best_bid + QUOTE_EPS;
    let high = best_ask - QUOTE_EPS;
    if low >= high {
        return None;
    }
    let bid = (fair * (Decimal::ONE - half))
        .clamp(low, high)
        .clamp(PRICE_FLOOR, PRICE_CEIL);
    let ask = (fair * (Decimal::ONE + half))
        .clamp(low, high)
        .clamp(PRICE_FLOOR, PRICE_CEIL);

    if bid >= ask - QUOTE_EPS {
        return None;
    }

    Some(QuotePair {
        bid,
        ask,
        fair,
        micro,
        spread,
    })
}

/// Share quantity for one side of the quote, zero to skip the side.
/// Order of operations: dollar target, remaining position budget, single
/// order cap, depth-usage cap, activation minimum, profile scale.
pub fn quote_size(
    price: Decimal,
    top_depth_shares: Decimal,
    position_value: Decimal,
    activation: Option<&Activation>,
    maker: &MakerConfig,
    tuning: &MakerTuning,
    profile: QuoteProfile,
) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let budget = (maker.max_position - position_value).max(Decimal::ZERO);
    let value = maker
        .order_size
        .min(budget)
        .min(maker.max_single_order_value);
    let mut shares = (value / price).floor();

    let depth_cap = (top_depth_shares * tuning.order_depth_usage).floor();
    shares = shares.min(depth_cap);

    if let Some(activation) = activation {
        if activation.active && shares > Decimal::ZERO {
            shares = shares.max(activation.min_shares);
        }
    }

    (shares * profile.size_scale()).floor().max(Decimal::ZERO)
}

/// Pre-placement fill-risk gate: true when the quote already sits within
/// the touch buffer of the opposite touch and should not be posted.
pub fn too_close_to_opposite(price: Decimal, opposite_touch: Decimal, buffer_bps: u32) -> bool {
    if price <= Decimal::ZERO {
        return true;
    }
    let distance_bps = (opposite_touch - price).abs() / price * dec!(10000);
    distance_bps < Decimal::from(buffer_bps)
}

/// Visible slice of an iceberg quote.
pub fn iceberg_display_size(full_shares: Decimal, tuning: &MakerTuning) -> Decimal {
    (full_shares * tuning.iceberg_ratio)
        .floor()
        .max(Decimal::ONE)
        .min(tuning.iceberg_max_chunk_shares)
}

fn top_depth(levels: &[common::OrderbookLevel], depth_levels: usize) -> Decimal {
    levels
        .iter()
        .take(depth_levels.max(1))
        .map(|l| l.shares)
        .sum()
}
