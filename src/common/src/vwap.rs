//! Depth-aware fill estimation.
//!
//! Pure functions that walk one side of an orderbook to price a target
//! quantity, including fees and a synthetic slippage buffer. All outputs are
//! in $1-payout units. No I/O.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::OrderbookLevel;

const BPS: Decimal = dec!(10000);

/// Fee model applied per level: `price * (fee_bps/10000 + curve_rate * fill^curve_exp)`,
/// where `fill` is the share quantity taken at that level. The default curve
/// (0, 0) reduces to the flat fee. Slippage is a separate buffer of
/// `price * slippage_bps/10000` per share.
#[derive(Debug, Clone, Default)]
pub struct FeeParams {
    pub fee_bps: u32,
    pub curve_rate: Decimal,
    pub curve_exp: f64,
    pub slippage_bps: u32,
}

impl FeeParams {
    pub fn flat(fee_bps: u32, slippage_bps: u32) -> Self {
        Self {
            fee_bps,
            curve_rate: Decimal::ZERO,
            curve_exp: 0.0,
            slippage_bps,
        }
    }

    fn fee_rate_for(&self, fill: Decimal) -> Decimal {
        let mut rate = Decimal::from(self.fee_bps) / BPS;
        if self.curve_rate > Decimal::ZERO {
            let f = fill.to_f64().unwrap_or(0.0);
            let curved = self.curve_rate.to_f64().unwrap_or(0.0) * f.powf(self.curve_exp);
            rate += Decimal::try_from(curved).unwrap_or(Decimal::ZERO);
        }
        rate
    }

    fn slippage_rate(&self) -> Decimal {
        Decimal::from(self.slippage_bps) / BPS
    }
}

/// Result of walking a book side for a target quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEstimate {
    /// Raw volume-weighted price, excluding fees and slippage.
    pub avg_price: Decimal,
    pub total_notional: Decimal,
    pub total_fees: Decimal,
    pub total_slippage: Decimal,
    /// Buy: notional + fees + slippage. Sell: proceeds - fees - slippage.
    pub total_all_in: Decimal,
    pub avg_all_in: Decimal,
    pub levels_used: usize,
}

/// Estimate the cost of buying `shares` against the ask side.
/// Returns `None` when depth is insufficient or the request is non-positive.
pub fn estimate_buy(
    asks: &[OrderbookLevel],
    shares: Decimal,
    fees: &FeeParams,
) -> Option<FillEstimate> {
    walk(asks, shares, fees, true)
}

/// Estimate the proceeds of selling `shares` into the bid side.
pub fn estimate_sell(
    bids: &[OrderbookLevel],
    shares: Decimal,
    fees: &FeeParams,
) -> Option<FillEstimate> {
    walk(bids, shares, fees, false)
}

fn walk(
    levels: &[OrderbookLevel],
    shares: Decimal,
    fees: &FeeParams,
    is_buy: bool,
) -> Option<FillEstimate> {
    if shares <= Decimal::ZERO {
        return None;
    }

    let mut remaining = shares;
    let mut notional = Decimal::ZERO;
    let mut total_fees = Decimal::ZERO;
    let mut total_slippage = Decimal::ZERO;
    let mut levels_used = 0usize;

    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(level.shares);
        if take <= Decimal::ZERO {
            continue;
        }
        notional += take * level.price;
        total_fees += take * level.price * fees.fee_rate_for(take);
        total_slippage += take * level.price * fees.slippage_rate();
        levels_used += 1;
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        return None;
    }

    let total_all_in = if is_buy {
        notional + total_fees + total_slippage
    } else {
        notional - total_fees - total_slippage
    };

    Some(FillEstimate {
        avg_price: notional / shares,
        total_notional: notional,
        total_fees,
        total_slippage,
        total_all_in,
        avg_all_in: total_all_in / shares,
        levels_used,
    })
}

/// Largest whole number of shares `n` for which the raw buy VWAP stays within
/// `max_deviation_bps` of `best_ask`. Walks levels with a closed-form bound
/// per level instead of re-estimating every candidate size.
pub fn max_buy_shares_for_limit(
    asks: &[OrderbookLevel],
    best_ask: Decimal,
    max_deviation_bps: u32,
) -> Decimal {
    if asks.is_empty() || best_ask <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let limit = best_ask * (Decimal::ONE + Decimal::from(max_deviation_bps) / BPS);

    let mut cum_shares = Decimal::ZERO;
    let mut cum_cost = Decimal::ZERO;

    for level in asks {
        if level.price <= limit {
            cum_cost += level.shares * level.price;
            cum_shares += level.shares;
            continue;
        }
        // (cum_cost + p*x) / (cum_shares + x) <= limit
        //   => x <= (limit*cum_shares - cum_cost) / (p - limit)
        let headroom = limit * cum_shares - cum_cost;
        if headroom <= Decimal::ZERO {
            break;
        }
        let extra = (headroom / (level.price - limit)).min(level.shares);
        if extra > Decimal::ZERO {
            cum_cost += extra * level.price;
            cum_shares += extra;
        }
        break;
    }

    cum_shares.floor()
}

/// Total share quantity across levels.
pub fn sum_depth(levels: &[OrderbookLevel]) -> Decimal {
    levels.iter().map(|l| l.shares).sum()
}

/// Dollar notional across levels.
pub fn sum_notional(levels: &[OrderbookLevel]) -> Decimal {
    levels.iter().map(|l| l.notional()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(spec: &[(&str, &str)]) -> Vec<OrderbookLevel> {
        spec.iter()
            .map(|(p, s)| OrderbookLevel::new(p.parse().unwrap(), s.parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_estimate_buy_single_level() {
        let asks = levels(&[("0.42", "200")]);
        let est = estimate_buy(&asks, dec!(100), &FeeParams::default()).unwrap();
        assert_eq!(est.avg_price, dec!(0.42));
        assert_eq!(est.total_notional, dec!(42.00));
        assert_eq!(est.levels_used, 1);
        // No fees, no slippage: all-in equals raw.
        assert_eq!(est.avg_all_in, est.avg_price);
    }

    #[test]
    fn test_estimate_buy_spans_levels() {
        let asks = levels(&[("0.40", "10"), ("0.60", "500")]);
        let est = estimate_buy(&asks, dec!(500), &FeeParams::default()).unwrap();
        // (10*0.40 + 490*0.60) / 500 = 0.596
        assert_eq!(est.avg_price, dec!(0.596));
        assert_eq!(est.levels_used, 2);
        // VWAP never beats the top of book.
        assert!(est.avg_price >= asks[0].price);
    }

    #[test]
    fn test_estimate_buy_empty_and_insufficient_depth() {
        assert!(estimate_buy(&[], dec!(10), &FeeParams::default()).is_none());
        let asks = levels(&[("0.50", "5")]);
        assert!(estimate_buy(&asks, dec!(10), &FeeParams::default()).is_none());
        assert!(estimate_buy(&asks, Decimal::ZERO, &FeeParams::default()).is_none());
    }

    #[test]
    fn test_estimate_buy_with_fees_and_slippage() {
        let asks = levels(&[("0.50", "100")]);
        let fees = FeeParams::flat(200, 100); // 2% fee, 1% slippage
        let est = estimate_buy(&asks, dec!(100), &fees).unwrap();
        assert_eq!(est.total_notional, dec!(50.00));
        assert_eq!(est.total_fees, dec!(1.0000));
        assert_eq!(est.total_slippage, dec!(0.5000));
        assert_eq!(est.total_all_in, dec!(51.5000));
        assert_eq!(est.avg_all_in, dec!(0.515000));
    }

    #[test]
    fn test_estimate_sell_subtracts_costs() {
        let bids = levels(&[("0.60", "50"), ("0.58", "50")]);
        let fees = FeeParams::flat(100, 0);
        let est = estimate_sell(&bids, dec!(100), &fees).unwrap();
        assert_eq!(est.avg_price, dec!(0.59));
        assert!(est.avg_all_in < est.avg_price);
        // Sell VWAP never beats the best bid.
        assert!(est.avg_price <= bids[0].price);
    }

    #[test]
    fn test_curved_fee_exceeds_flat() {
        let asks = levels(&[("0.50", "100")]);
        let flat = FeeParams::flat(100, 0);
        let curved = FeeParams {
            fee_bps: 100,
            curve_rate: dec!(0.0001),
            curve_exp: 1.0,
            slippage_bps: 0,
        };
        let a = estimate_buy(&asks, dec!(100), &flat).unwrap();
        let b = estimate_buy(&asks, dec!(100), &curved).unwrap();
        assert!(b.total_fees > a.total_fees);
    }

    #[test]
    fn test_max_buy_shares_all_within_limit() {
        let asks = levels(&[("0.50", "100"), ("0.501", "100")]);
        // 100 bps allows VWAP up to 0.505; everything fits.
        let n = max_buy_shares_for_limit(&asks, dec!(0.50), 100);
        assert_eq!(n, dec!(200));
    }

    #[test]
    fn test_max_buy_shares_partial_second_level() {
        let asks = levels(&[("0.40", "10"), ("0.60", "500")]);
        let n = max_buy_shares_for_limit(&asks, dec!(0.40), 100);
        // limit = 0.404; (4.0 + 0.6x) / (10 + x) <= 0.404 => x <= 0.204...
        assert_eq!(n, dec!(10));
        // And the bound is consistent with a direct estimate.
        let est = estimate_buy(&asks, n, &FeeParams::default()).unwrap();
        assert!(est.avg_price <= dec!(0.404));
    }

    #[test]
    fn test_max_buy_shares_empty_book() {
        assert_eq!(max_buy_shares_for_limit(&[], dec!(0.5), 100), Decimal::ZERO);
    }

    #[test]
    fn test_sum_depth() {
        let asks = levels(&[("0.40", "10"), ("0.60", "500")]);
        assert_eq!(sum_depth(&asks), dec!(510));
        assert_eq!(sum_notional(&asks), dec!(304.00));
        assert_eq!(sum_depth(&[]), Decimal::ZERO);
    }
}
