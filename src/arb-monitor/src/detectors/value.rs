//! Value-mismatch detector.
//!
//! Compares the size-weighted fair estimate against the arithmetic mid and
//! reports tokens priced away from fair by more than the trading cost, when
//! the book-quality confidence clears the floor.

use rust_decimal::Decimal;

use common::{
    fair_value, sum_depth, Leg, Market, Opportunity, OpportunityKind, OrderSide, RiskLevel,
    Venue,
};

use super::{Detector, Snapshot, OPPORTUNITY_TTL_MS};

#[derive(Debug, Clone)]
pub struct ValueConfig {
    /// Net relative edge required after trading costs.
    pub edge_threshold: Decimal,
    pub confidence_threshold: f64,
    /// Round-trip cost assumption subtracted from the raw mispricing.
    pub trading_cost: Decimal,
    /// Fraction of touch depth sized into the single leg.
    pub depth_usage: Decimal,
}

pub struct ValueMismatchDetector {
    cfg: ValueConfig,
}

impl ValueMismatchDetector {
    pub fn new(cfg: ValueConfig) -> Self {
        Self { cfg }
    }
}

impl Detector for ValueMismatchDetector {
    fn name(&self) -> &'static str {
        "value_mismatch"
    }

    fn scan(&self, snapshot: &Snapshot) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for market in snapshot.markets.iter().filter(|m| m.venue == Venue::Predict) {
            let Some(book) = snapshot.valid_book(Venue::Predict, &market.token_id) else {
                continue;
            };
            let Some(value) = fair_value::estimate(market, book) else {
                continue;
            };
            if value.confidence < self.cfg.confidence_threshold {
                continue;
            }
            if value.mid <= Decimal::ZERO {
                continue;
            }

            let edge = (value.fair - value.mid).abs() / value.mid - self.cfg.trading_cost;
            if edge < self.cfg.edge_threshold {
                continue;
            }

            // Under-priced -> BUY at the ask; over-priced -> SELL at the bid.
            let (side, level, levels) = if value.fair > value.mid {
                let Some(ask) = book.best_ask() else { continue };
                (OrderSide::Buy, ask, &book.asks)
            } else {
                let Some(bid) = book.best_bid() else { continue };
                (OrderSide::Sell, bid, &book.bids)
            };
            let shares = (sum_depth(&levels[..1.min(levels.len())]) * self.cfg.depth_usage).floor();
            if shares < Decimal::ONE {
                continue;
            }

            opportunities.push(Opportunity::new(
                OpportunityKind::ValueMismatch {
                    token_id: market.token_id.clone(),
                    side,
                    fair_price: value.fair,
                },
                edge,
                value.confidence,
                RiskLevel::High,
                vec![Leg {
                    venue: Venue::Predict,
                    token_id: market.token_id.clone(),
                    side,
                    price: level.price,
                    shares,
                }],
                OPPORTUNITY_TTL_MS,
            ));
        }

        opportunities
    }
}
