//! Multi-outcome bundle detector.
//!
//! For condition groups with three or more outcomes, buying every outcome
//! pays $1 at settlement; when the asks sum below that, the bundle is free
//! money up to the shared depth.

use rust_decimal::Decimal;
use std::collections::HashMap;

use common::{
    estimate_buy, sum_depth, FeeParams, Leg, Market, MultiOutcomeConfig, Opportunity,
    OpportunityKind, Orderbook, OrderSide, RiskLevel, Venue,
};

use super::{shrink_search, Detector, Snapshot, OPPORTUNITY_TTL_MS};

const MULTI_CONFIDENCE: f64 = 0.9;

pub struct MultiOutcomeDetector {
    cfg: MultiOutcomeConfig,
    min_profit: Decimal,
    depth_usage: Decimal,
    slippage_bps: u32,
}

impl MultiOutcomeDetector {
    pub fn new(
        cfg: MultiOutcomeConfig,
        min_profit: Decimal,
        depth_usage: Decimal,
        slippage_bps: u32,
    ) -> Self {
        Self {
            cfg,
            min_profit,
            depth_usage,
            slippage_bps,
        }
    }

    fn groups<'a>(&self, markets: &'a [Market]) -> Vec<(String, Vec<&'a Market>)> {
        let mut groups: HashMap<String, Vec<&Market>> = HashMap::new();
        for market in markets.iter().filter(|m| m.venue == Venue::Predict) {
            if let Some(condition) = &market.condition_id {
                groups.entry(condition.clone()).or_default().push(market);
            }
        }
        groups
            .into_iter()
            .filter(|(_, members)| members.len() >= self.cfg.min_outcomes)
            .collect()
    }
}

impl Detector for MultiOutcomeDetector {
    fn name(&self) -> &'static str {
        "multi_outcome"
    }

    fn scan(&self, snapshot: &Snapshot) -> Vec<Opportunity> {
        if !self.cfg.enabled {
            return Vec::new();
        }
        let mut opportunities = Vec::new();

        for (group_id, members) in self.groups(&snapshot.markets) {
            // Every outcome needs a valid book or the bundle cannot close.
            let books: Option<Vec<(&Market, &Orderbook)>> = members
                .iter()
                .map(|m| {
                    snapshot
                        .valid_book(Venue::Predict, &m.token_id)
                        .map(|b| (*m, b))
                })
                .collect();
            let Some(books) = books else { continue };
            if books.iter().any(|(_, b)| b.asks.is_empty()) {
                continue;
            }

            let min_depth = books
                .iter()
                .map(|(_, b)| sum_depth(&b.asks))
                .min()
                .unwrap_or(Decimal::ZERO);
            let start = (self.depth_usage * min_depth).min(self.cfg.max_shares);

            let found = shrink_search(start, |n| {
                let mut sum_all_in = Decimal::ZERO;
                let mut legs = Vec::with_capacity(books.len());
                for (market, book) in &books {
                    let fees = FeeParams::flat(market.fee_rate_bps, self.slippage_bps);
                    let est = estimate_buy(&book.asks, n, &fees)?;
                    sum_all_in += est.total_all_in;
                    legs.push(Leg {
                        venue: Venue::Predict,
                        token_id: market.token_id.clone(),
                        side: OrderSide::Buy,
                        price: est.avg_price,
                        shares: n,
                    });
                }
                let per_share = sum_all_in / n;
                let edge = Decimal::ONE - per_share;
                if edge < self.min_profit {
                    return None;
                }
                Some((edge, legs))
            });

            if let Some((shares, edge, legs)) = found {
                opportunities.push(Opportunity::new(
                    OpportunityKind::MultiOutcome {
                        group_id: group_id.clone(),
                        shares,
                    },
                    edge,
                    MULTI_CONFIDENCE,
                    RiskLevel::Low,
                    legs,
                    OPPORTUNITY_TTL_MS,
                ));
            }
        }

        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Outcome, OrderbookLevel};
    use rust_decimal_macros::dec;

    fn market(token: &str, condition: &str) -> Market {
        Market {
            venue: Venue::Predict,
            token_id: token.to_string(),
            question: format!("Outcome {token}"),
            condition_id: Some(condition.to_string()),
            event_id: None,
            outcome: Outcome::Unknown,
            is_neg_risk: true,
            is_yield_bearing: false,
            fee_rate_bps: 0,
            activation: None,
            liquidity_24h: None,
            volume_24h: None,
            end_time: None,
        }
    }

    fn book(token: &str, ask: f64, size: f64) -> Orderbook {
        Orderbook::new(
            token,
            vec![OrderbookLevel::new(
                Decimal::try_from(ask - 0.02).unwrap(),
                dec!(50),
            )],
            vec![OrderbookLevel::new(
                Decimal::try_from(ask).unwrap(),
                Decimal::try_from(size).unwrap(),
            )],
            Utc::now(),
        )
    }

    fn detector() -> MultiOutcomeDetector {
        MultiOutcomeDetector::new(
            MultiOutcomeConfig {
                enabled: true,
                min_outcomes: 3,
                max_shares: dec!(500),
            },
            dec!(0.02),
            dec!(0.5),
            0,
        )
    }

    fn snapshot(asks: &[(&str, f64)]) -> Snapshot {
        let mut snap = Snapshot::default();
        for (token, ask) in asks {
            snap.markets.push(market(token, "cond-1"));
            snap.insert_book(Venue::Predict, book(token, *ask, 200.0));
        }
        snap
    }

    #[test]
    fn test_bundle_below_one_is_emitted() {
        // 0.30 + 0.30 + 0.35 = 0.95 -> edge 0.05.
        let snap = snapshot(&[("a", 0.30), ("b", 0.30), ("c", 0.35)]);
        let opps = detector().scan(&snap);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].edge, dec!(0.05));
        assert_eq!(opps[0].legs.len(), 3);
        match &opps[0].kind {
            OpportunityKind::MultiOutcome { group_id, shares } => {
                assert_eq!(group_id, "cond-1");
                assert_eq!(*shares, dec!(100)); // 0.5 * 200 depth
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_bundle_above_one_is_silent() {
        let snap = snapshot(&[("a", 0.40), ("b", 0.40), ("c", 0.35)]);
        assert!(detector().scan(&snap).is_empty());
    }

    #[test]
    fn test_too_few_outcomes_is_silent() {
        let snap = snapshot(&[("a", 0.30), ("b", 0.30)]);
        assert!(detector().scan(&snap).is_empty());
    }

    #[test]
    fn test_missing_book_kills_group() {
        let mut snap = snapshot(&[("a", 0.30), ("b", 0.30)]);
        snap.markets.push(market("c", "cond-1"));
        // No book for "c".
        assert!(detector().scan(&snap).is_empty());
    }

    #[test]
    fn test_disabled_detector_is_silent() {
        let snap = snapshot(&[("a", 0.30), ("b", 0.30), ("c", 0.35)]);
        let detector = MultiOutcomeDetector::new(
            MultiOutcomeConfig {
                enabled: false,
                min_outcomes: 3,
                max_shares: dec!(500),
            },
            dec!(0.02),
            dec!(0.5),
            0,
        );
        assert!(detector.scan(&snap).is_empty());
    }
}
