//! Same-venue YES/NO parity detector.
//!
//! Pairs outcome tokens of one underlying market and looks for the two
//! mispricings: buying both sides below $1 or (when shorting is allowed)
//! selling both sides above $1. Depth-aware with per-side VWAP deviation
//! and level caps, dollar floors, and a hard recheck band.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use common::{
    estimate_buy, estimate_sell, sum_depth, sum_notional, ArbConfig, FeeParams, Leg, Market,
    Opportunity, OpportunityKind, Orderbook, OrderSide, Outcome, PairAction, RiskLevel, Venue,
};

use super::{deviation_bps, shrink_search, Detector, Snapshot, OPPORTUNITY_TTL_MS};

/// Parity detections are near-mechanical once depth passes the filters.
const INTRA_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct IntraConfig {
    pub min_profit: Decimal,
    pub depth_usage: Decimal,
    pub max_recommended_shares: Decimal,
    pub max_vwap_deviation_bps: u32,
    pub max_vwap_levels: usize,
    pub min_notional_usd: Decimal,
    pub min_profit_usd: Decimal,
    pub min_depth_usd: Decimal,
    pub recheck_deviation_bps: u32,
    pub allow_shorting: bool,
    pub slippage_bps: u32,
}

impl From<&ArbConfig> for IntraConfig {
    fn from(cfg: &ArbConfig) -> Self {
        Self {
            min_profit: cfg.min_profit,
            depth_usage: cfg.depth_usage,
            max_recommended_shares: cfg.max_recommended_shares,
            max_vwap_deviation_bps: cfg.max_vwap_deviation_bps,
            max_vwap_levels: cfg.max_vwap_levels,
            min_notional_usd: cfg.min_notional_usd,
            min_profit_usd: cfg.min_profit_usd,
            min_depth_usd: cfg.min_depth_usd,
            recheck_deviation_bps: cfg.recheck_deviation_bps,
            allow_shorting: cfg.allow_shorting,
            slippage_bps: cfg.slippage_bps,
        }
    }
}

pub struct IntraVenueDetector {
    cfg: IntraConfig,
}

struct PairCandidate {
    per_share: Decimal,
    yes_dev: Decimal,
    no_dev: Decimal,
    yes_price: Decimal,
    no_price: Decimal,
}

impl IntraVenueDetector {
    pub fn new(cfg: IntraConfig) -> Self {
        Self { cfg }
    }

    /// Group predict markets into YES/NO pairs by condition, event or
    /// normalized question. Pairs need both outcome labels.
    fn pairs<'a>(markets: &'a [Market]) -> Vec<(&'a Market, &'a Market, String)> {
        let mut groups: HashMap<String, Vec<&Market>> = HashMap::new();
        for market in markets.iter().filter(|m| m.venue == Venue::Predict) {
            groups.entry(market.group_key()).or_default().push(market);
        }

        let mut pairs = Vec::new();
        for (key, members) in groups {
            let yes = members.iter().find(|m| m.outcome == Outcome::Yes);
            let no = members.iter().find(|m| m.outcome == Outcome::No);
            if let (Some(yes), Some(no)) = (yes, no) {
                pairs.push((*yes, *no, key));
            }
        }
        pairs
    }

    fn evaluate_action(
        &self,
        action: PairAction,
        yes_book: &Orderbook,
        no_book: &Orderbook,
        yes_fees: &FeeParams,
        no_fees: &FeeParams,
    ) -> Option<(Decimal, Decimal, PairCandidate)> {
        let (yes_levels, no_levels) = match action {
            PairAction::BuyBoth => (&yes_book.asks, &no_book.asks),
            PairAction::SellBoth => (&yes_book.bids, &no_book.bids),
        };
        let (yes_touch, no_touch) = (yes_levels.first()?.price, no_levels.first()?.price);

        // Dollar floor on available depth before any sizing.
        let depth_usd = sum_notional(yes_levels).min(sum_notional(no_levels));
        if depth_usd < self.cfg.min_depth_usd {
            return None;
        }

        let start = (self.cfg.depth_usage
            * sum_depth(yes_levels).min(sum_depth(no_levels)))
        .min(self.cfg.max_recommended_shares);

        let max_dev = Decimal::from(self.cfg.max_vwap_deviation_bps);
        let found = shrink_search(start, |n| {
            let (yes_est, no_est) = match action {
                PairAction::BuyBoth => (
                    estimate_buy(yes_levels, n, yes_fees)?,
                    estimate_buy(no_levels, n, no_fees)?,
                ),
                PairAction::SellBoth => (
                    estimate_sell(yes_levels, n, yes_fees)?,
                    estimate_sell(no_levels, n, no_fees)?,
                ),
            };
            if yes_est.levels_used > self.cfg.max_vwap_levels
                || no_est.levels_used > self.cfg.max_vwap_levels
            {
                return None;
            }
            let yes_dev = deviation_bps(yes_est.avg_price, yes_touch);
            let no_dev = deviation_bps(no_est.avg_price, no_touch);
            if yes_dev > max_dev || no_dev > max_dev {
                return None;
            }

            let per_share = yes_est.avg_all_in + no_est.avg_all_in;
            let edge = match action {
                PairAction::BuyBoth => Decimal::ONE - per_share,
                PairAction::SellBoth => per_share - Decimal::ONE,
            };
            if edge < self.cfg.min_profit {
                return None;
            }
            if edge * n < self.cfg.min_profit_usd {
                return None;
            }
            let notional = yes_est.total_all_in.abs() + no_est.total_all_in.abs();
            if notional < self.cfg.min_notional_usd {
                return None;
            }

            Some((
                edge,
                PairCandidate {
                    per_share,
                    yes_dev,
                    no_dev,
                    yes_price: yes_est.avg_price,
                    no_price: no_est.avg_price,
                },
            ))
        });

        let (shares, edge, candidate) = found?;

        // Hard drop: depth moved too far from the touch for this size.
        let recheck = Decimal::from(self.cfg.recheck_deviation_bps);
        if candidate.yes_dev > recheck || candidate.no_dev > recheck {
            debug!(
                "intra pair dropped by recheck band ({} / {} bps)",
                candidate.yes_dev, candidate.no_dev
            );
            return None;
        }

        Some((shares, edge, candidate))
    }
}

impl Detector for IntraVenueDetector {
    fn name(&self) -> &'static str {
        "intra_venue"
    }

    fn scan(&self, snapshot: &Snapshot) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for (yes, no, group_key) in Self::pairs(&snapshot.markets) {
            let Some(yes_book) = snapshot.valid_book(Venue::Predict, &yes.token_id) else {
                continue;
            };
            let Some(no_book) = snapshot.valid_book(Venue::Predict, &no.token_id) else {
                continue;
            };
            let yes_fees = FeeParams::flat(yes.fee_rate_bps, self.cfg.slippage_bps);
            let no_fees = FeeParams::flat(no.fee_rate_bps, self.cfg.slippage_bps);

            let mut actions = vec![PairAction::BuyBoth];
            if self.cfg.allow_shorting {
                actions.push(PairAction::SellBoth);
            }

            for action in actions {
                let Some((shares, edge, candidate)) =
                    self.evaluate_action(action, yes_book, no_book, &yes_fees, &no_fees)
                else {
                    continue;
                };
                let side = match action {
                    PairAction::BuyBoth => OrderSide::Buy,
                    PairAction::SellBoth => OrderSide::Sell,
                };
                opportunities.push(Opportunity::new(
                    OpportunityKind::IntraVenue {
                        market_id: group_key.clone(),
                        yes_token: yes.token_id.clone(),
                        no_token: no.token_id.clone(),
                        action,
                        shares,
                        per_share_cost: candidate.per_share,
                    },
                    edge,
                    INTRA_CONFIDENCE,
                    RiskLevel::Low,
                    vec![
                        Leg {
                            venue: Venue::Predict,
                            token_id: yes.token_id.clone(),
                            side,
                            price: candidate.yes_price,
                            shares,
                        },
                        Leg {
                            venue: Venue::Predict,
                            token_id: no.token_id.clone(),
                            side,
                            price: candidate.no_price,
                            shares,
                        },
                    ],
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
    use common::OrderbookLevel;
    use rust_decimal_macros::dec;

    fn market(token: &str, outcome: Outcome) -> Market {
        Market {
            venue: Venue::Predict,
            token_id: token.to_string(),
            question: "Will it settle YES?".into(),
            condition_id: Some("cond-1".into()),
            event_id: None,
            outcome,
            is_neg_risk: false,
            is_yield_bearing: false,
            fee_rate_bps: 0,
            activation: None,
            liquidity_24h: None,
            volume_24h: None,
            end_time: None,
        }
    }

    fn book(token: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Orderbook {
        let to_levels = |spec: &[(f64, f64)]| {
            spec.iter()
                .map(|(p, s)| {
                    OrderbookLevel::new(
                        Decimal::try_from(*p).unwrap(),
                        Decimal::try_from(*s).unwrap(),
                    )
                })
                .collect::<Vec<_>>()
        };
        Orderbook::new(token, to_levels(bids), to_levels(asks), Utc::now())
    }

    fn cfg() -> IntraConfig {
        IntraConfig {
            min_profit: dec!(0.02),
            depth_usage: dec!(0.5),
            max_recommended_shares: dec!(100),
            max_vwap_deviation_bps: 100,
            max_vwap_levels: 5,
            min_notional_usd: dec!(10),
            min_profit_usd: dec!(1),
            min_depth_usd: dec!(25),
            recheck_deviation_bps: 150,
            allow_shorting: false,
            slippage_bps: 0,
        }
    }

    fn snapshot(books: Vec<Orderbook>) -> Snapshot {
        let mut snap = Snapshot {
            markets: vec![market("yes-tok", Outcome::Yes), market("no-tok", Outcome::No)],
            ..Snapshot::default()
        };
        for b in books {
            snap.insert_book(Venue::Predict, b);
        }
        snap
    }

    #[test]
    fn test_buy_both_exact() {
        // YES asks (0.42, 200), NO asks (0.55, 200), fees 0, min profit 0.02,
        // max shares 100 -> BUY_BOTH size 100, per-share 0.97, edge 0.03.
        let snap = snapshot(vec![
            book("yes-tok", &[(0.41, 50.0)], &[(0.42, 200.0)]),
            book("no-tok", &[(0.54, 50.0)], &[(0.55, 200.0)]),
        ]);
        let detector = IntraVenueDetector::new(cfg());
        let opps = detector.scan(&snap);

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.edge, dec!(0.03));
        match &opp.kind {
            OpportunityKind::IntraVenue {
                action,
                shares,
                per_share_cost,
                ..
            } => {
                assert_eq!(*action, PairAction::BuyBoth);
                assert_eq!(*shares, dec!(100));
                assert_eq!(*per_share_cost, dec!(0.97));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(opp.legs.len(), 2);
        assert_eq!(opp.legs[0].side, OrderSide::Buy);
    }

    #[test]
    fn test_rejected_by_vwap_deviation() {
        // S2: deep second level blows the deviation cap at every size.
        let mut config = cfg();
        config.depth_usage = dec!(1.0);
        config.max_recommended_shares = dec!(500);
        let snap = snapshot(vec![
            book("yes-tok", &[(0.39, 50.0)], &[(0.40, 10.0), (0.60, 500.0)]),
            book("no-tok", &[(0.54, 50.0)], &[(0.55, 500.0)]),
        ]);
        let detector = IntraVenueDetector::new(config);
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_no_opportunity_when_sum_above_one() {
        let snap = snapshot(vec![
            book("yes-tok", &[(0.49, 50.0)], &[(0.50, 200.0)]),
            book("no-tok", &[(0.51, 50.0)], &[(0.52, 200.0)]),
        ]);
        let detector = IntraVenueDetector::new(cfg());
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_sell_both_requires_shorting() {
        // Bids sum above $1: sellable only when shorting is allowed.
        let books = || {
            vec![
                book("yes-tok", &[(0.52, 200.0)], &[(0.53, 50.0)]),
                book("no-tok", &[(0.52, 200.0)], &[(0.53, 50.0)]),
            ]
        };
        let detector = IntraVenueDetector::new(cfg());
        assert!(detector.scan(&snapshot(books())).is_empty());

        let mut config = cfg();
        config.allow_shorting = true;
        let detector = IntraVenueDetector::new(config);
        let opps = detector.scan(&snapshot(books()));
        assert_eq!(opps.len(), 1);
        match &opps[0].kind {
            OpportunityKind::IntraVenue { action, .. } => {
                assert_eq!(*action, PairAction::SellBoth)
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(opps[0].edge, dec!(0.04));
        assert_eq!(opps[0].legs[0].side, OrderSide::Sell);
    }

    #[test]
    fn test_crossed_book_emits_nothing() {
        // A degenerate touch fails validation and the pair is skipped.
        let mut bad = book("yes-tok", &[(0.50, 100.0)], &[(0.50, 100.0)]);
        bad.updated_at = Utc::now();
        let snap = snapshot(vec![bad, book("no-tok", &[(0.44, 50.0)], &[(0.45, 200.0)])]);
        let detector = IntraVenueDetector::new(cfg());
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_emitted_edge_reproduces_from_legs() {
        // Invariant 7: rebuilding the edge from the carried legs matches.
        let snap = snapshot(vec![
            book("yes-tok", &[(0.41, 50.0)], &[(0.42, 200.0)]),
            book("no-tok", &[(0.54, 50.0)], &[(0.55, 200.0)]),
        ]);
        let detector = IntraVenueDetector::new(cfg());
        let opps = detector.scan(&snap);
        let opp = &opps[0];
        let rebuilt: Decimal = Decimal::ONE - opp.legs.iter().map(|l| l.price).sum::<Decimal>();
        assert_eq!(rebuilt, opp.edge);
    }

    #[test]
    fn test_pairs_fall_back_to_question_grouping() {
        let mut yes = market("yes-tok", Outcome::Yes);
        yes.condition_id = None;
        let mut no = market("no-tok", Outcome::No);
        no.condition_id = None;
        let markets = [yes, no];
        let pairs = IntraVenueDetector::pairs(&markets);
        assert_eq!(pairs.len(), 1);
    }
}
