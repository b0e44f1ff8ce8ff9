//! Cross-venue pair detector.
//!
//! For every venue pair sharing a market, prices the directed assemblies
//! (YES on one venue + NO on the other, both directions, plus the sell
//! assemblies when enabled) and keeps the best one. Pairing prefers the
//! mapping file and falls back to question similarity.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use common::{
    estimate_buy, estimate_sell, question_similarity, sum_depth, CrossVenueConfig, FeeParams,
    Leg, MappingTable, Market, Opportunity, OpportunityKind, Orderbook, OrderSide, Outcome,
    PairAction, RiskLevel, Venue,
};

use super::{shrink_search, Detector, Snapshot, OPPORTUNITY_TTL_MS};

/// One side of a cross-venue pair: the venue and its YES/NO token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSide {
    pub venue: Venue,
    pub yes_token: String,
    pub no_token: String,
}

/// A matched market across two venues.
#[derive(Debug, Clone)]
pub struct CrossPair {
    pub pair_id: String,
    pub a: PairSide,
    pub b: PairSide,
    /// 1.0 for mapping-file matches, the Jaccard score otherwise.
    pub similarity: f64,
}

/// Build venue pairs for the snapshot: mapping file first, then question
/// similarity between YES legs of the remaining markets. Pure.
pub fn build_pairs(
    predict_markets: &[Market],
    peer_markets: &std::collections::HashMap<Venue, Vec<Market>>,
    mapping: &MappingTable,
    cfg: &CrossVenueConfig,
) -> Vec<CrossPair> {
    let mut pairs = Vec::new();

    // Predict YES/NO pairs by group key.
    let mut predict_sides: Vec<(String, String, PairSide)> = Vec::new();
    {
        let mut groups: std::collections::HashMap<String, (Option<&Market>, Option<&Market>)> =
            std::collections::HashMap::new();
        for market in predict_markets {
            let slot = groups.entry(market.group_key()).or_default();
            match market.outcome {
                Outcome::Yes => slot.0 = Some(market),
                Outcome::No => slot.1 = Some(market),
                Outcome::Unknown => {}
            }
        }
        for (key, (yes, no)) in groups {
            if let (Some(yes), Some(no)) = (yes, no) {
                predict_sides.push((
                    key,
                    yes.question.clone(),
                    PairSide {
                        venue: Venue::Predict,
                        yes_token: yes.token_id.clone(),
                        no_token: no.token_id.clone(),
                    },
                ));
            }
        }
    }

    // Peer YES/NO pairs by condition id.
    let peer_sides = |venue: Venue| -> Vec<(String, PairSide)> {
        let mut groups: std::collections::HashMap<String, (Option<&Market>, Option<&Market>)> =
            std::collections::HashMap::new();
        for market in peer_markets.get(&venue).map(Vec::as_slice).unwrap_or(&[]) {
            let slot = groups.entry(market.group_key()).or_default();
            match market.outcome {
                Outcome::Yes => slot.0 = Some(market),
                Outcome::No => slot.1 = Some(market),
                Outcome::Unknown => {}
            }
        }
        groups
            .into_iter()
            .filter_map(|(_, (yes, no))| {
                let (yes, no) = (yes?, no?);
                Some((
                    yes.question.clone(),
                    PairSide {
                        venue,
                        yes_token: yes.token_id.clone(),
                        no_token: no.token_id.clone(),
                    },
                ))
            })
            .collect()
    };

    for venue in [Venue::Polymarket, Venue::Opinion] {
        let peers = peer_sides(venue);
        if peers.is_empty() {
            continue;
        }
        for (group_key, question, predict_side) in &predict_sides {
            // Mapping file wins.
            if cfg.use_mapping {
                if let Some((peer_yes, peer_no)) = mapping.resolve(group_key, question, venue) {
                    pairs.push(CrossPair {
                        pair_id: format!("{group_key}:{venue}"),
                        a: predict_side.clone(),
                        b: PairSide {
                            venue,
                            yes_token: peer_yes.to_string(),
                            no_token: peer_no.to_string(),
                        },
                        similarity: 1.0,
                    });
                    continue;
                }
            }
            // Textual fallback: best peer above the similarity floor.
            let best = peers
                .iter()
                .map(|(peer_question, side)| {
                    (question_similarity(question, peer_question), side)
                })
                .filter(|(score, _)| *score >= cfg.min_similarity)
                .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((similarity, side)) = best {
                pairs.push(CrossPair {
                    pair_id: format!("{group_key}:{venue}"),
                    a: predict_side.clone(),
                    b: side.clone(),
                    similarity,
                });
            }
        }
    }

    pairs
}

pub struct CrossVenueDetector {
    cfg: CrossVenueConfig,
    mapping: Arc<MappingTable>,
}

struct Assembly {
    action: PairAction,
    /// (venue, token, side, avg price) for both legs.
    legs: [(Venue, String, OrderSide, Decimal); 2],
}

impl CrossVenueDetector {
    pub fn new(cfg: CrossVenueConfig, mapping: Arc<MappingTable>) -> Self {
        Self { cfg, mapping }
    }

    /// Price one directed assembly at the best profitable size.
    fn evaluate_assembly(
        &self,
        action: PairAction,
        first: (&Orderbook, Venue, &str),
        second: (&Orderbook, Venue, &str),
    ) -> Option<(Decimal, Decimal, Assembly)> {
        let fees = FeeParams::flat(0, self.cfg.slippage_bps);
        let (first_levels, second_levels) = match action {
            PairAction::BuyBoth => (&first.0.asks, &second.0.asks),
            PairAction::SellBoth => (&first.0.bids, &second.0.bids),
        };
        if first_levels.is_empty() || second_levels.is_empty() {
            return None;
        }

        let start = (self.cfg.depth_usage
            * sum_depth(first_levels).min(sum_depth(second_levels)))
        .min(self.cfg.max_shares);

        let side = match action {
            PairAction::BuyBoth => OrderSide::Buy,
            PairAction::SellBoth => OrderSide::Sell,
        };

        let found = shrink_search(start, |n| {
            let (first_est, second_est) = match action {
                PairAction::BuyBoth => (
                    estimate_buy(first_levels, n, &fees)?,
                    estimate_buy(second_levels, n, &fees)?,
                ),
                PairAction::SellBoth => (
                    estimate_sell(first_levels, n, &fees)?,
                    estimate_sell(second_levels, n, &fees)?,
                ),
            };
            if first_est.levels_used > self.cfg.depth_levels
                || second_est.levels_used > self.cfg.depth_levels
            {
                return None;
            }
            let per_share = first_est.avg_all_in + second_est.avg_all_in;
            // Transfer cost is charged once per assembled share.
            let edge = match action {
                PairAction::BuyBoth => Decimal::ONE - per_share - self.cfg.transfer_cost,
                PairAction::SellBoth => per_share - Decimal::ONE - self.cfg.transfer_cost,
            };
            if edge < self.cfg.min_profit {
                return None;
            }
            Some((
                edge,
                Assembly {
                    action,
                    legs: [
                        (first.1, first.2.to_string(), side, first_est.avg_price),
                        (second.1, second.2.to_string(), side, second_est.avg_price),
                    ],
                },
            ))
        });

        found
    }

    fn scan_pair(&self, pair: &CrossPair, snapshot: &Snapshot) -> Option<Opportunity> {
        let a_yes = snapshot.valid_book(pair.a.venue, &pair.a.yes_token)?;
        let a_no = snapshot.valid_book(pair.a.venue, &pair.a.no_token)?;
        let b_yes = snapshot.valid_book(pair.b.venue, &pair.b.yes_token)?;
        let b_no = snapshot.valid_book(pair.b.venue, &pair.b.no_token)?;

        let mut assemblies = vec![
            // YES@A + NO@B and YES@B + NO@A.
            self.evaluate_assembly(
                PairAction::BuyBoth,
                (a_yes, pair.a.venue, &pair.a.yes_token),
                (b_no, pair.b.venue, &pair.b.no_token),
            ),
            self.evaluate_assembly(
                PairAction::BuyBoth,
                (b_yes, pair.b.venue, &pair.b.yes_token),
                (a_no, pair.a.venue, &pair.a.no_token),
            ),
        ];
        if self.cfg.allow_sell_both {
            assemblies.push(self.evaluate_assembly(
                PairAction::SellBoth,
                (a_yes, pair.a.venue, &pair.a.yes_token),
                (b_no, pair.b.venue, &pair.b.no_token),
            ));
            assemblies.push(self.evaluate_assembly(
                PairAction::SellBoth,
                (b_yes, pair.b.venue, &pair.b.yes_token),
                (a_no, pair.a.venue, &pair.a.no_token),
            ));
        }

        let (shares, edge, assembly) = assemblies
            .into_iter()
            .flatten()
            .max_by(|(_, a, _), (_, b, _)| a.cmp(b))?;

        let legs = assembly
            .legs
            .iter()
            .map(|(venue, token, side, price)| Leg {
                venue: *venue,
                token_id: token.clone(),
                side: *side,
                price: *price,
                shares,
            })
            .collect();

        Some(Opportunity::new(
            OpportunityKind::CrossVenue {
                pair_id: pair.pair_id.clone(),
                action: assembly.action,
                shares,
                similarity: pair.similarity,
            },
            edge,
            pair.similarity,
            RiskLevel::Med,
            legs,
            OPPORTUNITY_TTL_MS,
        ))
    }
}

impl Detector for CrossVenueDetector {
    fn name(&self) -> &'static str {
        "cross_venue"
    }

    fn scan(&self, snapshot: &Snapshot) -> Vec<Opportunity> {
        if !self.cfg.enabled {
            return Vec::new();
        }
        let pairs = build_pairs(
            &snapshot.markets,
            &snapshot.peer_markets,
            &self.mapping,
            &self.cfg,
        );
        debug!("cross-venue scan over {} pairs", pairs.len());
        pairs
            .iter()
            .filter_map(|pair| self.scan_pair(pair, snapshot))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{MappingEntry, OrderbookLevel};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn market(venue: Venue, token: &str, outcome: Outcome, question: &str) -> Market {
        Market {
            venue,
            token_id: token.to_string(),
            question: question.to_string(),
            condition_id: Some(match venue {
                Venue::Predict => "cond-1".to_string(),
                _ => format!("peer-{token}"),
            }),
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

    fn book(token: &str, bid: (f64, f64), ask: (f64, f64)) -> Orderbook {
        Orderbook::new(
            token,
            vec![OrderbookLevel::new(
                Decimal::try_from(bid.0).unwrap(),
                Decimal::try_from(bid.1).unwrap(),
            )],
            vec![OrderbookLevel::new(
                Decimal::try_from(ask.0).unwrap(),
                Decimal::try_from(ask.1).unwrap(),
            )],
            Utc::now(),
        )
    }

    fn mapped_table() -> MappingTable {
        let mut table = MappingTable::empty("/tmp/unused.json");
        table.upsert(MappingEntry {
            predict_market_id: Some("cond-1".into()),
            predict_question: Some("Will BTC close above $100k?".into()),
            polymarket_yes_token: Some("pm-yes".into()),
            polymarket_no_token: Some("pm-no".into()),
            opinion_yes_token: None,
            opinion_no_token: None,
        });
        table
    }

    fn cfg() -> CrossVenueConfig {
        CrossVenueConfig {
            enabled: true,
            min_profit: dec!(0.03),
            min_similarity: 0.6,
            transfer_cost: dec!(0.01),
            slippage_bps: 0,
            max_shares: dec!(500),
            depth_levels: 5,
            depth_usage: dec!(1.0),
            use_mapping: true,
            auto_execute: false,
            require_confirm: true,
            allow_sell_both: false,
            mapping_file: "unused".into(),
        }
    }

    fn question() -> &'static str {
        "Will BTC close above $100k?"
    }

    fn peer_markets() -> HashMap<Venue, Vec<Market>> {
        let mut peers = HashMap::new();
        let mut yes = market(Venue::Polymarket, "pm-yes", Outcome::Yes, question());
        let mut no = market(Venue::Polymarket, "pm-no", Outcome::No, question());
        yes.condition_id = Some("pm-cond".into());
        no.condition_id = Some("pm-cond".into());
        peers.insert(Venue::Polymarket, vec![yes, no]);
        peers
    }

    fn snapshot_with_books(a_yes_ask: (f64, f64), b_no_ask: (f64, f64)) -> Snapshot {
        let mut snap = Snapshot {
            markets: vec![
                market(Venue::Predict, "p-yes", Outcome::Yes, question()),
                market(Venue::Predict, "p-no", Outcome::No, question()),
            ],
            peer_markets: peer_markets(),
            ..Snapshot::default()
        };
        snap.insert_book(Venue::Predict, book("p-yes", (a_yes_ask.0 - 0.02, 50.0), a_yes_ask));
        snap.insert_book(Venue::Predict, book("p-no", (0.58, 50.0), (0.60, 300.0)));
        snap.insert_book(Venue::Polymarket, book("pm-yes", (0.38, 50.0), (0.42, 300.0)));
        snap.insert_book(Venue::Polymarket, book("pm-no", (b_no_ask.0 - 0.02, 50.0), b_no_ask));
        snap
    }

    #[test]
    fn test_buy_yes_a_no_b_assembly() {
        // S5: A YES ask 0.40 x 300, B NO ask 0.55 x 400, transfer 0.01,
        // min profit 0.03 -> 300 shares, edge 0.04.
        let snap = snapshot_with_books((0.40, 300.0), (0.55, 400.0));
        let detector = CrossVenueDetector::new(cfg(), Arc::new(mapped_table()));
        let opps = detector.scan(&snap);

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.edge, dec!(0.04));
        match &opp.kind {
            OpportunityKind::CrossVenue {
                action,
                shares,
                similarity,
                ..
            } => {
                assert_eq!(*action, PairAction::BuyBoth);
                assert_eq!(*shares, dec!(300));
                assert_eq!(*similarity, 1.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(opp.legs[0].token_id, "p-yes");
        assert_eq!(opp.legs[0].price, dec!(0.40));
        assert_eq!(opp.legs[1].token_id, "pm-no");
        assert_eq!(opp.legs[1].price, dec!(0.55));
    }

    #[test]
    fn test_transfer_cost_kills_marginal_edge() {
        // Sum 0.97 -> raw edge 0.03, minus transfer 0.01 = 0.02 < 0.03.
        let snap = snapshot_with_books((0.42, 300.0), (0.55, 400.0));
        let detector = CrossVenueDetector::new(cfg(), Arc::new(mapped_table()));
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_similarity_fallback_pairs_without_mapping() {
        let snap = snapshot_with_books((0.40, 300.0), (0.55, 400.0));
        let empty = MappingTable::empty("/tmp/unused.json");
        let detector = CrossVenueDetector::new(cfg(), Arc::new(empty));
        let opps = detector.scan(&snap);
        assert_eq!(opps.len(), 1);
        match &opps[0].kind {
            OpportunityKind::CrossVenue { similarity, .. } => {
                assert!(*similarity >= 0.99, "identical questions should match");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_low_similarity_emits_nothing() {
        let mut snap = snapshot_with_books((0.40, 300.0), (0.55, 400.0));
        for m in snap.peer_markets.get_mut(&Venue::Polymarket).unwrap() {
            m.question = "Entirely unrelated sports question".into();
        }
        let empty = MappingTable::empty("/tmp/unused.json");
        let detector = CrossVenueDetector::new(cfg(), Arc::new(empty));
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_disabled_is_silent() {
        let snap = snapshot_with_books((0.40, 300.0), (0.55, 400.0));
        let mut config = cfg();
        config.enabled = false;
        let detector = CrossVenueDetector::new(config, Arc::new(mapped_table()));
        assert!(detector.scan(&snap).is_empty());
    }

    #[test]
    fn test_build_pairs_prefers_mapping() {
        let predict = vec![
            market(Venue::Predict, "p-yes", Outcome::Yes, question()),
            market(Venue::Predict, "p-no", Outcome::No, question()),
        ];
        let pairs = build_pairs(&predict, &peer_markets(), &mapped_table(), &cfg());
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].similarity, 1.0);
        assert_eq!(pairs[0].b.yes_token, "pm-yes");
    }
}
