//! Opportunity execution and hedging.
//!
//! Converts a detected opportunity into an ordered sequence of submitted
//! legs under the confirmation/automation policy, and closes directional
//! exposure created by maker fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::PeerCatalog;
use crate::config::{HedgeConfig, HedgeMode};
use crate::mapping::{question_similarity, MappingTable};
use crate::models::{Market, Orderbook, OrderSide, Outcome, Venue};
use crate::opportunity::{Leg, Opportunity, OpportunityKey};
use crate::submitter::{CrossVenueSubmitter, OrderHandle, OrderSubmitter, SubmitError};

/// Execution gates and sizing limits.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub require_confirmation: bool,
    pub auto_confirm: bool,
    /// Dollar cap on the largest single leg; ratios are preserved.
    pub max_position_size: Decimal,
    /// Submit cross-venue legs one at a time (default) or concurrently.
    pub sequential_cross_legs: bool,
    /// Flatten already-filled legs when a later leg fails.
    pub hedge_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Pending,
    Executed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum LegOutcome {
    Submitted(OrderHandle),
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub leg: Leg,
    pub outcome: LegOutcome,
}

impl TradeRecord {
    pub fn submitted(&self) -> bool {
        matches!(self.outcome, LegOutcome::Submitted(_))
    }
}

/// Durable record of one execution attempt.
#[derive(Debug)]
pub struct ArbitrageExecution {
    pub id: Uuid,
    pub key: OpportunityKey,
    pub status: ExecutionStatus,
    pub trades: Vec<TradeRecord>,
    pub total_cost: Decimal,
    pub expected_profit: Decimal,
    pub executed_at: DateTime<Utc>,
}

pub struct Executor {
    policy: ExecutionPolicy,
    predict: Arc<dyn OrderSubmitter>,
    cross: HashMap<Venue, Arc<dyn CrossVenueSubmitter>>,
}

impl Executor {
    pub fn new(policy: ExecutionPolicy, predict: Arc<dyn OrderSubmitter>) -> Self {
        Self {
            policy,
            predict,
            cross: HashMap::new(),
        }
    }

    pub fn with_cross_venue(mut self, submitter: Arc<dyn CrossVenueSubmitter>) -> Self {
        self.cross.insert(submitter.venue(), submitter);
        self
    }

    /// Execute all legs of an opportunity in declared order. Failures are
    /// recorded per leg; remaining legs are skipped once one fails.
    pub async fn execute(
        &self,
        opp: &Opportunity,
        markets_by_token: &HashMap<String, Market>,
    ) -> ArbitrageExecution {
        let mut execution = ArbitrageExecution {
            id: Uuid::new_v4(),
            key: opp.key(),
            status: ExecutionStatus::Pending,
            trades: Vec::new(),
            total_cost: Decimal::ZERO,
            expected_profit: Decimal::ZERO,
            executed_at: Utc::now(),
        };

        if !self.confirm(opp) {
            warn!("[EXEC] {} rejected by confirmation policy", opp.key());
            execution.status = ExecutionStatus::Failed;
            return execution;
        }

        let legs = scale_legs(&opp.legs, self.policy.max_position_size);
        if legs.is_empty() || legs.iter().any(|l| l.shares <= Decimal::ZERO) {
            warn!("[EXEC] {} scaled to nothing, skipping", opp.key());
            execution.status = ExecutionStatus::Failed;
            return execution;
        }
        let scaled_shares = legs.iter().map(|l| l.shares).min().unwrap_or(Decimal::ZERO);
        execution.expected_profit = opp.edge * scaled_shares;

        let mut failed = false;
        for leg in legs {
            if failed {
                execution.trades.push(TradeRecord {
                    leg,
                    outcome: LegOutcome::Skipped,
                });
                continue;
            }
            let outcome = self.submit_leg(&leg, markets_by_token).await;
            match &outcome {
                Ok(handle) => {
                    execution.total_cost += leg.notional();
                    execution.trades.push(TradeRecord {
                        leg,
                        outcome: LegOutcome::Submitted(handle.clone()),
                    });
                }
                Err(e) => {
                    warn!("[EXEC] leg {} {} failed: {e}", leg.side, leg.token_id);
                    execution.trades.push(TradeRecord {
                        leg,
                        outcome: LegOutcome::Failed(e.to_string()),
                    });
                    failed = true;
                }
            }
        }

        if failed && self.policy.hedge_on_failure {
            self.flatten_submitted(&execution, markets_by_token).await;
        }

        execution.status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Executed
        };
        info!(
            "[EXEC] {} -> {:?}, cost {:.2}, expected profit {:.2}",
            execution.key, execution.status, execution.total_cost, execution.expected_profit
        );
        execution
    }

    async fn submit_leg(
        &self,
        leg: &Leg,
        markets_by_token: &HashMap<String, Market>,
    ) -> Result<OrderHandle, SubmitError> {
        match leg.venue {
            Venue::Predict => {
                let market = markets_by_token
                    .get(&leg.token_id)
                    .ok_or_else(|| SubmitError::Invalid(format!("unknown token {}", leg.token_id)))?;
                self.predict
                    .submit_limit(market, leg.side, leg.price, leg.shares)
                    .await
            }
            venue => match self.cross.get(&venue) {
                Some(submitter) => submitter.submit(leg).await,
                None => Err(SubmitError::Rejected(format!(
                    "no {venue} submitter configured"
                ))),
            },
        }
    }

    /// Compensating flatten for legs that already went out.
    async fn flatten_submitted(
        &self,
        execution: &ArbitrageExecution,
        markets_by_token: &HashMap<String, Market>,
    ) {
        for trade in execution.trades.iter().filter(|t| t.submitted()) {
            let leg = &trade.leg;
            if leg.venue != Venue::Predict {
                warn!(
                    "[EXEC] cannot auto-flatten {} leg on {}, manual action required",
                    leg.token_id, leg.venue
                );
                continue;
            }
            let Some(market) = markets_by_token.get(&leg.token_id) else {
                continue;
            };
            let result = self
                .predict
                .submit_limit(market, leg.side.opposite(), leg.price, leg.shares)
                .await;
            match result {
                Ok(handle) => info!("[EXEC] flattened {} via {}", leg.token_id, handle.hash),
                Err(e) => warn!("[EXEC] flatten of {} failed: {e}", leg.token_id),
            }
        }
    }

    fn confirm(&self, opp: &Opportunity) -> bool {
        if !self.policy.require_confirmation || self.policy.auto_confirm {
            return true;
        }
        if !std::io::stdin().is_terminal() {
            return false;
        }
        dialoguer::Confirm::new()
            .with_prompt(format!("Execute {}?", opp.summary()))
            .default(false)
            .interact()
            .unwrap_or(false)
    }

    /// Close exposure created by a detected fill. `delta_net` is the signed
    /// change in net shares (positive = got longer YES).
    pub async fn hedge_on_fill(
        &self,
        market: &Market,
        book: &Orderbook,
        delta_net: Decimal,
        hedge: &HedgeConfig,
        mapping: &MappingTable,
        peers: &PeerCatalog,
        peer_markets: &HashMap<Venue, Vec<Market>>,
        min_similarity: f64,
    ) -> Result<Option<OrderHandle>, SubmitError> {
        if delta_net == Decimal::ZERO {
            return Ok(None);
        }
        match hedge.mode {
            HedgeMode::None => Ok(None),
            HedgeMode::Flatten => self
                .flatten(market, book, delta_net, hedge)
                .await
                .map(Some),
            HedgeMode::Cross => {
                match self
                    .cross_hedge(market, delta_net, mapping, peers, peer_markets, min_similarity)
                    .await
                {
                    Ok(handle) => Ok(Some(handle)),
                    Err(e) => {
                        warn!("[HEDGE] cross hedge failed ({e}), falling back to flatten");
                        self.flatten(market, book, delta_net, hedge).await.map(Some)
                    }
                }
            }
        }
    }

    /// MARKET order on Predict opposing the net direction.
    async fn flatten(
        &self,
        market: &Market,
        book: &Orderbook,
        delta_net: Decimal,
        hedge: &HedgeConfig,
    ) -> Result<OrderHandle, SubmitError> {
        let side = if delta_net > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        info!(
            "[HEDGE] flatten {} {} shares of {}",
            side,
            delta_net.abs(),
            market.token_id
        );
        self.predict
            .submit_market(market, side, delta_net.abs(), book, hedge.max_slippage_bps)
            .await
    }

    /// Buy the opposing outcome on a peer venue: mapping first, then the
    /// best textual match above the similarity floor.
    async fn cross_hedge(
        &self,
        market: &Market,
        delta_net: Decimal,
        mapping: &MappingTable,
        peers: &PeerCatalog,
        peer_markets: &HashMap<Venue, Vec<Market>>,
        min_similarity: f64,
    ) -> Result<OrderHandle, SubmitError> {
        // Long YES hedges with the peer's NO token and vice versa.
        let opposing = if delta_net > Decimal::ZERO {
            Outcome::No
        } else {
            Outcome::Yes
        };
        let market_key = market
            .condition_id
            .clone()
            .unwrap_or_else(|| market.token_id.clone());

        for venue in peers.venues() {
            let token_id = mapping
                .resolve(&market_key, &market.question, venue)
                .map(|(yes, no)| match opposing {
                    Outcome::No => no.to_string(),
                    _ => yes.to_string(),
                })
                .or_else(|| {
                    best_text_match(
                        &market.question,
                        peer_markets.get(&venue).map(Vec::as_slice).unwrap_or(&[]),
                        opposing,
                        min_similarity,
                    )
                });
            let Some(token_id) = token_id else { continue };

            let Some(peer_book) = peers.orderbook(venue, &token_id).await else {
                continue;
            };
            let Some(ask) = peer_book.best_ask() else {
                continue;
            };
            let submitter = self
                .cross
                .get(&venue)
                .ok_or_else(|| SubmitError::Rejected(format!("no {venue} submitter configured")))?;

            let leg = Leg {
                venue,
                token_id: token_id.clone(),
                side: OrderSide::Buy,
                price: ask.price,
                shares: delta_net.abs(),
            };
            info!(
                "[HEDGE] cross {} BUY {} {} @ {}",
                venue, leg.shares, token_id, ask.price
            );
            return submitter.submit(&leg).await;
        }

        Err(SubmitError::Rejected(
            "no cross-venue hedge target resolved".into(),
        ))
    }
}

/// Shrink all legs by one factor so the largest leg notional fits the cap.
/// Shares are floored to whole units afterwards.
fn scale_legs(legs: &[Leg], max_position_size: Decimal) -> Vec<Leg> {
    let largest = legs
        .iter()
        .map(Leg::notional)
        .max()
        .unwrap_or(Decimal::ZERO);
    let factor = if largest > max_position_size && largest > Decimal::ZERO {
        max_position_size / largest
    } else {
        Decimal::ONE
    };
    legs.iter()
        .map(|leg| {
            let mut scaled = leg.clone();
            scaled.shares = (leg.shares * factor).floor();
            scaled
        })
        .collect()
}

/// Best peer-venue market of the wanted outcome by question similarity.
fn best_text_match(
    question: &str,
    candidates: &[Market],
    outcome: Outcome,
    min_similarity: f64,
) -> Option<String> {
    candidates
        .iter()
        .filter(|m| m.outcome == outcome)
        .map(|m| (question_similarity(question, &m.question), m))
        .filter(|(score, _)| *score >= min_similarity)
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, m)| m.token_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderbookLevel;
    use crate::opportunity::{OpportunityKind, PairAction, RiskLevel};
    use crate::submitter::DryRunSubmitter;
    use rust_decimal_macros::dec;

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy {
            require_confirmation: false,
            auto_confirm: true,
            max_position_size: dec!(100),
            sequential_cross_legs: true,
            hedge_on_failure: false,
        }
    }

    fn market(token: &str) -> Market {
        Market {
            venue: Venue::Predict,
            token_id: token.to_string(),
            question: "Will BTC close above $100k?".into(),
            condition_id: Some("cond-1".into()),
            event_id: None,
            outcome: Outcome::Yes,
            is_neg_risk: false,
            is_yield_bearing: false,
            fee_rate_bps: 0,
            activation: None,
            liquidity_24h: None,
            volume_24h: None,
            end_time: None,
        }
    }

    fn leg(token: &str, price: Decimal, shares: Decimal) -> Leg {
        Leg {
            venue: Venue::Predict,
            token_id: token.to_string(),
            side: OrderSide::Buy,
            price,
            shares,
        }
    }

    fn opportunity(legs: Vec<Leg>) -> Opportunity {
        Opportunity::new(
            OpportunityKind::IntraVenue {
                market_id: "cond-1".into(),
                yes_token: "yes".into(),
                no_token: "no".into(),
                action: PairAction::BuyBoth,
                shares: legs[0].shares,
                per_share_cost: dec!(0.97),
            },
            dec!(0.03),
            0.9,
            RiskLevel::Low,
            legs,
            30_000,
        )
    }

    #[test]
    fn test_scale_legs_preserves_ratios() {
        let legs = vec![leg("a", dec!(0.40), dec!(1000)), leg("b", dec!(0.55), dec!(1000))];
        // Largest leg notional is 550; cap at 110 -> factor 0.2.
        let scaled = scale_legs(&legs, dec!(110));
        assert_eq!(scaled[0].shares, dec!(200));
        assert_eq!(scaled[1].shares, dec!(200));
        assert!(scaled[1].notional() <= dec!(110));
    }

    #[test]
    fn test_scale_legs_noop_under_cap() {
        let legs = vec![leg("a", dec!(0.40), dec!(100))];
        let scaled = scale_legs(&legs, dec!(1000));
        assert_eq!(scaled[0].shares, dec!(100));
    }

    #[tokio::test]
    async fn test_execute_submits_legs_in_order() {
        let submitter = Arc::new(DryRunSubmitter::new());
        let executor = Executor::new(policy(), submitter.clone());

        let mut markets = HashMap::new();
        markets.insert("yes".to_string(), market("yes"));
        markets.insert("no".to_string(), market("no"));

        let opp = opportunity(vec![
            leg("yes", dec!(0.42), dec!(100)),
            leg("no", dec!(0.55), dec!(100)),
        ]);
        let execution = executor.execute(&opp, &markets).await;

        assert_eq!(execution.status, ExecutionStatus::Executed);
        assert_eq!(execution.trades.len(), 2);
        assert!(execution.trades.iter().all(TradeRecord::submitted));
        let history = submitter.history();
        assert_eq!(history[0].token_id, "yes");
        assert_eq!(history[1].token_id, "no");
        assert_eq!(execution.total_cost, dec!(97.00));
        assert_eq!(execution.expected_profit, dec!(3.00));
    }

    #[tokio::test]
    async fn test_execute_records_failed_leg_and_skips_rest() {
        let submitter = Arc::new(DryRunSubmitter::new());
        let executor = Executor::new(policy(), submitter.clone());

        // Second leg has no market entry -> Invalid.
        let mut markets = HashMap::new();
        markets.insert("yes".to_string(), market("yes"));

        let opp = opportunity(vec![
            leg("yes", dec!(0.42), dec!(100)),
            leg("no", dec!(0.55), dec!(100)),
            leg("yes", dec!(0.42), dec!(100)),
        ]);
        let execution = executor.execute(&opp, &markets).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(matches!(execution.trades[0].outcome, LegOutcome::Submitted(_)));
        assert!(matches!(execution.trades[1].outcome, LegOutcome::Failed(_)));
        assert!(matches!(execution.trades[2].outcome, LegOutcome::Skipped));
        assert_eq!(submitter.history().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_required_without_terminal_rejects() {
        if std::io::stdin().is_terminal() {
            // Interactive runs would block on the prompt.
            return;
        }
        let submitter = Arc::new(DryRunSubmitter::new());
        let executor = Executor::new(
            ExecutionPolicy {
                require_confirmation: true,
                auto_confirm: false,
                ..policy()
            },
            submitter.clone(),
        );
        let mut markets = HashMap::new();
        markets.insert("yes".to_string(), market("yes"));

        let opp = opportunity(vec![leg("yes", dec!(0.42), dec!(100))]);
        let execution = executor.execute(&opp, &markets).await;
        // Test processes have no controlling terminal on stdin.
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(submitter.history().is_empty());
    }

    #[tokio::test]
    async fn test_hedge_flatten_sells_when_long() {
        let submitter = Arc::new(DryRunSubmitter::new());
        let executor = Executor::new(policy(), submitter.clone());
        let m = market("yes");
        let book = Orderbook::new(
            "yes",
            vec![OrderbookLevel::new(dec!(0.49), dec!(200))],
            vec![OrderbookLevel::new(dec!(0.51), dec!(200))],
            Utc::now(),
        );
        let hedge = HedgeConfig {
            hedge_on_fill: true,
            trigger_shares: dec!(50),
            mode: HedgeMode::Flatten,
            max_slippage_bps: 100,
        };
        let mapping = MappingTable::empty("/tmp/unused.json");
        let peers = PeerCatalog::new(None, None);

        let handle = executor
            .hedge_on_fill(&m, &book, dec!(60), &hedge, &mapping, &peers, &HashMap::new(), 0.6)
            .await
            .unwrap();
        assert!(handle.is_some());

        let history = submitter.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].side, OrderSide::Sell);
        assert_eq!(history[0].shares, dec!(60));
    }

    #[tokio::test]
    async fn test_hedge_mode_none_is_noop() {
        let submitter = Arc::new(DryRunSubmitter::new());
        let executor = Executor::new(policy(), submitter.clone());
        let m = market("yes");
        let book = Orderbook::new(
            "yes",
            vec![OrderbookLevel::new(dec!(0.49), dec!(200))],
            vec![OrderbookLevel::new(dec!(0.51), dec!(200))],
            Utc::now(),
        );
        let hedge = HedgeConfig::default();
        let mapping = MappingTable::empty("/tmp/unused.json");
        let peers = PeerCatalog::new(None, None);

        let handle = executor
            .hedge_on_fill(&m, &book, dec!(60), &hedge, &mapping, &peers, &HashMap::new(), 0.6)
            .await
            .unwrap();
        assert!(handle.is_none());
        assert!(submitter.history().is_empty());
    }

    #[test]
    fn test_best_text_match_filters_outcome_and_similarity() {
        let mut yes_market = market("peer-yes");
        yes_market.outcome = Outcome::Yes;
        let mut no_market = market("peer-no");
        no_market.outcome = Outcome::No;
        let mut unrelated = market("peer-other");
        unrelated.outcome = Outcome::No;
        unrelated.question = "Entirely different topic".into();

        let candidates = vec![yes_market, no_market, unrelated];
        let hit = best_text_match(
            "Will BTC close above $100k?",
            &candidates,
            Outcome::No,
            0.6,
        );
        assert_eq!(hit.as_deref(), Some("peer-no"));

        let miss = best_text_match("Will BTC close above $100k?", &candidates, Outcome::No, 1.1);
        assert!(miss.is_none());
    }
}
