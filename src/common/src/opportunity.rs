//! Typed arbitrage opportunities.
//!
//! Every detector emits the same envelope: a shared header plus a
//! kind-specific payload. The `(kind, primary id)` key drives alert
//! deduplication and execution cooldowns.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{OrderSide, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

/// One order to place as part of an opportunity, in declared execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub venue: Venue,
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub shares: Decimal,
}

impl Leg {
    pub fn notional(&self) -> Decimal {
        self.price * self.shares
    }
}

/// Buy-both vs sell-both direction for paired opportunities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairAction {
    BuyBoth,
    SellBoth,
}

impl fmt::Display for PairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairAction::BuyBoth => write!(f, "BUY_BOTH"),
            PairAction::SellBoth => write!(f, "SELL_BOTH"),
        }
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityKind {
    ValueMismatch {
        token_id: String,
        side: OrderSide,
        fair_price: Decimal,
    },
    IntraVenue {
        market_id: String,
        yes_token: String,
        no_token: String,
        action: PairAction,
        shares: Decimal,
        /// Combined per-share cost (buy) or proceeds (sell) across both legs.
        per_share_cost: Decimal,
    },
    MultiOutcome {
        group_id: String,
        shares: Decimal,
    },
    CrossVenue {
        pair_id: String,
        action: PairAction,
        shares: Decimal,
        similarity: f64,
    },
    Dependency {
        bundle_id: String,
    },
}

impl OpportunityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            OpportunityKind::ValueMismatch { .. } => "VALUE_MISMATCH",
            OpportunityKind::IntraVenue { .. } => "INTRA_VENUE",
            OpportunityKind::MultiOutcome { .. } => "MULTI_OUTCOME",
            OpportunityKind::CrossVenue { .. } => "CROSS_VENUE",
            OpportunityKind::Dependency { .. } => "DEPENDENCY",
        }
    }

    fn primary_id(&self) -> &str {
        match self {
            OpportunityKind::ValueMismatch { token_id, .. } => token_id,
            OpportunityKind::IntraVenue { market_id, .. } => market_id,
            OpportunityKind::MultiOutcome { group_id, .. } => group_id,
            OpportunityKind::CrossVenue { pair_id, .. } => pair_id,
            OpportunityKind::Dependency { bundle_id, .. } => bundle_id,
        }
    }
}

/// Stable deduplication key: `(type, primary id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OpportunityKey {
    pub kind: &'static str,
    pub primary: String,
}

impl fmt::Display for OpportunityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.primary)
    }
}

/// A detected opportunity with its execution legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: OpportunityKind,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
    /// Expected per-share profit at $1 payout, net of fees/slippage/transfer.
    pub edge: Decimal,
    pub legs: Vec<Leg>,
}

impl Opportunity {
    pub fn new(
        kind: OpportunityKind,
        edge: Decimal,
        confidence: f64,
        risk_level: RiskLevel,
        legs: Vec<Leg>,
        ttl_ms: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            detected_at: now,
            expires_at: now + Duration::milliseconds(ttl_ms),
            risk_level,
            confidence,
            edge,
            legs,
        }
    }

    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            kind: self.kind.tag(),
            primary: self.kind.primary_id().to_string(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Total dollars committed across all legs.
    pub fn total_notional(&self) -> Decimal {
        self.legs.iter().map(Leg::notional).sum()
    }

    /// One-line description for logs and alerts.
    pub fn summary(&self) -> String {
        let legs = self
            .legs
            .iter()
            .map(|l| {
                format!(
                    "{}:{} {} {}@{}",
                    l.venue,
                    &l.token_id[..l.token_id.len().min(10)],
                    l.side,
                    l.shares,
                    l.price
                )
            })
            .collect::<Vec<_>>()
            .join(" + ");
        format!(
            "{} edge={:.4} conf={:.2} [{}]",
            self.key(),
            self.edge,
            self.confidence,
            legs
        )
    }
}

/// Sort opportunities by edge, best first.
pub fn sort_by_edge(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| b.edge.cmp(&a.edge));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opp(primary: &str, edge: Decimal) -> Opportunity {
        Opportunity::new(
            OpportunityKind::IntraVenue {
                market_id: primary.to_string(),
                yes_token: "y".into(),
                no_token: "n".into(),
                action: PairAction::BuyBoth,
                shares: dec!(100),
                per_share_cost: dec!(0.97),
            },
            edge,
            0.9,
            RiskLevel::Low,
            vec![
                Leg {
                    venue: Venue::Predict,
                    token_id: "y".into(),
                    side: OrderSide::Buy,
                    price: dec!(0.42),
                    shares: dec!(100),
                },
                Leg {
                    venue: Venue::Predict,
                    token_id: "n".into(),
                    side: OrderSide::Buy,
                    price: dec!(0.55),
                    shares: dec!(100),
                },
            ],
            30_000,
        )
    }

    #[test]
    fn test_key_is_stable_across_detections() {
        let a = opp("cond-1", dec!(0.03));
        let b = opp("cond-1", dec!(0.05));
        assert_eq!(a.key(), b.key());
        assert_ne!(a.id, b.id);
        assert_eq!(a.key().to_string(), "INTRA_VENUE:cond-1");
    }

    #[test]
    fn test_sort_by_edge_descending() {
        let mut opps = vec![opp("a", dec!(0.01)), opp("b", dec!(0.05)), opp("c", dec!(0.03))];
        sort_by_edge(&mut opps);
        assert_eq!(opps[0].edge, dec!(0.05));
        assert_eq!(opps[2].edge, dec!(0.01));
    }

    #[test]
    fn test_total_notional_and_expiry() {
        let o = opp("cond-1", dec!(0.03));
        assert_eq!(o.total_notional(), dec!(97.00));
        assert!(!o.is_expired(o.detected_at));
        assert!(o.is_expired(o.expires_at + Duration::seconds(1)));
    }
}
