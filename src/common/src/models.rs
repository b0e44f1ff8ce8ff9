//! Shared data models for venues, markets, orderbooks, orders and positions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Supported prediction market venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Predict,
    Polymarket,
    Opinion,
}

impl Venue {
    /// Get the venue name as a string for logging and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Predict => "predict",
            Venue::Polymarket => "polymarket",
            Venue::Opinion => "opinion",
        }
    }

    /// Parse venue from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "predict" => Some(Venue::Predict),
            "polymarket" => Some(Venue::Polymarket),
            "opinion" => Some(Venue::Opinion),
            _ => None,
        }
    }

    /// Check if the venue supports WebSocket orderbook streaming.
    pub fn has_websocket_orderbook(&self) -> bool {
        match self {
            Venue::Predict => true,
            Venue::Polymarket => true,
            Venue::Opinion => true,
        }
    }

    /// Recommended book staleness threshold in milliseconds.
    /// Venues without a WS feed running fall back to REST polling and
    /// tolerate older snapshots.
    pub fn max_book_age_ms(&self) -> i64 {
        match self {
            Venue::Predict => 5_000,
            Venue::Polymarket => 5_000,
            Venue::Opinion => 10_000,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single price level in an orderbook.
/// Price is a probability in (0, 1); shares may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub shares: Decimal,
}

impl OrderbookLevel {
    pub fn new(price: Decimal, shares: Decimal) -> Self {
        Self { price, shares }
    }

    /// Dollar notional at this level.
    pub fn notional(&self) -> Decimal {
        self.price * self.shares
    }
}

/// Orderbook validation failures. A rejected book is dropped for the cycle,
/// never patched.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("crossed book: best bid {bid} >= best ask {ask}")]
    Crossed { bid: Decimal, ask: Decimal },

    #[error("{side} levels not strictly sorted at price {price}")]
    Unsorted { side: &'static str, price: Decimal },

    #[error("price {0} outside (0, 1)")]
    PriceOutOfRange(Decimal),

    #[error("non-positive size {shares} at price {price}")]
    EmptyLevel { price: Decimal, shares: Decimal },
}

/// Order book for one token at one venue.
/// Bids are sorted descending, asks ascending, best level first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    pub token_id: String,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub updated_at: DateTime<Utc>,
}

impl Orderbook {
    /// Build a book from unsorted levels, dropping zero-size entries.
    pub fn new(
        token_id: impl Into<String>,
        mut bids: Vec<OrderbookLevel>,
        mut asks: Vec<OrderbookLevel>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        bids.retain(|l| l.shares > Decimal::ZERO);
        asks.retain(|l| l.shares > Decimal::ZERO);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            token_id: token_id.into(),
            bids,
            asks,
            updated_at,
        }
    }

    pub fn best_bid(&self) -> Option<&OrderbookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderbookLevel> {
        self.asks.first()
    }

    /// Top-of-book spread, when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }

    /// Arithmetic midpoint of the touch.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((a.price + b.price) / dec!(2)),
            _ => None,
        }
    }

    /// Size-weighted micro-price: each touch price weighted by the size on
    /// the opposite side, so a heavy bid pulls the micro toward the ask.
    pub fn micro_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => {
                let total = b.shares + a.shares;
                if total <= Decimal::ZERO {
                    return self.mid_price();
                }
                Some((a.price * b.shares + b.price * a.shares) / total)
            }
            _ => None,
        }
    }

    /// Age of the snapshot relative to `now`, in milliseconds.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_milliseconds()
    }

    pub fn is_fresh(&self, max_age_ms: i64, now: DateTime<Utc>) -> bool {
        self.age_ms(now) <= max_age_ms
    }

    /// Enforce the book invariants: strictly monotone prices per side, all
    /// prices in (0, 1), positive sizes, and an uncrossed touch.
    pub fn validate(&self) -> Result<(), BookError> {
        for (side, levels, descending) in
            [("bid", &self.bids, true), ("ask", &self.asks, false)]
        {
            let mut prev: Option<Decimal> = None;
            for level in levels.iter() {
                if level.price <= Decimal::ZERO || level.price >= Decimal::ONE {
                    return Err(BookError::PriceOutOfRange(level.price));
                }
                if level.shares <= Decimal::ZERO {
                    return Err(BookError::EmptyLevel {
                        price: level.price,
                        shares: level.shares,
                    });
                }
                if let Some(p) = prev {
                    let ordered = if descending {
                        level.price < p
                    } else {
                        level.price > p
                    };
                    if !ordered {
                        return Err(BookError::Unsorted {
                            side,
                            price: level.price,
                        });
                    }
                }
                prev = Some(level.price);
            }
        }

        if let (Some(b), Some(a)) = (self.best_bid(), self.best_ask()) {
            if b.price >= a.price {
                return Err(BookError::Crossed {
                    bid: b.price,
                    ask: a.price,
                });
            }
        }
        Ok(())
    }
}

/// Outcome label of a binary market leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Outcome {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "YES" | "UP" => Outcome::Yes,
            "NO" | "DOWN" => Outcome::No,
            _ => Outcome::Unknown,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
            Outcome::Unknown => Outcome::Unknown,
        }
    }
}

/// Venue-supplied quote eligibility for a liquidity rewards program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub active: bool,
    pub min_shares: Decimal,
    pub max_spread_cents: Decimal,
}

/// A tradable outcome token on a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: Venue,
    pub token_id: String,
    pub question: String,
    pub condition_id: Option<String>,
    pub event_id: Option<String>,
    pub outcome: Outcome,
    pub is_neg_risk: bool,
    pub is_yield_bearing: bool,
    /// Flat taker fee in basis points.
    pub fee_rate_bps: u32,
    pub activation: Option<Activation>,
    /// 24h liquidity in dollars, when the venue reports it.
    pub liquidity_24h: Option<Decimal>,
    /// 24h traded volume in dollars, when the venue reports it.
    pub volume_24h: Option<Decimal>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Market {
    /// Grouping key used to pair YES/NO legs of the same underlying market.
    pub fn group_key(&self) -> String {
        if let Some(c) = &self.condition_id {
            return c.clone();
        }
        if let Some(e) = &self.event_id {
            return e.clone();
        }
        crate::mapping::normalize_question(&self.question)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

/// An order as tracked by the agent. The hash is the submitter's handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub hash: String,
    pub token_id: String,
    pub maker: String,
    pub signer: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub price: Decimal,
    pub shares: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Position in one market. Net exposure is `yes_shares - no_shares`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub yes_shares: Decimal,
    pub no_shares: Decimal,
    pub avg_entry: Decimal,
    pub mark: Decimal,
    pub pnl: Decimal,
}

impl Position {
    pub fn net_shares(&self) -> Decimal {
        self.yes_shares - self.no_shares
    }

    /// Dollar value of the net exposure at the current mark.
    pub fn exposure_value(&self) -> Decimal {
        self.net_shares().abs() * self.mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, shares: &str) -> OrderbookLevel {
        OrderbookLevel::new(price.parse().unwrap(), shares.parse().unwrap())
    }

    fn book(bids: Vec<OrderbookLevel>, asks: Vec<OrderbookLevel>) -> Orderbook {
        Orderbook::new("tok", bids, asks, Utc::now())
    }

    #[test]
    fn test_new_sorts_and_drops_empty_levels() {
        let b = book(
            vec![level("0.40", "10"), level("0.45", "5"), level("0.42", "0")],
            vec![level("0.55", "10"), level("0.50", "5")],
        );
        assert_eq!(b.bids.len(), 2);
        assert_eq!(b.best_bid().unwrap().price, dec!(0.45));
        assert_eq!(b.best_ask().unwrap().price, dec!(0.50));
        assert!(b.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_crossed_book() {
        let b = book(vec![level("0.55", "10")], vec![level("0.50", "10")]);
        assert!(matches!(b.validate(), Err(BookError::Crossed { .. })));
    }

    #[test]
    fn test_validate_rejects_equal_touch() {
        let b = book(vec![level("0.50", "10")], vec![level("0.50", "10")]);
        assert!(matches!(b.validate(), Err(BookError::Crossed { .. })));
    }

    #[test]
    fn test_validate_rejects_out_of_range_price() {
        let b = book(vec![], vec![level("1.00", "10")]);
        assert!(matches!(b.validate(), Err(BookError::PriceOutOfRange(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_price_levels() {
        let mut b = book(vec![], vec![level("0.50", "10")]);
        b.asks.push(level("0.50", "5"));
        assert!(matches!(b.validate(), Err(BookError::Unsorted { .. })));
    }

    #[test]
    fn test_micro_price_weights_opposite_sizes() {
        // bestBid 0.49 x 80, bestAsk 0.51 x 20
        let b = book(vec![level("0.49", "80")], vec![level("0.51", "20")]);
        assert_eq!(b.micro_price(), Some(dec!(0.506)));
        assert_eq!(b.mid_price(), Some(dec!(0.50)));
        assert_eq!(b.spread(), Some(dec!(0.02)));
    }

    #[test]
    fn test_position_net_shares() {
        let p = Position {
            token_id: "tok".into(),
            yes_shares: dec!(120),
            no_shares: dec!(40),
            avg_entry: dec!(0.5),
            mark: dec!(0.55),
            pnl: Decimal::ZERO,
        };
        assert_eq!(p.net_shares(), dec!(80));
        assert_eq!(p.exposure_value(), dec!(44.00));
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!(Outcome::parse("yes"), Outcome::Yes);
        assert_eq!(Outcome::parse("Down"), Outcome::No);
        assert_eq!(Outcome::parse("maybe"), Outcome::Unknown);
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
    }

    #[test]
    fn test_venue_parse() {
        assert_eq!(Venue::parse("Predict"), Some(Venue::Predict));
        assert_eq!(Venue::parse("polymarket"), Some(Venue::Polymarket));
        assert_eq!(Venue::parse("unknown"), None);
    }
}
