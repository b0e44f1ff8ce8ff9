//! Polymarket REST client.
//!
//! Markets come from the Gamma API, order books from the CLOB API. Records
//! that cannot be normalized into the internal shapes are dropped with a
//! counter, never patched.

use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PolymarketConfig;
use crate::models::{Market, Orderbook, OrderbookLevel, Outcome, Venue};

#[derive(Debug, Error)]
pub enum PolymarketError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited (429)")]
    RateLimited,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Data(String),
}

/// Raw Gamma market record. Token IDs and outcomes arrive as JSON-encoded
/// strings inside the JSON document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    question: Option<String>,
    /// JSON string of an array: "[\"Yes\", \"No\"]"
    outcomes: Option<String>,
    /// JSON string of an array with the two CLOB token IDs.
    clob_token_ids: Option<String>,
    active: Option<bool>,
    closed: Option<bool>,
    neg_risk: Option<bool>,
    liquidity_num: Option<f64>,
    volume_num: Option<f64>,
    end_date: Option<String>,
}

impl GammaMarket {
    fn parse_token_ids(&self) -> Option<Vec<String>> {
        self.clob_token_ids
            .as_ref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
    }

    fn parse_outcomes(&self) -> Option<Vec<String>> {
        self.outcomes
            .as_ref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
    }
}

#[derive(Debug, Deserialize)]
struct ClobBook {
    #[serde(default)]
    bids: Vec<ClobLevel>,
    #[serde(default)]
    asks: Vec<ClobLevel>,
}

#[derive(Debug, Deserialize)]
struct ClobLevel {
    price: String,
    size: String,
}

pub struct PolymarketClient {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    max_markets: usize,
}

impl PolymarketClient {
    pub fn new(cfg: &PolymarketConfig, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("reqwest client");
        Self {
            http,
            gamma_url: cfg.gamma_url.trim_end_matches('/').to_string(),
            clob_url: cfg.clob_url.trim_end_matches('/').to_string(),
            max_markets: cfg.max_markets,
        }
    }

    fn check(status: StatusCode) -> Result<(), PolymarketError> {
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 {
            return Err(PolymarketError::RateLimited);
        }
        Err(PolymarketError::Status(status.as_u16()))
    }

    /// List active binary markets, normalized to one `Market` per outcome
    /// token.
    pub async fn list_markets(&self) -> Result<Vec<Market>, PolymarketError> {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}",
            self.gamma_url, self.max_markets
        );
        let resp = self.http.get(&url).send().await?;
        Self::check(resp.status())?;
        let records: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| PolymarketError::Data(e.to_string()))?;

        let mut markets = Vec::new();
        let mut dropped = 0usize;
        for record in &records {
            let raw = match serde_json::from_value::<GammaMarket>(record.clone()) {
                Ok(r) => r,
                Err(_) => {
                    dropped += 1;
                    continue;
                }
            };
            match normalize_gamma(&raw) {
                Some(pair) => markets.extend(pair),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("dropped {} unnormalizable Gamma records", dropped);
        }
        debug!("normalized {} Polymarket outcome tokens", markets.len());
        Ok(markets)
    }

    /// Fetch the order book for one token from the CLOB API.
    pub async fn orderbook(&self, token_id: &str) -> Result<Orderbook, PolymarketError> {
        let url = format!("{}/book?token_id={}", self.clob_url, token_id);
        let resp = self.http.get(&url).send().await?;
        Self::check(resp.status())?;
        let raw: ClobBook = resp
            .json()
            .await
            .map_err(|e| PolymarketError::Data(e.to_string()))?;

        let book = Orderbook::new(
            token_id,
            raw.bids.iter().filter_map(clob_level).collect(),
            raw.asks.iter().filter_map(clob_level).collect(),
            Utc::now(),
        );
        book.validate()
            .map_err(|e| PolymarketError::Data(e.to_string()))?;
        Ok(book)
    }
}

fn clob_level(l: &ClobLevel) -> Option<OrderbookLevel> {
    let price: Decimal = l.price.parse().ok()?;
    let shares: Decimal = l.size.parse().ok()?;
    Some(OrderbookLevel::new(price, shares))
}

/// A Gamma record covers both outcome tokens; split it into two markets
/// with YES/NO labels mapped from the outcome strings.
fn normalize_gamma(raw: &GammaMarket) -> Option<Vec<Market>> {
    if raw.active == Some(false) || raw.closed == Some(true) {
        return None;
    }
    let condition_id = raw.condition_id.clone().filter(|c| !c.is_empty())?;
    let question = raw.question.clone().filter(|q| !q.is_empty())?;
    let token_ids = raw.parse_token_ids()?;
    let outcomes = raw.parse_outcomes()?;
    if token_ids.len() != 2 || outcomes.len() != 2 {
        return None;
    }

    let end_time = raw
        .end_date
        .as_deref()
        .and_then(|d| d.parse::<chrono::DateTime<Utc>>().ok());
    let liquidity = raw.liquidity_num.and_then(|v| Decimal::try_from(v).ok());
    let volume = raw.volume_num.and_then(|v| Decimal::try_from(v).ok());

    let markets = token_ids
        .iter()
        .zip(outcomes.iter())
        .map(|(token_id, outcome)| Market {
            venue: Venue::Polymarket,
            token_id: token_id.clone(),
            question: question.clone(),
            condition_id: Some(condition_id.clone()),
            event_id: None,
            outcome: Outcome::parse(outcome),
            is_neg_risk: raw.neg_risk.unwrap_or(false),
            is_yield_bearing: false,
            fee_rate_bps: 0,
            activation: None,
            liquidity_24h: liquidity,
            volume_24h: volume,
            end_time,
        })
        .collect::<Vec<_>>();

    // A pair whose outcomes did not map to YES/NO is unusable for parity.
    if markets.iter().any(|m| m.outcome == Outcome::Unknown) {
        return None;
    }
    Some(markets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn gamma(outcomes: &str, tokens: &str) -> GammaMarket {
        serde_json::from_value(json!({
            "conditionId": "cond-1",
            "question": "Will BTC close above $100k?",
            "outcomes": outcomes,
            "clobTokenIds": tokens,
            "active": true,
            "closed": false,
            "liquidityNum": 5000.0,
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_gamma_splits_outcome_tokens() {
        let raw = gamma(r#"["Yes", "No"]"#, r#"["tok-yes", "tok-no"]"#);
        let markets = normalize_gamma(&raw).unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].outcome, Outcome::Yes);
        assert_eq!(markets[1].outcome, Outcome::No);
        assert_eq!(markets[0].condition_id.as_deref(), Some("cond-1"));
        assert_eq!(markets[0].liquidity_24h, Some(dec!(5000)));
    }

    #[test]
    fn test_normalize_gamma_maps_up_down() {
        let raw = gamma(r#"["Up", "Down"]"#, r#"["tok-up", "tok-down"]"#);
        let markets = normalize_gamma(&raw).unwrap();
        assert_eq!(markets[0].outcome, Outcome::Yes);
        assert_eq!(markets[1].outcome, Outcome::No);
    }

    #[test]
    fn test_normalize_gamma_rejects_unknown_outcomes() {
        let raw = gamma(r#"["Red", "Blue"]"#, r#"["tok-a", "tok-b"]"#);
        assert!(normalize_gamma(&raw).is_none());
    }

    #[test]
    fn test_normalize_gamma_rejects_closed_and_partial() {
        let mut raw = gamma(r#"["Yes", "No"]"#, r#"["tok-yes", "tok-no"]"#);
        raw.closed = Some(true);
        assert!(normalize_gamma(&raw).is_none());

        let raw = gamma(r#"["Yes", "No"]"#, r#"["only-one"]"#);
        assert!(normalize_gamma(&raw).is_none());
    }

    #[test]
    fn test_clob_level_parsing() {
        let raw: ClobLevel =
            serde_json::from_value(json!({ "price": "0.55", "size": "120.5" })).unwrap();
        let level = clob_level(&raw).unwrap();
        assert_eq!(level.price, dec!(0.55));
        assert_eq!(level.shares, dec!(120.5));

        let bad: ClobLevel =
            serde_json::from_value(json!({ "price": "x", "size": "1" })).unwrap();
        assert!(clob_level(&bad).is_none());
    }
}
