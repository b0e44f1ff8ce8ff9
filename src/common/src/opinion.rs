//! Opinion REST client.
//!
//! Opinion's OpenAPI exposes one record per market carrying both outcome
//! token IDs. All endpoints require the API key header.

use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::OpinionConfig;
use crate::models::{Market, Orderbook, OrderbookLevel, Outcome, Venue};
use crate::predict::parse_decimal;

#[derive(Debug, Error)]
pub enum OpinionError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication rejected (401)")]
    Auth,

    #[error("rate limited (429)")]
    RateLimited,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Data(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpinionMarket {
    market_id: Option<String>,
    question: Option<String>,
    yes_token_id: Option<String>,
    no_token_id: Option<String>,
    #[serde(default)]
    active: bool,
    liquidity: Option<Value>,
    volume: Option<Value>,
    end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOpinionBook {
    #[serde(default)]
    bids: Vec<RawOpinionLevel>,
    #[serde(default)]
    asks: Vec<RawOpinionLevel>,
}

#[derive(Debug, Deserialize)]
struct RawOpinionLevel {
    price: Value,
    #[serde(alias = "quantity")]
    size: Value,
}

pub struct OpinionClient {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
    max_markets: usize,
}

impl OpinionClient {
    pub fn new(cfg: &OpinionConfig, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base: cfg.openapi_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            max_markets: cfg.max_markets,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(format!("{}{}", self.base, path));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    fn check(status: StatusCode) -> Result<(), OpinionError> {
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 => Err(OpinionError::Auth),
            429 => Err(OpinionError::RateLimited),
            code => Err(OpinionError::Status(code)),
        }
    }

    /// List active markets, normalized to one `Market` per outcome token.
    pub async fn list_markets(&self) -> Result<Vec<Market>, OpinionError> {
        let resp = self
            .get(&format!("/markets?active=true&limit={}", self.max_markets))
            .send()
            .await?;
        Self::check(resp.status())?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| OpinionError::Data(e.to_string()))?;
        let records = value
            .as_array()
            .or_else(|| value.get("markets").and_then(Value::as_array))
            .ok_or_else(|| OpinionError::Data("markets payload is not an array".into()))?;

        let mut markets = Vec::new();
        let mut dropped = 0usize;
        for record in records {
            match serde_json::from_value::<RawOpinionMarket>(record.clone()) {
                Ok(raw) => match normalize_opinion(&raw) {
                    Some(pair) => markets.extend(pair),
                    None => dropped += 1,
                },
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("dropped {} unnormalizable Opinion records", dropped);
        }
        Ok(markets)
    }

    /// Fetch the order book for one token.
    pub async fn orderbook(&self, token_id: &str) -> Result<Orderbook, OpinionError> {
        let resp = self
            .get(&format!("/orderbook?tokenId={token_id}"))
            .send()
            .await?;
        Self::check(resp.status())?;
        let raw: RawOpinionBook = resp
            .json()
            .await
            .map_err(|e| OpinionError::Data(e.to_string()))?;

        let to_levels = |levels: &[RawOpinionLevel]| {
            levels
                .iter()
                .filter_map(|l| {
                    Some(OrderbookLevel::new(
                        parse_decimal(&l.price)?,
                        parse_decimal(&l.size)?,
                    ))
                })
                .collect::<Vec<_>>()
        };

        let book = Orderbook::new(token_id, to_levels(&raw.bids), to_levels(&raw.asks), Utc::now());
        book.validate()
            .map_err(|e| OpinionError::Data(e.to_string()))?;
        Ok(book)
    }
}

fn normalize_opinion(raw: &RawOpinionMarket) -> Option<Vec<Market>> {
    if !raw.active {
        return None;
    }
    let market_id = raw.market_id.clone().filter(|m| !m.is_empty())?;
    let question = raw.question.clone().filter(|q| !q.is_empty())?;
    let yes = raw.yes_token_id.clone().filter(|t| !t.is_empty())?;
    let no = raw.no_token_id.clone().filter(|t| !t.is_empty())?;

    let liquidity = raw.liquidity.as_ref().and_then(parse_decimal);
    let volume = raw.volume.as_ref().and_then(parse_decimal);
    let end_time = raw
        .end_time
        .as_deref()
        .and_then(|d| d.parse::<chrono::DateTime<Utc>>().ok());

    let make = |token_id: String, outcome: Outcome| Market {
        venue: Venue::Opinion,
        token_id,
        question: question.clone(),
        condition_id: Some(market_id.clone()),
        event_id: None,
        outcome,
        is_neg_risk: false,
        is_yield_bearing: false,
        fee_rate_bps: 0,
        activation: None,
        liquidity_24h: liquidity,
        volume_24h: volume,
        end_time,
    };

    Some(vec![make(yes, Outcome::Yes), make(no, Outcome::No)])
}
