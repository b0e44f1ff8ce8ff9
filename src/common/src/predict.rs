//! Predict REST client.
//!
//! Discovery and orderbook endpoints ship in two generations; the client
//! probes the `/v1` path first and falls back to the legacy path when the
//! probe returns 404/405/501. The winning variant is remembered per endpoint.

use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PredictConfig;
use crate::models::{
    Activation, Market, Orderbook, OrderbookLevel, Outcome, Position, Venue,
};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("authentication rejected (401)")]
    Auth,

    #[error("rate limited (429)")]
    RateLimited,

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Data(String),

    #[error("order rejected: {0}")]
    Rejected(String),
}

impl PredictError {
    fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => PredictError::Auth,
            429 => PredictError::RateLimited,
            code => PredictError::Status(code),
        }
    }

    /// Transient failures are safe to retry once on idempotent calls.
    pub fn is_transient(&self) -> bool {
        matches!(self, PredictError::Network(_)) || matches!(self, PredictError::Status(c) if *c >= 500)
    }
}

/// Statuses that advance the endpoint probe to the next path variant.
fn probe_miss(status: StatusCode) -> bool {
    matches!(status.as_u16(), 404 | 405 | 501)
}

/// Raw market record; tolerant of both field-name generations.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMarket {
    #[serde(alias = "token_id")]
    token_id: Option<String>,
    question: Option<String>,
    #[serde(alias = "condition_id")]
    condition_id: Option<String>,
    #[serde(alias = "event_id")]
    event_id: Option<String>,
    outcome: Option<String>,
    #[serde(alias = "neg_risk", default)]
    is_neg_risk: bool,
    #[serde(alias = "yield_bearing", default)]
    is_yield_bearing: bool,
    #[serde(alias = "fee_rate_bps", default)]
    fee_rate_bps: u32,
    activation: Option<RawActivation>,
    #[serde(alias = "liquidity_24hr")]
    liquidity24hr: Option<Value>,
    #[serde(alias = "volume_24hr")]
    volume24hr: Option<Value>,
    #[serde(alias = "end_date")]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActivation {
    #[serde(default)]
    active: bool,
    #[serde(alias = "min_shares")]
    min_shares: Option<Value>,
    #[serde(alias = "max_spread_cents")]
    max_spread_cents: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: Value,
    #[serde(alias = "size")]
    shares: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    #[serde(alias = "token_id")]
    token_id: String,
    #[serde(alias = "yes_shares")]
    yes_shares: Option<Value>,
    #[serde(alias = "no_shares")]
    no_shares: Option<Value>,
    #[serde(alias = "avg_entry")]
    avg_entry: Option<Value>,
    mark: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: Option<String>,
    #[serde(alias = "orderId", alias = "order_id")]
    order_id: Option<String>,
    #[serde(alias = "errorMsg", alias = "error_msg")]
    error: Option<String>,
}

/// Parse a JSON number or numeric string into a Decimal.
pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Predict REST client. Cheap to clone behind an `Arc`.
pub struct PredictClient {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
    jwt: Option<String>,
    markets_variant: AtomicUsize,
    book_variant: AtomicUsize,
    positions_variant: AtomicUsize,
}

impl PredictClient {
    pub fn new(cfg: &PredictConfig, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base: cfg.api_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            jwt: cfg.jwt_token.clone(),
            markets_variant: AtomicUsize::new(0),
            book_variant: AtomicUsize::new(0),
            positions_variant: AtomicUsize::new(0),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        if let Some(jwt) = &self.jwt {
            req = req.bearer_auth(jwt);
        }
        req
    }

    /// GET with path-variant probing. On 404/405/501 for the preferred
    /// variant, advances to the next and retries once.
    async fn get_probed(
        &self,
        variant: &AtomicUsize,
        paths: &[String],
    ) -> Result<Value, PredictError> {
        let start = variant.load(Ordering::Relaxed).min(paths.len() - 1);
        let mut idx = start;
        loop {
            let resp = self
                .request(reqwest::Method::GET, &paths[idx])
                .send()
                .await?;
            let status = resp.status();
            if status.is_success() {
                variant.store(idx, Ordering::Relaxed);
                return Ok(resp.json::<Value>().await?);
            }
            if probe_miss(status) && idx + 1 < paths.len() {
                debug!("path {} returned {}, trying fallback", paths[idx], status);
                idx += 1;
                continue;
            }
            return Err(PredictError::from_status(status));
        }
    }

    /// Idempotent GETs retry once on transient failures.
    async fn get_probed_with_retry(
        &self,
        variant: &AtomicUsize,
        paths: &[String],
    ) -> Result<Value, PredictError> {
        match self.get_probed(variant, paths).await {
            Err(e) if e.is_transient() => {
                debug!("transient failure ({e}), retrying once");
                self.get_probed(variant, paths).await
            }
            other => other,
        }
    }

    /// List active markets (one record per outcome token).
    pub async fn list_markets(&self) -> Result<Vec<Market>, PredictError> {
        let paths = ["/v1/markets".to_string(), "/markets".to_string()];
        let value = self.get_probed_with_retry(&self.markets_variant, &paths).await?;
        let records = value
            .as_array()
            .or_else(|| value.get("markets").and_then(Value::as_array))
            .ok_or_else(|| PredictError::Data("markets payload is not an array".into()))?;

        let mut markets = Vec::with_capacity(records.len());
        let mut dropped = 0usize;
        for record in records {
            match serde_json::from_value::<RawMarket>(record.clone()) {
                Ok(raw) => match normalize_market(raw) {
                    Some(m) => markets.push(m),
                    None => dropped += 1,
                },
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("dropped {} unnormalizable market records", dropped);
        }
        Ok(markets)
    }

    /// Fetch the order book for one token.
    pub async fn orderbook(&self, token_id: &str) -> Result<Orderbook, PredictError> {
        let paths = [
            format!("/v1/markets/{token_id}/orderbook"),
            format!("/orderbooks/{token_id}"),
        ];
        let value = self.get_probed_with_retry(&self.book_variant, &paths).await?;
        let raw: RawBook = serde_json::from_value(
            value
                .get("orderbook")
                .cloned()
                .unwrap_or(value),
        )
        .map_err(|e| PredictError::Data(e.to_string()))?;

        let book = Orderbook::new(
            token_id,
            normalize_levels(&raw.bids),
            normalize_levels(&raw.asks),
            Utc::now(),
        );
        book.validate()
            .map_err(|e| PredictError::Data(e.to_string()))?;
        Ok(book)
    }

    /// Fetch current positions.
    pub async fn positions(&self) -> Result<Vec<Position>, PredictError> {
        let paths = ["/v1/positions".to_string(), "/positions".to_string()];
        let value = self.get_probed_with_retry(&self.positions_variant, &paths).await?;
        let records = value
            .as_array()
            .or_else(|| value.get("positions").and_then(Value::as_array))
            .ok_or_else(|| PredictError::Data("positions payload is not an array".into()))?;

        let positions = records
            .iter()
            .filter_map(|r| serde_json::from_value::<RawPosition>(r.clone()).ok())
            .map(|raw| {
                let yes = raw.yes_shares.as_ref().and_then(parse_decimal).unwrap_or_default();
                let no = raw.no_shares.as_ref().and_then(parse_decimal).unwrap_or_default();
                let avg = raw.avg_entry.as_ref().and_then(parse_decimal).unwrap_or_default();
                let mark = raw.mark.as_ref().and_then(parse_decimal).unwrap_or_default();
                Position {
                    token_id: raw.token_id,
                    yes_shares: yes,
                    no_shares: no,
                    avg_entry: avg,
                    mark,
                    pnl: (mark - avg) * (yes - no),
                }
            })
            .collect();
        Ok(positions)
    }

    /// Submit a pre-signed order envelope. The `order` value is opaque to
    /// the client; the submitter produced it through the signing capability.
    pub async fn submit_order(
        &self,
        signed_order: Value,
        price_per_share: Decimal,
        strategy: &str,
        slippage_bps: Option<u32>,
    ) -> Result<String, PredictError> {
        let mut data = json!({
            "order": signed_order,
            "pricePerShare": price_per_share,
            "strategy": strategy,
        });
        if let Some(bps) = slippage_bps {
            data["slippageBps"] = json!(bps);
        }

        let resp = self
            .request(reqwest::Method::POST, "/orders")
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PredictError::from_status(status));
        }

        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| PredictError::Data(e.to_string()))?;
        if let Some(err) = body.error.filter(|e| !e.is_empty()) {
            return Err(PredictError::Rejected(err));
        }
        body.hash
            .or(body.order_id)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PredictError::Data("submit response missing hash".into()))
    }

    /// Cancel a batch of orders by handle. Unknown handles are a no-op.
    pub async fn cancel_orders(&self, hashes: &[String]) -> Result<(), PredictError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let resp = self
            .request(reqwest::Method::POST, "/orders/remove")
            .json(&json!({ "ids": hashes }))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(PredictError::from_status(status))
    }
}

fn normalize_market(raw: RawMarket) -> Option<Market> {
    let token_id = raw.token_id.filter(|t| !t.is_empty())?;
    let question = raw.question.unwrap_or_default();
    let activation = raw.activation.map(|a| Activation {
        active: a.active,
        min_shares: a
            .min_shares
            .as_ref()
            .and_then(parse_decimal)
            .unwrap_or_default(),
        max_spread_cents: a
            .max_spread_cents
            .as_ref()
            .and_then(parse_decimal)
            .unwrap_or_default(),
    });
    Some(Market {
        venue: Venue::Predict,
        token_id,
        question,
        condition_id: raw.condition_id.filter(|c| !c.is_empty()),
        event_id: raw.event_id.filter(|e| !e.is_empty()),
        outcome: raw
            .outcome
            .as_deref()
            .map(Outcome::parse)
            .unwrap_or_default(),
        is_neg_risk: raw.is_neg_risk,
        is_yield_bearing: raw.is_yield_bearing,
        fee_rate_bps: raw.fee_rate_bps,
        activation,
        liquidity_24h: raw.liquidity24hr.as_ref().and_then(parse_decimal),
        volume_24h: raw.volume24hr.as_ref().and_then(parse_decimal),
        end_time: raw
            .end_date
            .as_deref()
            .and_then(|d| d.parse::<chrono::DateTime<Utc>>().ok()),
    })
}

fn normalize_levels(raw: &[RawLevel]) -> Vec<OrderbookLevel> {
    raw.iter()
        .filter_map(|l| {
            let price = parse_decimal(&l.price)?;
            let shares = parse_decimal(&l.shares)?;
            Some(OrderbookLevel::new(price, shares))
        })
        .collect()
}
