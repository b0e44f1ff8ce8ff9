//! Order submission seams.
//!
//! The core never signs anything. `OrderSigner` is the injected capability
//! that turns an order intent into a venue-ready signed payload; the
//! in-tree implementation shells out to an external signing helper, keeping
//! all cryptography outside this codebase. `OrderSubmitter` is what the
//! maker and executor talk to.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::{Market, Orderbook, OrderKind, OrderSide, Venue};
use crate::opportunity::Leg;
use crate::predict::{PredictClient, PredictError};
use crate::vwap::{estimate_buy, estimate_sell, FeeParams};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("authentication rejected")]
    Auth,

    #[error("rate limited")]
    RateLimited,

    #[error("network failure: {0}")]
    Network(String),

    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("invalid order: {0}")]
    Invalid(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<PredictError> for SubmitError {
    fn from(e: PredictError) -> Self {
        match e {
            PredictError::Auth => SubmitError::Auth,
            PredictError::RateLimited => SubmitError::RateLimited,
            PredictError::Network(err) => SubmitError::Network(err.to_string()),
            PredictError::Rejected(msg) => SubmitError::Rejected(msg),
            PredictError::Status(code) => SubmitError::Network(format!("status {code}")),
            PredictError::Data(msg) => SubmitError::Rejected(msg),
        }
    }
}

/// Handle returned by the venue for a submitted order.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitterAddresses {
    pub maker: String,
    pub signer: String,
}

/// Intent handed to the signing capability.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub token_id: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub shares: Decimal,
}

/// Signed payload plus its venue handle, produced outside the core.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub payload: Value,
    pub hash: String,
}

/// Injected signing capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSigner: Send + Sync {
    async fn sign(&self, intent: &OrderIntent) -> Result<SignedOrder, SubmitError>;
    fn addresses(&self) -> SubmitterAddresses;
}

/// Builds and submits venue orders.
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit_limit(
        &self,
        market: &Market,
        side: OrderSide,
        price: Decimal,
        shares: Decimal,
    ) -> Result<OrderHandle, SubmitError>;

    /// Market order priced off the current book with a slippage allowance.
    async fn submit_market(
        &self,
        market: &Market,
        side: OrderSide,
        shares: Decimal,
        book: &Orderbook,
        slippage_bps: u32,
    ) -> Result<OrderHandle, SubmitError>;

    /// Cancel by handle. Unknown handles are a successful no-op.
    async fn cancel(&self, handles: &[String]) -> Result<(), SubmitError>;

    fn addresses(&self) -> SubmitterAddresses;
}

/// Peer-venue leg submission for cross-venue executions and hedges.
#[async_trait]
pub trait CrossVenueSubmitter: Send + Sync {
    fn venue(&self) -> Venue;
    async fn submit(&self, leg: &Leg) -> Result<OrderHandle, SubmitError>;
}

/// Signs by invoking an external helper process: the intent goes to stdin
/// as one JSON object, the signed payload comes back on stdout.
pub struct CommandSigner {
    command: String,
    maker: String,
    /// Passed through to the helper opaquely.
    private_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SignerResponse {
    order: Value,
    hash: String,
    #[serde(default)]
    signer: Option<String>,
}

impl CommandSigner {
    pub fn new(command: String, maker: String, private_key: Option<String>) -> Self {
        Self {
            command,
            maker,
            private_key,
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl OrderSigner for CommandSigner {
    async fn sign(&self, intent: &OrderIntent) -> Result<SignedOrder, SubmitError> {
        let request = json!({
            "tokenId": intent.token_id,
            "side": intent.side.as_str(),
            "kind": match intent.kind { OrderKind::Limit => "LIMIT", OrderKind::Market => "MARKET" },
            "price": intent.price,
            "shares": intent.shares,
            "maker": self.maker,
            "privateKey": self.private_key,
        });

        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SubmitError::Signing("empty signer command".into()))?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SubmitError::Signing(format!("spawn failed: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.to_string().as_bytes())
                .await
                .map_err(|e| SubmitError::Signing(format!("stdin write failed: {e}")))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SubmitError::Signing("signer timed out".into()))?
            .map_err(|e| SubmitError::Signing(e.to_string()))?;
        if !output.status.success() {
            return Err(SubmitError::Signing(format!(
                "signer exited with {}",
                output.status
            )));
        }

        let response: SignerResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| SubmitError::Signing(format!("unparseable signer output: {e}")))?;
        let _ = response.signer;
        Ok(SignedOrder {
            payload: response.order,
            hash: response.hash,
        })
    }

    fn addresses(&self) -> SubmitterAddresses {
        SubmitterAddresses {
            maker: self.maker.clone(),
            signer: self.maker.clone(),
        }
    }
}

/// Live Predict submitter: signs via the injected capability, posts the
/// `{ data: { order, pricePerShare, strategy, slippageBps } }` envelope.
pub struct PredictSubmitter {
    client: Arc<PredictClient>,
    signer: Arc<dyn OrderSigner>,
    strategy: String,
}

impl PredictSubmitter {
    pub fn new(client: Arc<PredictClient>, signer: Arc<dyn OrderSigner>) -> Self {
        Self {
            client,
            signer,
            strategy: "GTC".to_string(),
        }
    }

    async fn submit(
        &self,
        intent: OrderIntent,
        slippage_bps: Option<u32>,
    ) -> Result<OrderHandle, SubmitError> {
        if intent.shares <= Decimal::ZERO {
            return Err(SubmitError::Invalid("non-positive share quantity".into()));
        }
        if intent.price <= Decimal::ZERO || intent.price >= Decimal::ONE {
            return Err(SubmitError::Invalid(format!(
                "price {} outside (0, 1)",
                intent.price
            )));
        }

        let signed = self.signer.sign(&intent).await?;
        let mut payload = signed.payload;
        payload["hash"] = json!(signed.hash);

        let hash = self
            .client
            .submit_order(payload, intent.price, &self.strategy, slippage_bps)
            .await?;
        info!(
            "[SUBMIT] {} {} {} @ {} -> {}",
            intent.side, intent.shares, intent.token_id, intent.price, hash
        );
        Ok(OrderHandle { hash })
    }
}

#[async_trait]
impl OrderSubmitter for PredictSubmitter {
    async fn submit_limit(
        &self,
        market: &Market,
        side: OrderSide,
        price: Decimal,
        shares: Decimal,
    ) -> Result<OrderHandle, SubmitError> {
        self.submit(
            OrderIntent {
                token_id: market.token_id.clone(),
                side,
                kind: OrderKind::Limit,
                price,
                shares,
            },
            None,
        )
        .await
    }

    async fn submit_market(
        &self,
        market: &Market,
        side: OrderSide,
        shares: Decimal,
        book: &Orderbook,
        slippage_bps: u32,
    ) -> Result<OrderHandle, SubmitError> {
        let price = marketable_price(market, side, shares, book, slippage_bps)?;
        self.submit(
            OrderIntent {
                token_id: market.token_id.clone(),
                side,
                kind: OrderKind::Market,
                price,
                shares,
            },
            Some(slippage_bps),
        )
        .await
    }

    async fn cancel(&self, handles: &[String]) -> Result<(), SubmitError> {
        self.client.cancel_orders(handles).await?;
        Ok(())
    }

    fn addresses(&self) -> SubmitterAddresses {
        self.signer.addresses()
    }
}

/// Expected all-in price for a market order, used as the order's price
/// hint. Insufficient depth is an invalid order, not a silent partial fill.
fn marketable_price(
    market: &Market,
    side: OrderSide,
    shares: Decimal,
    book: &Orderbook,
    slippage_bps: u32,
) -> Result<Decimal, SubmitError> {
    let fees = FeeParams::flat(market.fee_rate_bps, slippage_bps);
    let estimate = match side {
        OrderSide::Buy => estimate_buy(&book.asks, shares, &fees),
        OrderSide::Sell => estimate_sell(&book.bids, shares, &fees),
    };
    estimate
        .map(|e| e.avg_all_in.clamp(Decimal::new(1, 2), Decimal::new(99, 2)))
        .ok_or_else(|| SubmitError::Invalid("insufficient depth for market order".into()))
}

/// Record of one dry-run submission, for logs and tests.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub token_id: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub shares: Decimal,
}

/// Submitter used when trading is disabled: logs every intent, fabricates
/// handles, and remembers what would have been sent.
#[derive(Default)]
pub struct DryRunSubmitter {
    counter: AtomicU64,
    history: Mutex<Vec<RecordedOrder>>,
    cancelled: Mutex<Vec<String>>,
}

impl DryRunSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<RecordedOrder> {
        self.history.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    fn record(&self, order: RecordedOrder) -> OrderHandle {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = format!("dry-{}-{}", Utc::now().timestamp_millis(), n);
        info!(
            "[DRY RUN] {} {} {} @ {} ({})",
            order.side, order.shares, order.token_id, order.price, hash
        );
        self.history.lock().push(order);
        OrderHandle { hash }
    }
}

#[async_trait]
impl OrderSubmitter for DryRunSubmitter {
    async fn submit_limit(
        &self,
        market: &Market,
        side: OrderSide,
        price: Decimal,
        shares: Decimal,
    ) -> Result<OrderHandle, SubmitError> {
        if shares <= Decimal::ZERO {
            return Err(SubmitError::Invalid("non-positive share quantity".into()));
        }
        Ok(self.record(RecordedOrder {
            token_id: market.token_id.clone(),
            side,
            kind: OrderKind::Limit,
            price,
            shares,
        }))
    }

    async fn submit_market(
        &self,
        market: &Market,
        side: OrderSide,
        shares: Decimal,
        book: &Orderbook,
        slippage_bps: u32,
    ) -> Result<OrderHandle, SubmitError> {
        let price = marketable_price(market, side, shares, book, slippage_bps)?;
        Ok(self.record(RecordedOrder {
            token_id: market.token_id.clone(),
            side,
            kind: OrderKind::Market,
            price,
            shares,
        }))
    }

    async fn cancel(&self, handles: &[String]) -> Result<(), SubmitError> {
        debug!("[DRY RUN] cancel {:?}", handles);
        self.cancelled.lock().extend(handles.iter().cloned());
        Ok(())
    }

    fn addresses(&self) -> SubmitterAddresses {
        SubmitterAddresses {
            maker: "dry-run".to_string(),
            signer: "dry-run".to_string(),
        }
    }
}

/// Placeholder for peer venues without a configured submitter; every
/// submission is rejected so executions fail loudly instead of silently.
pub struct UnavailableCrossVenue {
    venue: Venue,
}

impl UnavailableCrossVenue {
    pub fn new(venue: Venue) -> Self {
        Self { venue }
    }
}

#[async_trait]
impl CrossVenueSubmitter for UnavailableCrossVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn submit(&self, leg: &Leg) -> Result<OrderHandle, SubmitError> {
        warn!(
            "no {} submitter configured, rejecting leg for {}",
            self.venue, leg.token_id
        );
        Err(SubmitError::Rejected(format!(
            "no {} submitter configured",
            self.venue
        )))
    }
}
