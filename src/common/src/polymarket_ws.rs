//! Polymarket market-channel WebSocket feed.
//!
//! Subscriptions carry `assets_ids`; events arrive as `book` snapshots,
//! `price_change` single-level deltas, and `best_bid_ask` touch updates.
//! Unknown event types are dropped.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::PolymarketConfig;
use crate::feed::{Backoff, BookHandler, FeedCore, FeedStatus};
use crate::models::{Orderbook, OrderbookLevel, OrderSide, Venue};

/// Tokens per subscribe frame; larger sets are chunked.
const SUBSCRIBE_BATCH: usize = 100;

#[derive(Debug, Clone, Deserialize)]
struct WsLevel {
    price: String,
    size: String,
}

impl WsLevel {
    fn to_level(&self) -> Option<OrderbookLevel> {
        Some(OrderbookLevel::new(
            self.price.parse().ok()?,
            self.size.parse().ok()?,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BookEvent {
    asset_id: String,
    #[serde(default, alias = "buys")]
    bids: Vec<WsLevel>,
    #[serde(default, alias = "sells")]
    asks: Vec<WsLevel>,
    /// Event time in epoch milliseconds. Initial-dump batches replay books
    /// captured before the subscription settled; the cache layer drops the
    /// ones that are already stale.
    timestamp: Option<String>,
}

/// Parse an epoch-millisecond event timestamp.
fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let ms: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

#[derive(Debug, Clone, Deserialize)]
struct PriceChangeEntry {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PriceChangeEvent {
    #[serde(default)]
    price_changes: Vec<PriceChangeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct BestBidAskEvent {
    asset_id: String,
    best_bid: Option<String>,
    best_ask: Option<String>,
}

/// Decoded market-channel message.
#[derive(Debug)]
enum PolyWsMessage {
    Books(Vec<BookEvent>),
    PriceChange(PriceChangeEvent),
    BestBidAsk(BestBidAskEvent),
    Ignored,
}

/// Decode a raw frame. Arrays are initial subscription dumps.
fn parse_frame(text: &str) -> PolyWsMessage {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return PolyWsMessage::Ignored;
    };

    if let Some(arr) = value.as_array() {
        let books: Vec<BookEvent> = arr
            .iter()
            .filter(|v| v.get("event_type").and_then(Value::as_str) == Some("book"))
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        if !books.is_empty() {
            return PolyWsMessage::Books(books);
        }
        return PolyWsMessage::Ignored;
    }

    match value.get("event_type").and_then(Value::as_str) {
        Some("book") => serde_json::from_value::<BookEvent>(value)
            .map(|b| PolyWsMessage::Books(vec![b]))
            .unwrap_or(PolyWsMessage::Ignored),
        Some("price_change") => serde_json::from_value(value)
            .map(PolyWsMessage::PriceChange)
            .unwrap_or(PolyWsMessage::Ignored),
        Some("best_bid_ask") => serde_json::from_value(value)
            .map(PolyWsMessage::BestBidAsk)
            .unwrap_or(PolyWsMessage::Ignored),
        _ => PolyWsMessage::Ignored,
    }
}

enum FeedCommand {
    Subscribe(Vec<String>),
}

pub struct PolymarketWsFeed {
    core: Arc<FeedCore>,
    cfg: PolymarketConfig,
    reconnect_min_ms: u64,
    reconnect_max_ms: u64,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
}

impl PolymarketWsFeed {
    pub fn new(cfg: PolymarketConfig, reconnect_min_ms: u64, reconnect_max_ms: u64) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            core: FeedCore::new(Venue::Polymarket),
            cfg,
            reconnect_min_ms,
            reconnect_max_ms,
            cmd_tx,
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
        })
    }

    pub fn core(&self) -> &Arc<FeedCore> {
        &self.core
    }

    /// Idempotent: already-subscribed tokens are skipped.
    pub fn subscribe(&self, token_ids: Vec<String>) {
        let new_tokens = self.core.add_subscriptions(&token_ids);
        if !new_tokens.is_empty() {
            let _ = self.cmd_tx.send(FeedCommand::Subscribe(new_tokens));
        }
    }

    pub fn snapshot(&self, token_id: &str, max_age_ms: i64) -> Option<Orderbook> {
        self.core.snapshot(token_id, max_age_ms)
    }

    pub fn status(&self) -> FeedStatus {
        self.core.status()
    }

    pub fn on_change(&self, handler: BookHandler) {
        self.core.on_change(handler);
    }

    fn subscribe_frames(&self, token_ids: &[String], operation: Option<&str>) -> Vec<String> {
        token_ids
            .chunks(SUBSCRIBE_BATCH)
            .map(|chunk| {
                let mut frame = json!({
                    "type": "MARKET",
                    "assets_ids": chunk,
                });
                if let Some(op) = operation {
                    frame["operation"] = json!(op);
                }
                if self.cfg.ws_custom_feature {
                    frame["custom_feature"] = json!(true);
                }
                if self.cfg.ws_initial_dump {
                    frame["initial_dump"] = json!(true);
                }
                frame.to_string()
            })
            .collect()
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .take()
            .expect("polymarket ws feed spawned twice");
        let mut backoff = Backoff::new(self.reconnect_min_ms, self.reconnect_max_ms);

        loop {
            let (mut ws, _) = match connect_async(&self.cfg.ws_url).await {
                Ok(conn) => conn,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("polymarket ws connect failed: {e}. Retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            info!("polymarket ws connected to {}", self.cfg.ws_url);
            self.core.set_connected(true);

            // Replay the full subscription set in batches.
            let subscriptions = self.core.subscriptions();
            let mut send_failed = false;
            for frame in self.subscribe_frames(&subscriptions, None) {
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    send_failed = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if send_failed {
                self.core.set_connected(false);
                continue;
            }

            let mut established = false;
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(FeedCommand::Subscribe(tokens)) => {
                            let mut failed = false;
                            for frame in self.subscribe_frames(&tokens, Some("subscribe")) {
                                if ws.send(Message::Text(frame.into())).await.is_err() {
                                    failed = true;
                                    break;
                                }
                            }
                            if failed { break; }
                        }
                        None => return,
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.core.mark_message();
                            if !established {
                                established = true;
                                backoff.reset();
                            }
                            self.handle_frame(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("polymarket ws error: {e}");
                            break;
                        }
                    },
                }
            }

            self.core.set_connected(false);
            self.core.clear_books();
            let delay = backoff.next_delay();
            warn!("polymarket ws disconnected, reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    fn handle_frame(&self, text: &str) {
        match parse_frame(text) {
            PolyWsMessage::Books(books) => {
                for event in books {
                    let updated_at = event
                        .timestamp
                        .as_deref()
                        .and_then(parse_event_timestamp)
                        .unwrap_or_else(Utc::now);
                    let book = Orderbook::new(
                        event.asset_id.clone(),
                        event.bids.iter().filter_map(WsLevel::to_level).collect(),
                        event.asks.iter().filter_map(WsLevel::to_level).collect(),
                        updated_at,
                    );
                    self.core.store_book(book);
                }
            }
            PolyWsMessage::PriceChange(event) => {
                for change in &event.price_changes {
                    let (Ok(price), Ok(size)) = (
                        change.price.parse::<Decimal>(),
                        change.size.parse::<Decimal>(),
                    ) else {
                        debug!("polymarket ws dropped malformed price_change");
                        continue;
                    };
                    let side = match change.side.to_uppercase().as_str() {
                        "BUY" => OrderSide::Buy,
                        "SELL" => OrderSide::Sell,
                        _ => continue,
                    };
                    self.core.apply_delta(&change.asset_id, |book| {
                        apply_price_change(book, side, price, size);
                    });
                }
            }
            PolyWsMessage::BestBidAsk(event) => {
                let best_bid = event.best_bid.as_deref().and_then(|p| p.parse().ok());
                let best_ask = event.best_ask.as_deref().and_then(|p| p.parse().ok());
                self.core.apply_delta(&event.asset_id, |book| {
                    apply_touch_update(book, best_bid, best_ask);
                });
            }
            PolyWsMessage::Ignored => {}
        }
    }
}

/// Merge a single-level delta: size replaces the level, zero removes it.
fn apply_price_change(book: &mut Orderbook, side: OrderSide, price: Decimal, size: Decimal) {
    let levels = match side {
        OrderSide::Buy => &mut book.bids,
        OrderSide::Sell => &mut book.asks,
    };
    match levels.iter_mut().find(|l| l.price == price) {
        Some(level) => level.shares = size,
        None if size > Decimal::ZERO => levels.push(OrderbookLevel::new(price, size)),
        None => {}
    }
}

/// Touch-only update: move the best level's price, keeping its size.
fn apply_touch_update(book: &mut Orderbook, best_bid: Option<Decimal>, best_ask: Option<Decimal>) {
    if let (Some(price), Some(level)) = (best_bid, book.bids.first_mut()) {
        level.price = price;
    }
    if let (Some(price), Some(level)) = (best_ask, book.asks.first_mut()) {
        level.price = price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed() -> Arc<PolymarketWsFeed> {
        PolymarketWsFeed::new(PolymarketConfig::default(), 1_000, 30_000)
    }

    fn seed_book(feed: &PolymarketWsFeed, token: &str) {
        feed.handle_frame(
            &json!({
                "event_type": "book",
                "asset_id": token,
                "bids": [ { "price": "0.49", "size": "80" } ],
                "asks": [ { "price": "0.51", "size": "20" } ],
            })
            .to_string(),
        );
    }

    #[test]
    fn test_book_event_populates_cache() {
        let feed = feed();
        seed_book(&feed, "tok-1");
        let book = feed.snapshot("tok-1", 5_000).unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.49));
        assert_eq!(book.best_ask().unwrap().shares, dec!(20));
    }

    #[test]
    fn test_initial_dump_array_of_books() {
        let feed = feed();
        let frame = json!([
            {
                "event_type": "book",
                "asset_id": "tok-a",
                "bids": [ { "price": "0.30", "size": "10" } ],
                "asks": [ { "price": "0.32", "size": "10" } ],
            },
            {
                "event_type": "book",
                "asset_id": "tok-b",
                "bids": [],
                "asks": [ { "price": "0.70", "size": "5" } ],
            },
        ])
        .to_string();
        feed.handle_frame(&frame);
        assert!(feed.snapshot("tok-a", 5_000).is_some());
        assert!(feed.snapshot("tok-b", 5_000).is_some());
    }

    #[test]
    fn test_price_change_merges_level() {
        let feed = feed();
        seed_book(&feed, "tok-1");
        feed.handle_frame(
            &json!({
                "event_type": "price_change",
                "price_changes": [
                    { "asset_id": "tok-1", "price": "0.48", "size": "40", "side": "BUY" },
                    { "asset_id": "tok-1", "price": "0.49", "size": "0", "side": "BUY" },
                ],
            })
            .to_string(),
        );
        let book = feed.snapshot("tok-1", 5_000).unwrap();
        // 0.49 removed, 0.48 added as the new best bid.
        assert_eq!(book.best_bid().unwrap().price, dec!(0.48));
        assert_eq!(book.best_bid().unwrap().shares, dec!(40));
    }

    #[test]
    fn test_best_bid_ask_touch_update() {
        let feed = feed();
        seed_book(&feed, "tok-1");
        feed.handle_frame(
            &json!({
                "event_type": "best_bid_ask",
                "asset_id": "tok-1",
                "best_bid": "0.50",
                "best_ask": "0.52",
            })
            .to_string(),
        );
        let book = feed.snapshot("tok-1", 5_000).unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.50));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.52));
        // Sizes survive a touch-only update.
        assert_eq!(book.best_bid().unwrap().shares, dec!(80));
    }

    #[test]
    fn test_stale_buffered_book_discarded() {
        let feed = feed();
        // Event stamped 30s ago: a leftover from the subscription phase.
        let stale_ms = (Utc::now() - chrono::Duration::seconds(30)).timestamp_millis();
        feed.handle_frame(
            &json!({
                "event_type": "book",
                "asset_id": "tok-1",
                "timestamp": stale_ms.to_string(),
                "bids": [ { "price": "0.49", "size": "80" } ],
                "asks": [ { "price": "0.51", "size": "20" } ],
            })
            .to_string(),
        );
        assert!(feed.snapshot("tok-1", 60_000).is_none());

        // A fresh event timestamp is accepted and kept as the book time.
        let fresh_ms = Utc::now().timestamp_millis();
        feed.handle_frame(
            &json!({
                "event_type": "book",
                "asset_id": "tok-1",
                "timestamp": fresh_ms.to_string(),
                "bids": [ { "price": "0.49", "size": "80" } ],
                "asks": [ { "price": "0.51", "size": "20" } ],
            })
            .to_string(),
        );
        let book = feed.snapshot("tok-1", 60_000).unwrap();
        assert_eq!(book.updated_at.timestamp_millis(), fresh_ms);
    }

    #[test]
    fn test_unknown_event_dropped() {
        let feed = feed();
        feed.handle_frame(r#"{"event_type":"tick_size_change","asset_id":"x"}"#);
        feed.handle_frame("not json at all");
        assert_eq!(feed.status().cache_size, 0);
    }

    #[test]
    fn test_subscribe_frames_batch_and_flags() {
        let feed = feed();
        let tokens: Vec<String> = (0..150).map(|i| format!("tok-{i}")).collect();
        let frames = feed.subscribe_frames(&tokens, Some("subscribe"));
        assert_eq!(frames.len(), 2);
        let parsed: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["type"], "MARKET");
        assert_eq!(parsed["operation"], "subscribe");
        assert_eq!(parsed["assets_ids"].as_array().unwrap().len(), 100);
        assert_eq!(parsed["initial_dump"], true);
    }
}
