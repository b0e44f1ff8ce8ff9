//! Opinion WebSocket feed.
//!
//! Channel subscription authenticated with the API key header; the client
//! sends an application heartbeat on a fixed interval and treats the
//! connection as dead when the server stops answering.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::OpinionConfig;
use crate::feed::{Backoff, BookHandler, FeedCore, FeedStatus};
use crate::models::{Orderbook, OrderbookLevel, Venue};
use crate::predict::parse_decimal;

#[derive(Debug, Deserialize)]
struct OpinionFrame {
    channel: Option<String>,
    #[serde(alias = "tokenId")]
    token_id: Option<String>,
    #[serde(default)]
    bids: Vec<Value>,
    #[serde(default)]
    asks: Vec<Value>,
}

enum FeedCommand {
    Subscribe(Vec<String>),
}

pub struct OpinionWsFeed {
    core: Arc<FeedCore>,
    cfg: OpinionConfig,
    reconnect_min_ms: u64,
    reconnect_max_ms: u64,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
}

impl OpinionWsFeed {
    pub fn new(cfg: OpinionConfig, reconnect_min_ms: u64, reconnect_max_ms: u64) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            core: FeedCore::new(Venue::Opinion),
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

    fn subscribe_frame(token_ids: &[String]) -> String {
        json!({
            "op": "subscribe",
            "channel": "orderbook",
            "tokenIds": token_ids,
        })
        .to_string()
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
            .expect("opinion ws feed spawned twice");
        let mut backoff = Backoff::new(self.reconnect_min_ms, self.reconnect_max_ms);

        loop {
            let mut request = match self.cfg.ws_url.as_str().into_client_request() {
                Ok(r) => r,
                Err(e) => {
                    warn!("opinion ws url invalid: {e}");
                    return;
                }
            };
            if let Some(key) = &self.cfg.api_key {
                if let Ok(value) = key.parse() {
                    request.headers_mut().insert("x-api-key", value);
                }
            }

            let (mut ws, _) = match connect_async(request).await {
                Ok(conn) => conn,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("opinion ws connect failed: {e}. Retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            info!("opinion ws connected to {}", self.cfg.ws_url);
            self.core.set_connected(true);

            let subscriptions = self.core.subscriptions();
            if !subscriptions.is_empty()
                && ws
                    .send(Message::Text(Self::subscribe_frame(&subscriptions).into()))
                    .await
                    .is_err()
            {
                self.core.set_connected(false);
                continue;
            }

            let mut heartbeat =
                tokio::time::interval(Duration::from_millis(self.cfg.ws_heartbeat_ms.max(1_000)));
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut established = false;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(FeedCommand::Subscribe(tokens)) => {
                            if ws.send(Message::Text(Self::subscribe_frame(&tokens).into())).await.is_err() {
                                break;
                            }
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
                        Some(Ok(Message::Pong(_))) => {
                            self.core.mark_message();
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("opinion ws error: {e}");
                            break;
                        }
                    },
                }
            }

            self.core.set_connected(false);
            self.core.clear_books();
            let delay = backoff.next_delay();
            warn!("opinion ws disconnected, reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame: OpinionFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(_) => {
                debug!("opinion ws dropped malformed frame");
                return;
            }
        };
        if frame.channel.as_deref() != Some("orderbook") {
            return;
        }
        let Some(token_id) = frame.token_id else { return };

        let to_levels = |raw: &[Value]| {
            raw.iter()
                .filter_map(|entry| {
                    let price = entry.get("price").and_then(parse_decimal)?;
                    let shares = entry
                        .get("size")
                        .or_else(|| entry.get("quantity"))
                        .and_then(parse_decimal)?;
                    Some(OrderbookLevel::new(price, shares))
                })
                .collect::<Vec<_>>()
        };

        let book = Orderbook::new(
            token_id,
            to_levels(&frame.bids),
            to_levels(&frame.asks),
            Utc::now(),
        );
        self.core.store_book(book);
    }
}
