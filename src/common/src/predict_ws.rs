//! Predict WebSocket feed.
//!
//! JSON-RPC-shaped subscriptions on `predictOrderbook/<topicId>` topics,
//! where the topic id is the token, condition or event id depending on
//! configuration. Heartbeats are echoed verbatim.

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::{PredictTopicKey, PredictWsConfig};
use crate::feed::{Backoff, BookHandler, FeedCore, FeedStatus};
use crate::models::{Market, Orderbook, OrderbookLevel, Venue};
use crate::predict::parse_decimal;

/// One subscription: the token the book belongs to plus the wire topic id.
#[derive(Debug, Clone)]
pub struct SubscribeSpec {
    pub token_id: String,
    pub topic_id: String,
}

impl SubscribeSpec {
    /// Build the spec for a market under the configured topic key. Falls
    /// back to the token id when the market lacks the keyed id.
    pub fn for_market(market: &Market, key: PredictTopicKey) -> Self {
        let topic_id = match key {
            PredictTopicKey::TokenId => market.token_id.clone(),
            PredictTopicKey::ConditionId => market
                .condition_id
                .clone()
                .unwrap_or_else(|| market.token_id.clone()),
            PredictTopicKey::EventId => market
                .event_id
                .clone()
                .unwrap_or_else(|| market.token_id.clone()),
        };
        Self {
            token_id: market.token_id.clone(),
            topic_id,
        }
    }
}

enum FeedCommand {
    Subscribe(Vec<SubscribeSpec>),
}

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    topic: Option<String>,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WsBookPayload {
    orderbook: Option<WsBook>,
    #[serde(alias = "tokenId", alias = "token_id")]
    token_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsBook {
    #[serde(default)]
    bids: Vec<Value>,
    #[serde(default)]
    asks: Vec<Value>,
}

const ORDERBOOK_TOPIC_PREFIX: &str = "predictOrderbook/";

pub struct PredictWsFeed {
    core: Arc<FeedCore>,
    cfg: PredictWsConfig,
    reconnect_min_ms: u64,
    reconnect_max_ms: u64,
    request_id: AtomicU64,
    /// topic id -> token id for condition/event keyed subscriptions.
    topics: RwLock<HashMap<String, String>>,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
}

impl PredictWsFeed {
    pub fn new(cfg: PredictWsConfig, reconnect_min_ms: u64, reconnect_max_ms: u64) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            core: FeedCore::new(Venue::Predict),
            cfg,
            reconnect_min_ms,
            reconnect_max_ms,
            request_id: AtomicU64::new(1),
            topics: RwLock::new(HashMap::new()),
            cmd_tx,
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
        })
    }

    pub fn core(&self) -> &Arc<FeedCore> {
        &self.core
    }

    /// Idempotent: already-subscribed tokens are skipped.
    pub fn subscribe(&self, specs: Vec<SubscribeSpec>) {
        let new_tokens = self
            .core
            .add_subscriptions(&specs.iter().map(|s| s.token_id.clone()).collect::<Vec<_>>());
        let new_specs: Vec<SubscribeSpec> = specs
            .into_iter()
            .filter(|s| new_tokens.contains(&s.token_id))
            .collect();
        if new_specs.is_empty() {
            return;
        }
        {
            let mut topics = self.topics.write();
            for spec in &new_specs {
                topics.insert(spec.topic_id.clone(), spec.token_id.clone());
            }
        }
        let _ = self.cmd_tx.send(FeedCommand::Subscribe(new_specs));
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

    fn subscribe_frame(&self, spec: &SubscribeSpec) -> String {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        json!({
            "method": "subscribe",
            "requestId": request_id,
            "params": [format!("{ORDERBOOK_TOPIC_PREFIX}{}", spec.topic_id)],
        })
        .to_string()
    }

    /// Spawn the long-lived socket task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .take()
            .expect("predict ws feed spawned twice");
        let mut backoff = Backoff::new(self.reconnect_min_ms, self.reconnect_max_ms);

        loop {
            let (mut ws, _) = match connect_async(&self.cfg.url).await {
                Ok(conn) => conn,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("predict ws connect failed: {e}. Retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            info!("predict ws connected to {}", self.cfg.url);
            self.core.set_connected(true);

            // Replay the full subscription set.
            let topics: Vec<SubscribeSpec> = {
                let topics = self.topics.read();
                topics
                    .iter()
                    .map(|(topic_id, token_id)| SubscribeSpec {
                        token_id: token_id.clone(),
                        topic_id: topic_id.clone(),
                    })
                    .collect()
            };
            let mut send_failed = false;
            for spec in &topics {
                if ws.send(Message::Text(self.subscribe_frame(spec).into())).await.is_err() {
                    send_failed = true;
                    break;
                }
            }
            if send_failed {
                self.core.set_connected(false);
                continue;
            }

            let mut established = false;
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(FeedCommand::Subscribe(specs)) => {
                            let mut failed = false;
                            for spec in &specs {
                                if ws.send(Message::Text(self.subscribe_frame(spec).into())).await.is_err() {
                                    failed = true;
                                    break;
                                }
                            }
                            if failed { break; }
                        }
                        None => return,
                    },
                    msg = self.next_message(&mut ws) => match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.core.mark_message();
                            if !established {
                                established = true;
                                backoff.reset();
                            }
                            self.handle_text(&text, &mut ws).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("predict ws error: {e}");
                            break;
                        }
                    },
                }
            }

            self.core.set_connected(false);
            if self.cfg.reset_on_reconnect {
                self.core.clear_books();
            }
            let delay = backoff.next_delay();
            warn!("predict ws disconnected, reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    /// Read the next frame, honoring the silent-socket watchdog when
    /// configured. A timeout yields `None` to force a reconnect.
    async fn next_message(
        &self,
        ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    ) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        if self.cfg.stale_ms == 0 {
            return ws.next().await;
        }
        match timeout(Duration::from_millis(self.cfg.stale_ms), ws.next()).await {
            Ok(msg) => msg,
            Err(_) => {
                warn!("predict ws silent for {}ms, terminating socket", self.cfg.stale_ms);
                None
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        ws: &mut (impl SinkExt<Message> + Unpin),
    ) {
        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(_) => {
                debug!("predict ws dropped malformed frame");
                return;
            }
        };
        if envelope.msg_type.as_deref() != Some("M") {
            return;
        }
        let topic = match envelope.topic.as_deref() {
            Some(t) => t,
            None => return,
        };

        if topic == "heartbeat" {
            let _ = ws.send(Message::Text(text.to_string().into())).await;
            return;
        }

        let Some(topic_id) = topic.strip_prefix(ORDERBOOK_TOPIC_PREFIX) else {
            return;
        };
        let Some(data) = envelope.data else { return };
        let payload: WsBookPayload = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(_) => {
                debug!("predict ws dropped unparseable orderbook payload");
                return;
            }
        };
        let Some(raw_book) = payload.orderbook else { return };

        // Condition/event topics carry the token inside the payload; token
        // topics are their own token.
        let token_id = payload
            .token_id
            .or_else(|| self.topics.read().get(topic_id).cloned())
            .unwrap_or_else(|| topic_id.to_string());

        let book = Orderbook::new(
            token_id,
            parse_ws_levels(&raw_book.bids),
            parse_ws_levels(&raw_book.asks),
            chrono::Utc::now(),
        );
        self.core.store_book(book);
    }
}

fn parse_ws_levels(raw: &[Value]) -> Vec<OrderbookLevel> {
    raw.iter()
        .filter_map(|entry| {
            let price = entry.get("price").and_then(parse_decimal)?;
            let shares = entry
                .get("shares")
                .or_else(|| entry.get("size"))
                .and_then(parse_decimal)?;
            Some(OrderbookLevel::new(price, shares))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use rust_decimal_macros::dec;

    fn market(token: &str, condition: Option<&str>) -> Market {
        Market {
            venue: Venue::Predict,
            token_id: token.to_string(),
            question: "q".into(),
            condition_id: condition.map(String::from),
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

    #[test]
    fn test_subscribe_spec_topic_keys() {
        let m = market("tok-1", Some("cond-1"));
        let by_token = SubscribeSpec::for_market(&m, PredictTopicKey::TokenId);
        assert_eq!(by_token.topic_id, "tok-1");
        let by_condition = SubscribeSpec::for_market(&m, PredictTopicKey::ConditionId);
        assert_eq!(by_condition.topic_id, "cond-1");
        // Missing event id falls back to the token id.
        let by_event = SubscribeSpec::for_market(&m, PredictTopicKey::EventId);
        assert_eq!(by_event.topic_id, "tok-1");
    }

    #[test]
    fn test_parse_ws_levels_accepts_both_shapes() {
        let raw = vec![
            json!({ "price": "0.42", "shares": "200" }),
            json!({ "price": 0.55, "size": 100 }),
            json!({ "price": "bad" }),
        ];
        let levels = parse_ws_levels(&raw);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, dec!(0.42));
        assert_eq!(levels[1].shares, dec!(100));
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let feed = PredictWsFeed::new(PredictWsConfig::default(), 1_000, 30_000);
        let frame = feed.subscribe_frame(&SubscribeSpec {
            token_id: "tok-1".into(),
            topic_id: "tok-1".into(),
        });
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["method"], "subscribe");
        assert_eq!(parsed["params"][0], "predictOrderbook/tok-1");
        assert!(parsed["requestId"].is_number());
    }

    #[test]
    fn test_subscribe_registers_topics_once() {
        let feed = PredictWsFeed::new(PredictWsConfig::default(), 1_000, 30_000);
        let spec = SubscribeSpec {
            token_id: "tok-1".into(),
            topic_id: "cond-1".into(),
        };
        feed.subscribe(vec![spec.clone()]);
        feed.subscribe(vec![spec]);
        assert_eq!(feed.status().subscribed, 1);
        assert_eq!(feed.topics.read().get("cond-1").unwrap(), "tok-1");
    }
}
