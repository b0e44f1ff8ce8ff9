//! Webhook alerting with per-key throttling.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::AlertConfig;

/// What happened to one alert attempt. Callers that count delivered alerts
/// must distinguish a throttled skip from a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// No webhook configured, or the key is inside its throttle window.
    Skipped,
    /// The webhook accepted the alert.
    Delivered,
    /// The attempt consumed the throttle slot but delivery failed.
    Failed,
}

/// Posts JSON alerts to the configured webhook, at most once per key per
/// minimum interval. With no webhook configured every send is a no-op.
pub struct AlertSink {
    http: reqwest::Client,
    webhook_url: Option<String>,
    min_interval: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertSink {
    pub fn new(cfg: &AlertConfig, timeout_ms: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .expect("reqwest client"),
            webhook_url: cfg.webhook_url.clone(),
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// True when the key is currently outside its throttle window.
    pub fn should_send(&self, key: &str) -> bool {
        let last_sent = self.last_sent.lock();
        match last_sent.get(key) {
            Some(at) => at.elapsed() >= self.min_interval,
            None => true,
        }
    }

    /// Send an alert for `key`, honoring the throttle. Delivery failures
    /// are reported in the outcome, never propagated as errors.
    pub async fn send(&self, key: &str, payload: Value) -> AlertOutcome {
        let Some(url) = &self.webhook_url else {
            return AlertOutcome::Skipped;
        };
        {
            let mut last_sent = self.last_sent.lock();
            match last_sent.get(key) {
                Some(at) if at.elapsed() < self.min_interval => {
                    debug!("alert {} throttled", key);
                    return AlertOutcome::Skipped;
                }
                _ => {
                    last_sent.insert(key.to_string(), Instant::now());
                }
            }
        }

        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => AlertOutcome::Delivered,
            Ok(resp) => {
                warn!("alert webhook returned {}", resp.status());
                AlertOutcome::Failed
            }
            Err(e) => {
                warn!("alert webhook delivery failed: {e}");
                AlertOutcome::Failed
            }
        }
    }

    /// Drop throttle entries older than the interval to bound the map.
    pub fn prune(&self) {
        let mut last_sent = self.last_sent.lock();
        let min_interval = self.min_interval;
        last_sent.retain(|_, at| at.elapsed() < min_interval * 4);
    }
}
