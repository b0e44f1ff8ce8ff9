//! Execution gating: dedup, stability windows, cooldowns and the error
//! circuit breaker.
//!
//! The gate never blocks scanning or alerting bookkeeping itself; it only
//! answers whether a given opportunity key may be alerted or executed right
//! now. Key state is bounded by an LRU cap.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use common::OpportunityKey;

/// Bound on tracked keys before the oldest are evicted.
const MAX_TRACKED_KEYS: usize = 1024;

#[derive(Debug, Default)]
struct KeyState {
    sightings: VecDeque<Instant>,
    last_alert_at: Option<Instant>,
    last_execution_at: Option<Instant>,
    last_seen_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub alert_min_interval: Duration,
    pub execution_cooldown: Duration,
    pub stability_min_count: usize,
    pub stability_window: Duration,
    pub max_errors: usize,
    pub error_window: Duration,
    pub pause_on_error: Duration,
}

/// Per-key gating state plus the executor circuit breaker.
pub struct OpportunityGate {
    cfg: GateConfig,
    keys: HashMap<OpportunityKey, KeyState>,
    errors: VecDeque<Instant>,
    paused_until: Option<Instant>,
}

impl OpportunityGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self {
            cfg,
            keys: HashMap::new(),
            errors: VecDeque::new(),
            paused_until: None,
        }
    }

    /// Record that the key was observed this scan.
    pub fn record_sighting(&mut self, key: &OpportunityKey, now: Instant) {
        self.evict_if_needed();
        let state = self.keys.entry(key.clone()).or_default();
        state.sightings.push_back(now);
        state.last_seen_at = Some(now);
        let window = self.cfg.stability_window;
        while let Some(front) = state.sightings.front() {
            if now.duration_since(*front) > window {
                state.sightings.pop_front();
            } else {
                break;
            }
        }
    }

    /// Seen at least `stability_min_count` times within the window.
    pub fn is_stable(&self, key: &OpportunityKey) -> bool {
        self.keys
            .get(key)
            .map(|s| s.sightings.len() >= self.cfg.stability_min_count)
            .unwrap_or(false)
    }

    /// Alert throttle: at most once per key per minimum interval.
    pub fn should_alert(&mut self, key: &OpportunityKey, now: Instant) -> bool {
        let state = self.keys.entry(key.clone()).or_default();
        let due = state
            .last_alert_at
            .map(|at| now.duration_since(at) >= self.cfg.alert_min_interval)
            .unwrap_or(true);
        if due {
            state.last_alert_at = Some(now);
        }
        due
    }

    /// Execution cooldown per key.
    pub fn execution_allowed(&self, key: &OpportunityKey, now: Instant) -> bool {
        self.keys
            .get(key)
            .and_then(|s| s.last_execution_at)
            .map(|at| now.duration_since(at) >= self.cfg.execution_cooldown)
            .unwrap_or(true)
    }

    pub fn record_execution(&mut self, key: &OpportunityKey, now: Instant) {
        self.keys.entry(key.clone()).or_default().last_execution_at = Some(now);
    }

    /// Count an executor error toward the breaker.
    pub fn record_error(&mut self, now: Instant) {
        self.errors.push_back(now);
        while let Some(front) = self.errors.front() {
            if now.duration_since(*front) > self.cfg.error_window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
        if self.errors.len() >= self.cfg.max_errors {
            warn!(
                "circuit breaker open: {} errors within window, pausing execution for {:?}",
                self.errors.len(),
                self.cfg.pause_on_error
            );
            self.paused_until = Some(now + self.cfg.pause_on_error);
            self.errors.clear();
        }
    }

    /// Breaker state. Pauses the executor, never the scanner.
    pub fn breaker_open(&mut self, now: Instant) -> bool {
        match self.paused_until {
            Some(until) if now < until => true,
            Some(_) => {
                debug!("circuit breaker closed");
                self.paused_until = None;
                false
            }
            None => false,
        }
    }

    fn evict_if_needed(&mut self) {
        if self.keys.len() < MAX_TRACKED_KEYS {
            return;
        }
        // Drop the least-recently-seen key.
        if let Some(oldest) = self
            .keys
            .iter()
            .min_by_key(|(_, s)| s.last_seen_at)
            .map(|(k, _)| k.clone())
        {
            self.keys.remove(&oldest);
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }
}
