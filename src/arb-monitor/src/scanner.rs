//! Periodic and realtime opportunity scanning.
//!
//! The periodic scan samples the catalog and prices everything; the
//! realtime path drains dirty-token sets fed by WS change events and
//! rescans only the affected market groups. Both funnel into the same
//! gating pipeline: dedup, alert throttle, stability, circuit breaker, WS
//! health, preflight, then execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use common::{
    sort_by_edge, AlertOutcome, AlertSink, BookStore, Config, Executor, FeedCore, MappingTable,
    Market, MarketCatalog, Opportunity, OpportunityKind, PeerCatalog, PredictClient, Venue,
};

use crate::detectors::{
    self, cross, CrossVenueDetector, Detector, IntraVenueDetector, MultiOutcomeDetector,
    Snapshot, ValueMismatchDetector,
};
use crate::metrics::ScanMetrics;
use crate::stability::OpportunityGate;

pub struct Scanner {
    config: Config,
    predict: Arc<PredictClient>,
    catalog: Arc<MarketCatalog>,
    peers: Arc<PeerCatalog>,
    store: Arc<BookStore>,
    feeds: Vec<Arc<FeedCore>>,
    detectors: Vec<Box<dyn Detector>>,
    mapping: Arc<MappingTable>,
    gate: OpportunityGate,
    alerts: AlertSink,
    executor: Option<Executor>,
    pub metrics: ScanMetrics,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        predict: Arc<PredictClient>,
        catalog: Arc<MarketCatalog>,
        peers: Arc<PeerCatalog>,
        store: Arc<BookStore>,
        feeds: Vec<Arc<FeedCore>>,
        mapping: Arc<MappingTable>,
        gate: OpportunityGate,
        alerts: AlertSink,
        executor: Option<Executor>,
    ) -> Self {
        let mut detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(IntraVenueDetector::new((&config.arb).into())),
            Box::new(MultiOutcomeDetector::new(
                config.multi_outcome.clone(),
                config.arb.min_profit,
                config.arb.depth_usage,
                config.arb.slippage_bps,
            )),
            Box::new(ValueMismatchDetector::new(detectors::value::ValueConfig {
                edge_threshold: config.arb.value_edge_threshold,
                confidence_threshold: config.arb.value_confidence_threshold,
                trading_cost: config.arb.value_trading_cost,
                depth_usage: config.arb.depth_usage,
            })),
        ];
        if config.cross_venue.enabled {
            detectors.push(Box::new(CrossVenueDetector::new(
                config.cross_venue.clone(),
                Arc::clone(&mapping),
            )));
        }

        Self {
            config,
            predict,
            catalog,
            peers,
            store,
            feeds,
            detectors,
            mapping,
            gate,
            alerts,
            executor,
            metrics: ScanMetrics::new(),
        }
    }

    /// Full periodic scan over a bounded market sample.
    pub async fn scan_once(&mut self) -> anyhow::Result<usize> {
        let started = Instant::now();
        self.metrics.scans += 1;

        let all_markets = self.catalog.active_markets().await?;
        let markets: Vec<Market> = all_markets
            .iter()
            .take(self.config.arb.max_markets)
            .cloned()
            .collect();
        self.metrics.markets_scanned += markets.len() as u64;

        let peer_markets = self.fetch_peer_markets().await;
        let snapshot = self.build_snapshot(markets, peer_markets).await;

        let found = self.detect_and_process(&snapshot).await;

        self.metrics.last_scan_ms = started.elapsed().as_millis() as u64;
        info!(
            "[SCAN] {} markets, {} opportunities in {}ms",
            snapshot.markets.len(),
            found,
            self.metrics.last_scan_ms
        );
        Ok(found)
    }

    /// Realtime rescan of the market groups containing the dirty tokens.
    pub async fn realtime_flush(&mut self, dirty: Vec<(Venue, String)>) -> anyhow::Result<usize> {
        if dirty.is_empty() {
            return Ok(0);
        }
        self.metrics.realtime_flushes += 1;

        let all_markets = self.catalog.active_markets().await?;
        let predict_dirty: HashSet<&str> = dirty
            .iter()
            .filter(|(venue, _)| *venue == Venue::Predict)
            .map(|(_, token)| token.as_str())
            .collect();
        let peer_dirty: HashSet<(Venue, &str)> = dirty
            .iter()
            .filter(|(venue, _)| *venue != Venue::Predict)
            .map(|(venue, token)| (*venue, token.as_str()))
            .collect();

        let mut markets = expand_groups(&all_markets, &predict_dirty);

        // Peer-token changes pull in the Predict markets they pair with.
        let peer_markets = if peer_dirty.is_empty() && !self.config.cross_venue.enabled {
            HashMap::new()
        } else {
            self.fetch_peer_markets().await
        };
        if !peer_dirty.is_empty() {
            let pairs = cross::build_pairs(
                &all_markets,
                &peer_markets,
                &self.mapping,
                &self.config.cross_venue,
            );
            let mut extra: HashSet<&str> = HashSet::new();
            for pair in &pairs {
                let touched = peer_dirty.contains(&(pair.b.venue, pair.b.yes_token.as_str()))
                    || peer_dirty.contains(&(pair.b.venue, pair.b.no_token.as_str()));
                if touched {
                    extra.insert(pair.a.yes_token.as_str());
                    extra.insert(pair.a.no_token.as_str());
                }
            }
            let more = expand_groups(&all_markets, &extra);
            let seen: HashSet<String> = markets.iter().map(|m| m.token_id.clone()).collect();
            markets.extend(more.into_iter().filter(|m| !seen.contains(&m.token_id)));
        }

        if markets.is_empty() {
            return Ok(0);
        }
        debug!("[REALTIME] rescanning {} tokens", markets.len());

        let snapshot = self.build_snapshot(markets, peer_markets).await;
        self.detect_and_process(&snapshot).await;
        Ok(snapshot.markets.len())
    }

    async fn fetch_peer_markets(&self) -> HashMap<Venue, Vec<Market>> {
        let mut peer_markets = HashMap::new();
        if self.config.cross_venue.enabled {
            for venue in self.peers.venues() {
                peer_markets.insert(venue, self.peers.list_markets(venue).await);
            }
        }
        peer_markets
    }

    /// Assemble the snapshot: WS-cached books where fresh, REST elsewhere,
    /// with bounded fetch concurrency.
    async fn build_snapshot(
        &mut self,
        markets: Vec<Market>,
        peer_markets: HashMap<Venue, Vec<Market>>,
    ) -> Snapshot {
        let mut snapshot = Snapshot {
            markets,
            peer_markets,
            ..Snapshot::default()
        };

        // Peer books are only needed for tokens that can actually pair.
        let pairs = cross::build_pairs(
            &snapshot.markets,
            &snapshot.peer_markets,
            &self.mapping,
            &self.config.cross_venue,
        );
        let mut wanted: Vec<(Venue, String)> = snapshot
            .markets
            .iter()
            .map(|m| (Venue::Predict, m.token_id.clone()))
            .collect();
        for pair in &pairs {
            wanted.push((pair.b.venue, pair.b.yes_token.clone()));
            wanted.push((pair.b.venue, pair.b.no_token.clone()));
        }
        let mut seen = HashSet::new();
        wanted.retain(|entry| seen.insert(entry.clone()));

        let semaphore = Arc::new(Semaphore::new(self.config.arb.orderbook_concurrency.max(1)));
        let mut tasks: JoinSet<Option<(Venue, common::Orderbook)>> = JoinSet::new();

        for (venue, token) in wanted {
            // WS cache via the merged store first.
            if let Some(book) =
                self.store
                    .snapshot(venue, &token, self.config.arb.ws_max_age_ms)
            {
                snapshot.insert_book(venue, book);
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let predict = Arc::clone(&self.predict);
            let peers = Arc::clone(&self.peers);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                match venue {
                    Venue::Predict => predict.orderbook(&token).await.ok().map(|b| (venue, b)),
                    _ => peers.orderbook(venue, &token).await.map(|b| (venue, b)),
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some((venue, book))) => {
                    self.metrics.books_fetched += 1;
                    self.store.put(venue, book.clone());
                    snapshot.insert_book(venue, book);
                }
                Ok(None) => self.metrics.book_fetch_errors += 1,
                Err(e) => {
                    warn!("book fetch task failed: {e}");
                    self.metrics.book_fetch_errors += 1;
                }
            }
        }

        snapshot
    }

    async fn detect_and_process(&mut self, snapshot: &Snapshot) -> usize {
        let mut opportunities = Vec::new();
        for detector in &self.detectors {
            let found = detector.scan(snapshot);
            self.metrics.record_opportunities(detector.name(), found.len());
            opportunities.extend(found);
        }
        if self.config.dependency.enabled() {
            if let Some(opp) = detectors::dependency::solve(&self.config.dependency, snapshot).await
            {
                self.metrics.record_opportunities("dependency", 1);
                opportunities.push(opp);
            }
        }
        sort_by_edge(&mut opportunities);

        let count = opportunities.len();
        self.process_opportunities(opportunities, snapshot).await;
        count
    }

    async fn process_opportunities(&mut self, opportunities: Vec<Opportunity>, snapshot: &Snapshot) {
        let now = Instant::now();
        let top_n = self.config.arb.execute_top_n.max(1);

        for (rank, opp) in opportunities.into_iter().enumerate() {
            let key = opp.key();
            self.gate.record_sighting(&key, now);
            info!("[OPP] {}", opp.summary());

            if self.gate.should_alert(&key, now) {
                let payload = serde_json::json!({
                    "key": key.to_string(),
                    "edge": opp.edge,
                    "confidence": opp.confidence,
                    "summary": opp.summary(),
                });
                match self.alerts.send(&key.to_string(), payload).await {
                    AlertOutcome::Delivered => self.metrics.alerts_sent += 1,
                    AlertOutcome::Failed => self.metrics.alerts_failed += 1,
                    AlertOutcome::Skipped => {}
                }
            }

            if rank >= top_n {
                continue;
            }
            if !self.auto_execute_enabled(&opp.kind) {
                continue;
            }
            if self.gate.breaker_open(now) {
                debug!("[EXEC] breaker open, skipping {}", key);
                continue;
            }
            if !self.ws_health_ok() {
                debug!("[EXEC] ws health gate failed, skipping {}", key);
                continue;
            }
            if !self.gate.is_stable(&key) {
                debug!("[EXEC] {} not stable yet", key);
                continue;
            }
            if !self.gate.execution_allowed(&key, now) {
                debug!("[EXEC] {} in execution cooldown", key);
                continue;
            }
            if !self.preflight(&opp, snapshot).await {
                self.metrics.preflight_rejections += 1;
                info!("[EXEC] {} failed preflight, skipping", key);
                continue;
            }

            let Some(executor) = &self.executor else { continue };
            let markets_by_token = markets_by_token(snapshot);
            let execution = executor.execute(&opp, &markets_by_token).await;
            self.gate.record_execution(&key, now);
            match execution.status {
                common::ExecutionStatus::Executed => self.metrics.executions += 1,
                _ => {
                    self.metrics.execution_failures += 1;
                    self.gate.record_error(now);
                }
            }
        }
    }

    /// Per-kind automation gates, AND-ed with everything else.
    fn auto_execute_enabled(&self, kind: &OpportunityKind) -> bool {
        match kind {
            OpportunityKind::ValueMismatch { .. } => {
                self.config.arb.auto_execute && self.config.arb.auto_execute_value
            }
            OpportunityKind::CrossVenue { .. } => {
                self.config.arb.auto_execute && self.config.cross_venue.auto_execute
            }
            _ => self.config.arb.auto_execute,
        }
    }

    fn ws_health_ok(&self) -> bool {
        if self.config.arb.require_ws && self.feeds.is_empty() {
            return false;
        }
        if !self.config.arb.require_ws_health {
            return true;
        }
        let now = chrono::Utc::now();
        self.feeds.iter().all(|feed| {
            feed.status()
                .is_healthy(self.config.arb.ws_health_max_age_ms, now)
        })
    }

    /// Re-fetch the books the opportunity depends on and re-run the same
    /// detector with unchanged thresholds. The key must still be emitted.
    async fn preflight(&mut self, opp: &Opportunity, snapshot: &Snapshot) -> bool {
        let mut fresh = Snapshot {
            markets: snapshot.markets.clone(),
            peer_markets: snapshot.peer_markets.clone(),
            ..Snapshot::default()
        };
        for leg in &opp.legs {
            let book = match leg.venue {
                Venue::Predict => self.predict.orderbook(&leg.token_id).await.ok(),
                venue => self.peers.orderbook(venue, &leg.token_id).await,
            };
            let Some(book) = book else { return false };
            self.store.put(leg.venue, book.clone());
            fresh.insert_book(leg.venue, book);
        }
        // Non-leg books the detector may need (e.g. the other assembly
        // direction) come from the stale snapshot.
        for (key, book) in &snapshot.books {
            fresh
                .books
                .entry(key.clone())
                .or_insert_with(|| book.clone());
        }

        let target = opp.key();
        if let OpportunityKind::Dependency { .. } = opp.kind {
            return detectors::dependency::solve(&self.config.dependency, &fresh)
                .await
                .map(|o| o.key() == target)
                .unwrap_or(false);
        }
        self.detectors
            .iter()
            .filter(|d| detector_matches(d.name(), &opp.kind))
            .flat_map(|d| d.scan(&fresh))
            .any(|o| o.key() == target)
    }

    pub fn gate(&self) -> &OpportunityGate {
        &self.gate
    }

    pub fn breaker_open(&mut self) -> bool {
        self.gate.breaker_open(Instant::now())
    }
}

fn detector_matches(name: &str, kind: &OpportunityKind) -> bool {
    matches!(
        (name, kind),
        ("intra_venue", OpportunityKind::IntraVenue { .. })
            | ("multi_outcome", OpportunityKind::MultiOutcome { .. })
            | ("value_mismatch", OpportunityKind::ValueMismatch { .. })
            | ("cross_venue", OpportunityKind::CrossVenue { .. })
    )
}

fn markets_by_token(snapshot: &Snapshot) -> HashMap<String, Market> {
    snapshot
        .markets
        .iter()
        .map(|m| (m.token_id.clone(), m.clone()))
        .collect()
}

/// Expand dirty tokens to their full market groups by condition/event id.
fn expand_groups(markets: &[Market], dirty_tokens: &HashSet<&str>) -> Vec<Market> {
    let dirty_groups: HashSet<String> = markets
        .iter()
        .filter(|m| dirty_tokens.contains(m.token_id.as_str()))
        .map(Market::group_key)
        .collect();
    markets
        .iter()
        .filter(|m| dirty_groups.contains(&m.group_key()))
        .cloned()
        .collect()
}

/// Accumulates dirty tokens between realtime flushes, bounded per drain.
#[derive(Debug, Default)]
pub struct DirtySet {
    tokens: HashSet<(Venue, String)>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, venue: Venue, token_id: String) {
        self.tokens.insert((venue, token_id));
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Remove and return up to `max_batch` entries.
    pub fn drain_batch(&mut self, max_batch: usize) -> Vec<(Venue, String)> {
        let batch: Vec<(Venue, String)> =
            self.tokens.iter().take(max_batch).cloned().collect();
        for entry in &batch {
            self.tokens.remove(entry);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Outcome;
    use rust_decimal::Decimal;

    fn market(token: &str, condition: &str, outcome: Outcome) -> Market {
        Market {
            venue: Venue::Predict,
            token_id: token.to_string(),
            question: format!("q-{condition}"),
            condition_id: Some(condition.to_string()),
            event_id: None,
            outcome,
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
    fn test_expand_groups_pulls_whole_condition() {
        let markets = vec![
            market("a-yes", "cond-a", Outcome::Yes),
            market("a-no", "cond-a", Outcome::No),
            market("b-yes", "cond-b", Outcome::Yes),
            market("b-no", "cond-b", Outcome::No),
        ];
        let dirty: HashSet<&str> = ["a-yes"].into_iter().collect();
        let expanded = expand_groups(&markets, &dirty);
        let tokens: HashSet<&str> = expanded.iter().map(|m| m.token_id.as_str()).collect();
        assert_eq!(tokens, ["a-yes", "a-no"].into_iter().collect());
    }

    #[test]
    fn test_expand_groups_unknown_token_is_empty() {
        let markets = vec![market("a-yes", "cond-a", Outcome::Yes)];
        let dirty: HashSet<&str> = ["zzz"].into_iter().collect();
        assert!(expand_groups(&markets, &dirty).is_empty());
    }

    #[test]
    fn test_dirty_set_drain_bounds_batch() {
        let mut set = DirtySet::new();
        for i in 0..10 {
            set.insert(Venue::Predict, format!("tok-{i}"));
        }
        // Duplicate insert does not grow the set.
        set.insert(Venue::Predict, "tok-0".to_string());
        assert_eq!(set.len(), 10);

        let batch = set.drain_batch(4);
        assert_eq!(batch.len(), 4);
        assert_eq!(set.len(), 6);

        let rest = set.drain_batch(100);
        assert_eq!(rest.len(), 6);
        assert!(set.is_empty());
    }

    #[test]
    fn test_detector_matches_kinds() {
        let intra = OpportunityKind::IntraVenue {
            market_id: "m".into(),
            yes_token: "y".into(),
            no_token: "n".into(),
            action: common::PairAction::BuyBoth,
            shares: Decimal::ONE,
            per_share_cost: Decimal::ONE,
        };
        assert!(detector_matches("intra_venue", &intra));
        assert!(!detector_matches("cross_venue", &intra));
    }
}
