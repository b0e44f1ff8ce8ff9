//! Metrics and snapshots for the arbitrage monitor.

use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use common::persist;

pub struct ScanMetrics {
    start_time: Instant,
    pub scans: u64,
    pub realtime_flushes: u64,
    pub markets_scanned: u64,
    pub books_fetched: u64,
    pub book_fetch_errors: u64,
    /// Opportunities per detector name.
    pub opportunities: HashMap<String, u64>,
    /// Alerts the webhook actually accepted.
    pub alerts_sent: u64,
    /// Attempts that consumed a throttle slot but did not deliver.
    pub alerts_failed: u64,
    pub executions: u64,
    pub execution_failures: u64,
    pub preflight_rejections: u64,
    pub last_scan_ms: u64,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            scans: 0,
            realtime_flushes: 0,
            markets_scanned: 0,
            books_fetched: 0,
            book_fetch_errors: 0,
            opportunities: HashMap::new(),
            alerts_sent: 0,
            alerts_failed: 0,
            executions: 0,
            execution_failures: 0,
            preflight_rejections: 0,
            last_scan_ms: 0,
        }
    }

    pub fn record_opportunities(&mut self, detector: &str, count: usize) {
        if count > 0 {
            *self.opportunities.entry(detector.to_string()).or_insert(0) += count as u64;
        }
    }

    pub fn total_opportunities(&self) -> u64 {
        self.opportunities.values().sum()
    }

    pub fn print_summary(&self) {
        let elapsed = self.start_time.elapsed();
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║              ARB MONITOR METRICS                           ║");
        info!("╠════════════════════════════════════════════════════════════╣");
        info!(
            "║  Uptime:            {:>8.1} minutes                       ║",
            elapsed.as_secs_f64() / 60.0
        );
        info!(
            "║  Scans / Realtime:  {:>4} / {:<6}                           ║",
            self.scans, self.realtime_flushes
        );
        info!(
            "║  Markets Scanned:   {:>8}                                 ║",
            self.markets_scanned
        );
        info!(
            "║  Books Fetched:     {:>8} ({} errors)                     ║",
            self.books_fetched, self.book_fetch_errors
        );
        info!(
            "║  Opportunities:     {:>8}                                 ║",
            self.total_opportunities()
        );
        info!(
            "║  Alerts Sent:       {:>8} ({} failed)                     ║",
            self.alerts_sent, self.alerts_failed
        );
        info!(
            "║  Executions:        {:>4} ({} failed)                        ║",
            self.executions, self.execution_failures
        );
        info!(
            "║  Preflight Drops:   {:>8}                                 ║",
            self.preflight_rejections
        );
        info!("╠════════════════════════════════════════════════════════════╣");
        for (detector, count) in &self.opportunities {
            info!(
                "║    {:<14}: {:>6}                                     ║",
                detector, count
            );
        }
        info!("╚════════════════════════════════════════════════════════════╝");
    }

    /// Write `cross-platform-metrics.json` and `cross-platform-state.json`.
    pub fn write_snapshots(&self, state_dir: &Path, tracked_keys: usize, breaker_open: bool) {
        let metrics = persist::snapshot_envelope(json!({
            "uptimeSecs": self.start_time.elapsed().as_secs(),
            "scans": self.scans,
            "realtimeFlushes": self.realtime_flushes,
            "marketsScanned": self.markets_scanned,
            "booksFetched": self.books_fetched,
            "bookFetchErrors": self.book_fetch_errors,
            "opportunities": self.opportunities,
            "alertsSent": self.alerts_sent,
            "alertsFailed": self.alerts_failed,
            "executions": self.executions,
            "executionFailures": self.execution_failures,
            "preflightRejections": self.preflight_rejections,
            "lastScanMs": self.last_scan_ms,
        }));
        if let Err(e) =
            persist::write_json_atomic(&state_dir.join("cross-platform-metrics.json"), &metrics)
        {
            warn!("failed to write metrics snapshot: {e}");
        }

        let state = persist::snapshot_envelope(json!({
            "trackedKeys": tracked_keys,
            "breakerOpen": breaker_open,
        }));
        if let Err(e) =
            persist::write_json_atomic(&state_dir.join("cross-platform-state.json"), &state)
        {
            warn!("failed to write state snapshot: {e}");
        }
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = ScanMetrics::new();
        metrics.scans = 3;
        metrics.record_opportunities("intra_venue", 2);
        metrics.record_opportunities("cross_venue", 0);
        metrics.alerts_sent = 4;
        metrics.alerts_failed = 1;
        metrics.write_snapshots(dir.path(), 5, false);

        let parsed: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("cross-platform-metrics.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["scans"], 3);
        assert_eq!(parsed["opportunities"]["intra_venue"], 2);
        assert!(parsed["opportunities"].get("cross_venue").is_none());
        // Failed deliveries are reported separately from accepted alerts.
        assert_eq!(parsed["alertsSent"], 4);
        assert_eq!(parsed["alertsFailed"], 1);

        let state: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("cross-platform-state.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(state["trackedKeys"], 5);
        assert_eq!(state["breakerOpen"], false);
    }
}
