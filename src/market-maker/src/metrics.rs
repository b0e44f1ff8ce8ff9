//! Metrics and snapshots for the market maker.

use serde_json::json;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use common::persist;

/// Counters for the maker session.
pub struct Metrics {
    start_time: Instant,
    pub passes: u64,
    pub quotes_placed: u64,
    pub quotes_cancelled: u64,
    pub reprices: u64,
    pub guard_trips: u64,
    pub fills_detected: u64,
    pub hedges: u64,
    pub submit_errors: u64,
    pub stale_books: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            passes: 0,
            quotes_placed: 0,
            quotes_cancelled: 0,
            reprices: 0,
            guard_trips: 0,
            fills_detected: 0,
            hedges: 0,
            submit_errors: 0,
            stale_books: 0,
        }
    }

    pub fn print_summary(&self, session_pnl: rust_decimal::Decimal, halted: bool) {
        let elapsed = self.start_time.elapsed();
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║              MARKET MAKER METRICS                          ║");
        info!("╠════════════════════════════════════════════════════════════╣");
        info!(
            "║  Uptime:            {:>8.1} minutes                       ║",
            elapsed.as_secs_f64() / 60.0
        );
        info!(
            "║  Passes:            {:>8}                                 ║",
            self.passes
        );
        info!(
            "║  Quotes Placed:     {:>8}                                 ║",
            self.quotes_placed
        );
        info!(
            "║  Quotes Cancelled:  {:>8}                                 ║",
            self.quotes_cancelled
        );
        info!(
            "║  Reprices:          {:>8}                                 ║",
            self.reprices
        );
        info!(
            "║  Guard Trips:       {:>8}                                 ║",
            self.guard_trips
        );
        info!(
            "║  Fills / Hedges:    {:>4} / {:<4}                             ║",
            self.fills_detected, self.hedges
        );
        info!(
            "║  Submit Errors:     {:>8}                                 ║",
            self.submit_errors
        );
        info!(
            "║  Session P&L:       {:>8.2}                               ║",
            session_pnl
        );
        info!(
            "║  Halted:            {:>8}                                 ║",
            halted
        );
        info!("╚════════════════════════════════════════════════════════════╝");
    }

    /// Write `mm-metrics.json` with the versioned snapshot envelope.
    pub fn write_snapshot(
        &self,
        path: &Path,
        session_pnl: rust_decimal::Decimal,
        halted: bool,
    ) {
        let body = persist::snapshot_envelope(json!({
            "uptimeSecs": self.start_time.elapsed().as_secs(),
            "passes": self.passes,
            "quotesPlaced": self.quotes_placed,
            "quotesCancelled": self.quotes_cancelled,
            "reprices": self.reprices,
            "guardTrips": self.guard_trips,
            "fillsDetected": self.fills_detected,
            "hedges": self.hedges,
            "submitErrors": self.submit_errors,
            "staleBooks": self.stale_books,
            "sessionPnl": session_pnl.to_string(),
            "halted": halted,
        }));
        if let Err(e) = persist::write_json_atomic(path, &body) {
            warn!("failed to write {}: {e}", path.display());
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mm-metrics.json");
        let mut metrics = Metrics::new();
        metrics.passes = 7;
        metrics.quotes_placed = 3;
        metrics.write_snapshot(&path, dec!(-12.5), false);

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["passes"], 7);
        assert_eq!(parsed["sessionPnl"], "-12.5");
    }
}
