//! Fill detection and hedge dispatch.
//!
//! The maker does not see fills directly; it compares the venue-reported
//! net position against the last observed value and hedges when the jump
//! clears the trigger.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

use common::{
    Executor, HedgeConfig, MappingTable, Market, Orderbook, PeerCatalog, Venue,
};

/// Outcome of one fill check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillCheck {
    /// No change worth acting on.
    Quiet,
    /// Net moved but below the hedge trigger.
    SmallFill,
    /// Net moved past the trigger and a hedge was dispatched.
    Hedged,
    /// Net moved past the trigger but hedging is disabled.
    Unhedged,
}

/// Compare net exposure to the last pass and hedge when the change clears
/// `hedge.trigger_shares`. Returns what happened plus the observed delta.
#[allow(clippy::too_many_arguments)]
pub async fn check_and_hedge(
    executor: &Executor,
    market: &Market,
    book: &Orderbook,
    last_net: Decimal,
    current_net: Decimal,
    hedge: &HedgeConfig,
    mapping: &MappingTable,
    peers: &PeerCatalog,
    peer_markets: &HashMap<Venue, Vec<Market>>,
    min_similarity: f64,
) -> (FillCheck, Decimal) {
    let delta = current_net - last_net;
    if delta == Decimal::ZERO {
        return (FillCheck::Quiet, delta);
    }
    if delta.abs() < hedge.trigger_shares {
        return (FillCheck::SmallFill, delta);
    }
    if !hedge.hedge_on_fill {
        info!(
            "[FILL] {} net moved {:+} (hedging disabled)",
            market.token_id, delta
        );
        return (FillCheck::Unhedged, delta);
    }

    info!(
        "[FILL] {} net moved {:+}, dispatching {:?} hedge",
        market.token_id, delta, hedge.mode
    );
    match executor
        .hedge_on_fill(
            market,
            book,
            delta,
            hedge,
            mapping,
            peers,
            peer_markets,
            min_similarity,
        )
        .await
    {
        Ok(Some(handle)) => {
            info!("[HEDGE] placed {}", handle.hash);
            (FillCheck::Hedged, delta)
        }
        Ok(None) => (FillCheck::Unhedged, delta),
        Err(e) => {
            warn!("[HEDGE] failed for {}: {e}", market.token_id);
            (FillCheck::Unhedged, delta)
        }
    }
}
