//! Market Maker - adaptive two-sided quoting on Predict markets.
//!
//! Per token: micro-price anchored quotes with inventory and imbalance
//! skew, volatility-profiled spread and size, risk guards that pull quotes,
//! and optional hedging when fills are detected through position deltas.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    fair_value, BookStore, CommandSigner, Config, DryRunSubmitter, ExecutionPolicy, Executor,
    MappingTable, Market, MarketCatalog, OpinionClient, Orderbook, OrderSide, OrderSubmitter,
    Outcome, PeerCatalog, PolymarketClient, Position, PredictClient, PredictSubmitter,
    PredictWsFeed, SubscribeSpec, Venue,
};

mod hedge;
mod metrics;
mod quoter;
mod state;

use hedge::FillCheck;
use metrics::Metrics;
use quoter::{compute_quotes, iceberg_display_size, quote_size, QuoteInputs};
use state::{GuardTrip, MakerPhase, OpenQuote, SessionState, TokenState};

/// Market Maker - quotes both sides of Predict binary markets
#[derive(Parser, Debug)]
#[command(name = "market-maker")]
#[command(about = "Adaptive two-sided market maker for Predict")]
struct Args {
    /// Token IDs to quote (comma-separated). Empty discovers from the catalog.
    #[arg(long, default_value = "")]
    tokens: String,

    /// Maximum tokens to quote when discovering from the catalog
    #[arg(long, default_value = "5")]
    max_tokens: usize,

    /// Quoting pass interval in milliseconds
    #[arg(long, default_value = "1000")]
    pass_interval_ms: u64,

    /// Route all orders through the dry-run submitter
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("configuration")?;

    info!("=== Market Maker ===");
    info!("Spread: {} [{}, {}]", config.maker.spread, config.maker.min_spread, config.maker.max_spread);
    info!("Order size: ${} (max position ${})", config.maker.order_size, config.maker.max_position);
    info!("Hedge: {:?} (trigger {} shares)", config.hedge.mode, config.hedge.trigger_shares);
    info!("Dry run: {}", args.dry_run || !config.enable_trading);

    let predict = Arc::new(PredictClient::new(&config.predict, config.default_timeout_ms));
    let catalog = MarketCatalog::new(Arc::clone(&predict), config.arb.markets_cache_ms);
    let store = BookStore::new();

    // Live submission requires the injected signing capability.
    let live = config.enable_trading && !args.dry_run;
    let dry_run_submitter = Arc::new(DryRunSubmitter::new());
    let submitter: Arc<dyn OrderSubmitter> = if live {
        let signer_cmd = config
            .predict
            .signer_cmd
            .clone()
            .context("ENABLE_TRADING=true requires PREDICT_SIGNER_CMD")?;
        let maker_addr = config
            .predict
            .account_address
            .clone()
            .context("ENABLE_TRADING=true requires PREDICT_ACCOUNT_ADDRESS")?;
        Arc::new(PredictSubmitter::new(
            Arc::clone(&predict),
            Arc::new(CommandSigner::new(
                signer_cmd,
                maker_addr,
                config.predict.private_key.clone(),
            )),
        ))
    } else {
        dry_run_submitter.clone()
    };

    let executor = Executor::new(
        ExecutionPolicy {
            require_confirmation: false,
            auto_confirm: true,
            max_position_size: config.maker.max_single_order_value,
            sequential_cross_legs: true,
            hedge_on_failure: false,
        },
        Arc::clone(&submitter),
    );

    let mapping = MappingTable::load(&config.cross_venue.mapping_file).unwrap_or_else(|e| {
        warn!("mapping file unusable ({e}), continuing without it");
        MappingTable::empty(&config.cross_venue.mapping_file)
    });
    let peers = PeerCatalog::new(
        Some(Arc::new(PolymarketClient::new(
            &config.polymarket,
            config.default_timeout_ms,
        ))),
        config
            .opinion
            .api_key
            .is_some()
            .then(|| Arc::new(OpinionClient::new(&config.opinion, config.default_timeout_ms))),
    );

    // Resolve the quoting set.
    let markets = resolve_markets(&args, &catalog).await?;
    if markets.is_empty() {
        bail!("no quotable markets resolved");
    }
    info!("Quoting {} tokens", markets.len());

    // Start the WS feed and mirror it into the book store.
    let mut feed_handle = None;
    if config.predict_ws.enabled {
        let feed = PredictWsFeed::new(
            config.predict_ws.clone(),
            config.ws_reconnect_min_ms,
            config.ws_reconnect_max_ms,
        );
        store.attach_feed(feed.core());
        feed.subscribe(
            markets
                .iter()
                .map(|m| SubscribeSpec::for_market(m, config.predict_ws.topic_key))
                .collect(),
        );
        feed_handle = Some((feed.clone(), feed.spawn()));
    }

    // Peer market lists for cross-venue hedging, fetched once at startup.
    let mut peer_markets: HashMap<Venue, Vec<Market>> = HashMap::new();
    if config.hedge.mode == common::HedgeMode::Cross {
        for venue in peers.venues() {
            peer_markets.insert(venue, peers.list_markets(venue).await);
        }
    }

    let mut states: HashMap<String, TokenState> = markets
        .iter()
        .map(|m| (m.token_id.clone(), TokenState::new(&m.token_id)))
        .collect();
    let mut session = SessionState::new();
    let mut metrics = Metrics::new();
    let metrics_path = PathBuf::from(&config.state_dir).join("mm-metrics.json");

    let mut pass_interval = tokio::time::interval(Duration::from_millis(args.pass_interval_ms));
    pass_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting...");
                break;
            }
            _ = heartbeat.tick() => {
                metrics.print_summary(session.session_pnl(), session.halted());
                metrics.write_snapshot(&metrics_path, session.session_pnl(), session.halted());
            }
            _ = pass_interval.tick() => {
                run_pass(
                    &config,
                    &markets,
                    &predict,
                    &store,
                    &submitter,
                    &executor,
                    &mapping,
                    &peers,
                    &peer_markets,
                    &mut states,
                    &mut session,
                    &mut metrics,
                ).await;
            }
        }
    }

    // Drain: pull every resting quote before exiting.
    let open: Vec<String> = states
        .values()
        .flat_map(|s| s.open_orders.iter().map(|o| o.hash.clone()))
        .collect();
    if !open.is_empty() {
        info!("[SHUTDOWN] cancelling {} open orders", open.len());
        if let Err(e) = submitter.cancel(&open).await {
            warn!("[SHUTDOWN] cancel failed: {e}");
        }
    }
    if let Some((_, handle)) = feed_handle.take() {
        handle.abort();
    }
    metrics.print_summary(session.session_pnl(), session.halted());
    metrics.write_snapshot(&metrics_path, session.session_pnl(), session.halted());
    info!("Shutdown complete");
    Ok(())
}

/// Pick the quoting set from the CLI flag or the market catalog.
async fn resolve_markets(args: &Args, catalog: &MarketCatalog) -> Result<Vec<Market>> {
    let all = catalog.active_markets().await.context("market discovery")?;
    let requested: Vec<String> = args
        .tokens
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();

    let markets: Vec<Market> = if requested.is_empty() {
        all.iter()
            .filter(|m| m.outcome != Outcome::Unknown)
            .take(args.max_tokens)
            .cloned()
            .collect()
    } else {
        requested
            .iter()
            .filter_map(|token| {
                let hit = all.iter().find(|m| &m.token_id == token).cloned();
                if hit.is_none() {
                    warn!("token {token} not in the active catalog, skipping");
                }
                hit
            })
            .collect()
    };
    Ok(markets)
}

/// One sequential pass over every quoted token.
#[allow(clippy::too_many_arguments)]
async fn run_pass(
    config: &Config,
    markets: &[Market],
    predict: &Arc<PredictClient>,
    store: &Arc<BookStore>,
    submitter: &Arc<dyn OrderSubmitter>,
    executor: &Executor,
    mapping: &MappingTable,
    peers: &PeerCatalog,
    peer_markets: &HashMap<Venue, Vec<Market>>,
    states: &mut HashMap<String, TokenState>,
    session: &mut SessionState,
    metrics: &mut Metrics,
) {
    metrics.passes += 1;

    // Venue-truth positions drive fill detection and the P&L halt.
    let positions: HashMap<String, Position> = match predict.positions().await {
        Ok(list) => list.into_iter().map(|p| (p.token_id.clone(), p)).collect(),
        Err(e) => {
            debug!("positions refresh failed: {e}");
            HashMap::new()
        }
    };
    let total_pnl: Decimal = positions.values().map(|p| p.pnl).sum();
    session.update(total_pnl, config.maker.max_daily_loss);

    if session.halted() {
        // Invariant: once the loss cap trips, nothing is ever submitted again.
        cancel_everything(states, submitter, metrics).await;
        return;
    }

    for market in markets {
        let state = states
            .entry(market.token_id.clone())
            .or_insert_with(|| TokenState::new(&market.token_id));
        let now = Instant::now();

        // Fresh book: WS cache first, REST fallback written back to the store.
        let book = match fresh_book(config, predict, store, &market.token_id).await {
            Some(b) => b,
            None => {
                metrics.stale_books += 1;
                continue;
            }
        };

        let rel_move = state.observe(&book, &config.tuning, now);

        // Fill detection against venue positions.
        let net = positions
            .get(&market.token_id)
            .map(Position::net_shares)
            .unwrap_or(state.last_net_shares);
        if net != state.last_net_shares {
            state.phase = MakerPhase::Hedging;
            let (check, _) = hedge::check_and_hedge(
                executor,
                market,
                &book,
                state.last_net_shares,
                net,
                &config.hedge,
                mapping,
                peers,
                peer_markets,
                config.cross_venue.min_similarity,
            )
            .await;
            state.last_net_shares = net;
            match check {
                FillCheck::Hedged => {
                    metrics.fills_detected += 1;
                    metrics.hedges += 1;
                    state.fill_risk_bump = true;
                }
                FillCheck::Unhedged => {
                    metrics.fills_detected += 1;
                    state.fill_risk_bump = true;
                }
                _ => {}
            }
            state.phase = MakerPhase::Idle;
        }

        // Guards: fail fast, cancel all, gate.
        if let Some(trip) = state.guard_trip(&book, rel_move, &config.maker, &config.tuning, now) {
            metrics.guard_trips += 1;
            debug!("[GUARD] {} tripped {:?}", market.token_id, trip);
            let hashes: Vec<String> = state.open_orders.iter().map(|o| o.hash.clone()).collect();
            if !hashes.is_empty() {
                if let Err(e) = submitter.cancel(&hashes).await {
                    warn!("[GUARD] cancel failed for {}: {e}", market.token_id);
                    metrics.submit_errors += 1;
                }
                metrics.quotes_cancelled += hashes.len() as u64;
                state.remove_orders(&hashes);
            }
            match trip {
                GuardTrip::VolatilitySpike => state.start_pause(&config.maker, now),
                _ => state.start_cooldown(&config.maker, now),
            }
            continue;
        }

        if !state.gates_open(now) {
            continue;
        }

        // Optional value signal for the fair blend.
        let value = config
            .maker
            .use_value_signal
            .then(|| fair_value::estimate(market, &book))
            .flatten();

        let quotes = match compute_quotes(&QuoteInputs {
            book: &book,
            net_shares: net,
            maker: &config.maker,
            tuning: &config.tuning,
            profile: state.profile,
            value: value.as_ref(),
            fill_risk_bump: state.fill_risk_bump,
        }) {
            Some(q) => q,
            None => continue,
        };
        state.fill_risk_bump = false;

        // Per-order risk pass.
        let actions = state.order_actions(
            &book,
            quotes.bid,
            quotes.ask,
            &config.maker,
            &config.tuning,
            now,
        );
        if !actions.is_empty() {
            let hashes: Vec<String> = actions.iter().map(|(h, _)| h.clone()).collect();
            if let Err(e) = submitter.cancel(&hashes).await {
                warn!("cancel failed for {}: {e}", market.token_id);
                metrics.submit_errors += 1;
            }
            metrics.quotes_cancelled += hashes.len() as u64;
            state.remove_orders(&hashes);
            for (_, risk) in &actions {
                match risk {
                    state::OrderRisk::Reprice => metrics.reprices += 1,
                    state::OrderRisk::AntiFill => {
                        state.start_pause(&config.maker, now);
                    }
                    _ => {}
                }
            }
            if matches!(state.phase, MakerPhase::Paused) {
                continue;
            }
        }

        if !state.order_interval_open(&config.maker, now) {
            continue;
        }

        // Iceberg quotes re-post on their own clock even when resting.
        if config.tuning.iceberg_enabled {
            let due = state
                .last_iceberg_repost_at
                .map(|at| now.duration_since(at).as_millis() as u64 >= config.tuning.iceberg_requote_ms)
                .unwrap_or(true);
            if !due {
                continue;
            }
        }

        // Submit whichever sides are missing.
        state.phase = MakerPhase::Quoting;
        let position_value = positions
            .get(&market.token_id)
            .map(Position::exposure_value)
            .unwrap_or(Decimal::ZERO);
        for (side, price) in [(OrderSide::Buy, quotes.bid), (OrderSide::Sell, quotes.ask)] {
            if state.open_on_side(side) >= config.maker.max_orders_per_market {
                continue;
            }
            let opposite_touch = match side {
                OrderSide::Buy => book.best_ask().map(|l| l.price),
                OrderSide::Sell => book.best_bid().map(|l| l.price),
            };
            if opposite_touch
                .map(|t| quoter::too_close_to_opposite(price, t, config.tuning.touch_buffer_bps))
                .unwrap_or(true)
            {
                continue;
            }
            let top_depth = match side {
                OrderSide::Buy => book.best_bid().map(|l| l.shares).unwrap_or(Decimal::ZERO),
                OrderSide::Sell => book.best_ask().map(|l| l.shares).unwrap_or(Decimal::ZERO),
            };
            let full_shares = quote_size(
                price,
                top_depth,
                position_value,
                market.activation.as_ref(),
                &config.maker,
                &config.tuning,
                state.profile,
            );
            if full_shares <= Decimal::ZERO {
                continue;
            }
            let shares = if config.tuning.iceberg_enabled {
                iceberg_display_size(full_shares, &config.tuning)
            } else {
                full_shares
            };

            match submitter.submit_limit(market, side, price, shares).await {
                Ok(handle) => {
                    metrics.quotes_placed += 1;
                    state.last_order_at = Some(now);
                    if config.tuning.iceberg_enabled {
                        state.last_iceberg_repost_at = Some(now);
                    }
                    state.open_orders.push(OpenQuote {
                        hash: handle.hash,
                        side,
                        price,
                        shares,
                        placed_at: now,
                    });
                }
                Err(e) => {
                    error!("[QUOTE] submit failed for {}: {e}", market.token_id);
                    metrics.submit_errors += 1;
                }
            }
        }
        state.phase = MakerPhase::Idle;
    }
}

/// WS cache first, REST fallback written back through the store.
async fn fresh_book(
    config: &Config,
    predict: &Arc<PredictClient>,
    store: &Arc<BookStore>,
    token_id: &str,
) -> Option<Orderbook> {
    if let Some(book) = store.snapshot(Venue::Predict, token_id, config.arb.ws_max_age_ms) {
        return Some(book);
    }
    match predict.orderbook(token_id).await {
        Ok(book) => {
            store.put(Venue::Predict, book.clone());
            Some(book)
        }
        Err(e) => {
            debug!("book fetch failed for {token_id}: {e}");
            None
        }
    }
}

async fn cancel_everything(
    states: &mut HashMap<String, TokenState>,
    submitter: &Arc<dyn OrderSubmitter>,
    metrics: &mut Metrics,
) {
    let open: Vec<String> = states
        .values()
        .flat_map(|s| s.open_orders.iter().map(|o| o.hash.clone()))
        .collect();
    if open.is_empty() {
        return;
    }
    warn!("[HALT] session loss cap hit, cancelling {} orders", open.len());
    if let Err(e) = submitter.cancel(&open).await {
        warn!("[HALT] cancel failed: {e}");
        metrics.submit_errors += 1;
    }
    metrics.quotes_cancelled += open.len() as u64;
    for state in states.values_mut() {
        state.open_orders.clear();
    }
}
