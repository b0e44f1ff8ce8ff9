//! Arb Monitor - scans Predict and peer venues for arbitrage.
//!
//! Runs a single scan and exits, or loops continuously with the periodic
//! scanner plus WS-triggered realtime rescans when auto-execution is on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    AlertSink, BookStore, CommandSigner, Config, DryRunSubmitter, ExecutionPolicy, Executor,
    FeedCore, MappingTable, MarketCatalog, OpinionClient, OpinionWsFeed, OrderSubmitter,
    PeerCatalog, PolymarketClient, PolymarketWsFeed, PredictClient, PredictSubmitter,
    PredictWsFeed, SubscribeSpec, UnavailableCrossVenue, Venue,
};

mod detectors;
mod metrics;
mod scanner;
mod stability;

use scanner::{DirtySet, Scanner};
use stability::{GateConfig, OpportunityGate};

/// Arb Monitor - arbitrage scanner and executor
#[derive(Parser, Debug)]
#[command(name = "arb-monitor")]
#[command(about = "Scans prediction markets for arbitrage opportunities")]
struct Args {
    /// Force a single scan even when auto-execution is configured
    #[arg(long)]
    once: bool,

    /// Run continuously even without auto-execution
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Exit codes: 0 graceful, 1 fatal init.
    match run(Args::parse()).await {
        Ok(()) => {}
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env().context("configuration")?;

    info!("=== Arb Monitor ===");
    info!("Scan interval: {}ms, max markets {}", config.arb.scan_interval_ms, config.arb.max_markets);
    info!("Auto-execute: {} (value: {})", config.arb.auto_execute, config.arb.auto_execute_value);
    info!("Cross-venue: {}", config.cross_venue.enabled);
    info!("Dependency solver: {}", config.dependency.enabled());

    let predict = Arc::new(PredictClient::new(&config.predict, config.default_timeout_ms));
    let catalog = Arc::new(MarketCatalog::new(
        Arc::clone(&predict),
        config.arb.markets_cache_ms,
    ));
    let store = BookStore::new();
    let mapping = Arc::new(
        MappingTable::load(&config.cross_venue.mapping_file).unwrap_or_else(|e| {
            warn!("mapping file unusable ({e}), continuing without it");
            MappingTable::empty(&config.cross_venue.mapping_file)
        }),
    );

    let polymarket = Arc::new(PolymarketClient::new(
        &config.polymarket,
        config.default_timeout_ms,
    ));
    let opinion = config
        .opinion
        .api_key
        .is_some()
        .then(|| Arc::new(OpinionClient::new(&config.opinion, config.default_timeout_ms)));
    let peers = Arc::new(PeerCatalog::new(Some(polymarket), opinion));

    // WS feeds, mirrored into the merged store.
    let mut feeds: Vec<Arc<FeedCore>> = Vec::new();
    let mut feed_handles = Vec::new();
    let predict_feed = if config.predict_ws.enabled {
        let feed = PredictWsFeed::new(
            config.predict_ws.clone(),
            config.ws_reconnect_min_ms,
            config.ws_reconnect_max_ms,
        );
        store.attach_feed(feed.core());
        feeds.push(Arc::clone(feed.core()));
        feed_handles.push(feed.spawn());
        Some(feed)
    } else {
        None
    };
    let polymarket_feed = if config.cross_venue.enabled && config.polymarket.ws_enabled {
        let feed = PolymarketWsFeed::new(
            config.polymarket.clone(),
            config.ws_reconnect_min_ms,
            config.ws_reconnect_max_ms,
        );
        store.attach_feed(feed.core());
        feeds.push(Arc::clone(feed.core()));
        feed_handles.push(feed.spawn());
        Some(feed)
    } else {
        None
    };
    let opinion_feed = if config.cross_venue.enabled
        && config.opinion.ws_enabled
        && config.opinion.api_key.is_some()
    {
        let feed = OpinionWsFeed::new(
            config.opinion.clone(),
            config.ws_reconnect_min_ms,
            config.ws_reconnect_max_ms,
        );
        store.attach_feed(feed.core());
        feeds.push(Arc::clone(feed.core()));
        feed_handles.push(feed.spawn());
        Some(feed)
    } else {
        None
    };

    // Executor wiring. Live submission needs the signing capability; with
    // trading disabled everything routes to the dry-run submitter.
    let submitter: Arc<dyn OrderSubmitter> = if config.enable_trading {
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
        Arc::new(DryRunSubmitter::new())
    };
    let executor = Executor::new(
        ExecutionPolicy {
            require_confirmation: config.cross_venue.require_confirm,
            auto_confirm: config.auto_confirm_all,
            max_position_size: config.maker.max_single_order_value,
            sequential_cross_legs: true,
            hedge_on_failure: true,
        },
        submitter,
    )
    .with_cross_venue(Arc::new(UnavailableCrossVenue::new(Venue::Polymarket)))
    .with_cross_venue(Arc::new(UnavailableCrossVenue::new(Venue::Opinion)));

    let gate = OpportunityGate::new(GateConfig {
        alert_min_interval: Duration::from_millis(config.alert.min_interval_ms),
        execution_cooldown: Duration::from_millis(config.arb.execution_cooldown_ms),
        stability_min_count: config.arb.stability_min_count,
        stability_window: Duration::from_millis(config.arb.stability_window_ms),
        max_errors: config.arb.max_errors,
        error_window: Duration::from_millis(config.arb.error_window_ms),
        pause_on_error: Duration::from_millis(config.arb.pause_on_error_ms),
    });
    let alerts = AlertSink::new(&config.alert, config.default_timeout_ms);

    let state_dir = PathBuf::from(&config.state_dir);
    let continuous = (config.arb.auto_execute || args.watch) && !args.once;
    let realtime = continuous && config.arb.ws_realtime;
    let mut scanner = Scanner::new(
        config.clone(),
        Arc::clone(&predict),
        Arc::clone(&catalog),
        Arc::clone(&peers),
        Arc::clone(&store),
        feeds,
        Arc::clone(&mapping),
        gate,
        alerts,
        Some(executor),
    );

    // Subscribe feeds to the scan universe and wire change events into the
    // dirty sets.
    let mut changes = store.subscribe(1024);
    if let Ok(markets) = catalog.active_markets().await {
        if let Some(feed) = &predict_feed {
            feed.subscribe(
                markets
                    .iter()
                    .take(config.arb.max_markets)
                    .map(|m| SubscribeSpec::for_market(m, config.predict_ws.topic_key))
                    .collect(),
            );
        }
    }
    if config.cross_venue.enabled {
        for venue in peers.venues() {
            let tokens: Vec<String> = peers
                .list_markets(venue)
                .await
                .iter()
                .map(|m| m.token_id.clone())
                .collect();
            match venue {
                Venue::Polymarket => {
                    if let Some(feed) = &polymarket_feed {
                        feed.subscribe(tokens);
                    }
                }
                Venue::Opinion => {
                    if let Some(feed) = &opinion_feed {
                        feed.subscribe(tokens);
                    }
                }
                Venue::Predict => {}
            }
        }
    }

    if !continuous {
        let found = scanner.scan_once().await?;
        info!("single scan complete: {found} opportunities");
        scanner.metrics.print_summary();
        scanner
            .metrics
            .write_snapshots(&state_dir, scanner.gate().tracked_keys(), false);
        return Ok(());
    }

    // Continuous mode: periodic scan + realtime flush + heartbeat.
    let mut predict_dirty = DirtySet::new();
    let mut cross_dirty = DirtySet::new();
    let mut change_channel_open = true;
    let mut scan_interval =
        tokio::time::interval(Duration::from_millis(config.arb.scan_interval_ms));
    scan_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut realtime_interval =
        tokio::time::interval(Duration::from_millis(config.arb.ws_realtime_interval_ms.max(50)));
    realtime_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting...");
                break;
            }
            _ = scan_interval.tick() => {
                if let Err(e) = scanner.scan_once().await {
                    warn!("[SCAN] failed: {e:#}");
                }
            }
            _ = realtime_interval.tick(), if realtime => {
                let batch = predict_dirty.drain_batch(config.arb.ws_realtime_max_batch);
                if !batch.is_empty() {
                    if let Err(e) = scanner.realtime_flush(batch).await {
                        warn!("[REALTIME] flush failed: {e:#}");
                    }
                }
                // The cross-venue dirty set drains on its own cadence so a
                // busy Predict feed cannot starve peer rescans.
                let cross_batch = cross_dirty.drain_batch(config.arb.ws_realtime_max_batch);
                if !cross_batch.is_empty() {
                    if let Err(e) = scanner.realtime_flush(cross_batch).await {
                        warn!("[REALTIME] cross flush failed: {e:#}");
                    }
                }
            }
            change = changes.recv(), if change_channel_open => {
                match change {
                    Some(change) => {
                        if change.venue == Venue::Predict {
                            predict_dirty.insert(change.venue, change.token_id);
                        } else {
                            cross_dirty.insert(change.venue, change.token_id);
                        }
                    }
                    None => {
                        warn!("book change channel closed");
                        change_channel_open = false;
                    }
                }
            }
            _ = heartbeat.tick() => {
                scanner.metrics.print_summary();
                let breaker = scanner.breaker_open();
                scanner.metrics.write_snapshots(&state_dir, scanner.gate().tracked_keys(), breaker);
            }
        }
    }

    for handle in feed_handles {
        handle.abort();
    }
    scanner.metrics.print_summary();
    let breaker = scanner.breaker_open();
    scanner
        .metrics
        .write_snapshots(&state_dir, scanner.gate().tracked_keys(), breaker);
    info!("Shutdown complete");
    Ok(())
}
