//! Health Check - verifies Predict REST reachability with the current
//! configuration.
//!
//! Probes market discovery and one orderbook fetch. Exit codes: 0 when
//! everything is reachable, 2 on authentication failures, 1 on network or
//! other errors.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, PredictClient, PredictError};

/// Health Check - probes Predict REST endpoints
#[derive(Parser, Debug)]
#[command(name = "health-check")]
#[command(about = "Probes Predict REST reachability")]
struct Args {
    /// Probe this token's orderbook instead of the first discovered market
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let client = Arc::new(PredictClient::new(&config.predict, config.default_timeout_ms));

    info!("probing {} ...", config.predict.api_base_url);
    let markets = match client.list_markets().await {
        Ok(markets) => {
            info!("market discovery OK: {} tokens", markets.len());
            markets
        }
        Err(e) => return failure("market discovery", e),
    };

    let token = args
        .token
        .or_else(|| markets.first().map(|m| m.token_id.clone()));
    let Some(token) = token else {
        info!("no markets available to probe an orderbook; discovery is healthy");
        return ExitCode::SUCCESS;
    };

    match client.orderbook(&token).await {
        Ok(book) => {
            info!(
                "orderbook OK: {} ({} bids / {} asks)",
                token,
                book.bids.len(),
                book.asks.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => failure("orderbook fetch", e),
    }
}

fn failure(stage: &str, error: PredictError) -> ExitCode {
    error!("{stage} failed: {error}");
    match error {
        PredictError::Auth => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}
