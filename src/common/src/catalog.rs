//! Market catalog: TTL-cached discovery across venues.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{Market, Venue};
use crate::opinion::OpinionClient;
use crate::polymarket::PolymarketClient;
use crate::predict::{PredictClient, PredictError};

struct CachedList {
    fetched_at: Instant,
    markets: Arc<Vec<Market>>,
}

/// Cached list of active Predict markets, refreshed when older than the TTL.
pub struct MarketCatalog {
    client: Arc<PredictClient>,
    ttl: Duration,
    cache: Mutex<Option<CachedList>>,
}

impl MarketCatalog {
    pub fn new(client: Arc<PredictClient>, ttl_ms: u64) -> Self {
        Self {
            client,
            ttl: Duration::from_millis(ttl_ms),
            cache: Mutex::new(None),
        }
    }

    /// Current market list; hits the venue only when the cache has expired.
    /// A refresh failure falls back to the stale cache when one exists.
    pub async fn active_markets(&self) -> Result<Arc<Vec<Market>>, PredictError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.markets));
            }
        }

        match self.client.list_markets().await {
            Ok(markets) => {
                info!("market catalog refreshed: {} tokens", markets.len());
                let markets = Arc::new(markets);
                *cache = Some(CachedList {
                    fetched_at: Instant::now(),
                    markets: Arc::clone(&markets),
                });
                Ok(markets)
            }
            Err(e) => match cache.as_ref() {
                Some(stale) => {
                    warn!("market refresh failed ({e}), serving stale catalog");
                    Ok(Arc::clone(&stale.markets))
                }
                None => Err(e),
            },
        }
    }

    /// Drop the cache so the next read refetches.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

/// Normalized cross-venue market listings for the peer venues.
pub struct PeerCatalog {
    polymarket: Option<Arc<PolymarketClient>>,
    opinion: Option<Arc<OpinionClient>>,
}

impl PeerCatalog {
    pub fn new(
        polymarket: Option<Arc<PolymarketClient>>,
        opinion: Option<Arc<OpinionClient>>,
    ) -> Self {
        Self { polymarket, opinion }
    }

    pub fn venues(&self) -> Vec<Venue> {
        let mut venues = Vec::new();
        if self.polymarket.is_some() {
            venues.push(Venue::Polymarket);
        }
        if self.opinion.is_some() {
            venues.push(Venue::Opinion);
        }
        venues
    }

    /// Fetch the normalized market list for one peer venue. Failures are
    /// logged and yield an empty list so one venue cannot stall a scan.
    pub async fn list_markets(&self, venue: Venue) -> Vec<Market> {
        match venue {
            Venue::Polymarket => match &self.polymarket {
                Some(client) => match client.list_markets().await {
                    Ok(markets) => markets,
                    Err(e) => {
                        warn!("polymarket market listing failed: {e}");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            },
            Venue::Opinion => match &self.opinion {
                Some(client) => match client.list_markets().await {
                    Ok(markets) => markets,
                    Err(e) => {
                        warn!("opinion market listing failed: {e}");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            },
            Venue::Predict => {
                debug!("predict markets come from MarketCatalog, not PeerCatalog");
                Vec::new()
            }
        }
    }

    /// REST book fetch for a peer-venue token.
    pub async fn orderbook(&self, venue: Venue, token_id: &str) -> Option<crate::models::Orderbook> {
        match venue {
            Venue::Polymarket => match &self.polymarket {
                Some(client) => client.orderbook(token_id).await.ok(),
                None => None,
            },
            Venue::Opinion => match &self.opinion {
                Some(client) => client.orderbook(token_id).await.ok(),
                None => None,
            },
            Venue::Predict => None,
        }
    }
}
