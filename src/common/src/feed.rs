//! Shared WebSocket feed state.
//!
//! Each venue feed owns one socket task and pushes decoded books into a
//! `FeedCore`: a per-token cache with non-regressing timestamps, a
//! subscription set, health counters, and change-handler fan-out. The
//! venue-specific clients only implement the wire protocol.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::{Orderbook, Venue};

/// Callback invoked after a cached book mutates.
pub type BookHandler = Arc<dyn Fn(Venue, &Orderbook) + Send + Sync>;

/// Maximum accepted age of an inbound book at receipt. Older snapshots are
/// buffered leftovers from the subscription phase; a negative age means the
/// sender's clock is ahead of ours. Both are discarded.
const MAX_INGEST_AGE_MS: i64 = 5_000;

/// Feed health snapshot.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub connected: bool,
    pub subscribed: usize,
    pub cache_size: usize,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
}

impl FeedStatus {
    /// Healthy means connected with a recent inbound message.
    pub fn is_healthy(&self, max_age_ms: i64, now: DateTime<Utc>) -> bool {
        if !self.connected {
            return false;
        }
        match self.last_message_at {
            Some(at) => (now - at).num_milliseconds() <= max_age_ms,
            None => false,
        }
    }
}

/// Shared state behind one venue feed.
pub struct FeedCore {
    venue: Venue,
    books: RwLock<HashMap<String, Orderbook>>,
    subscriptions: RwLock<HashSet<String>>,
    handlers: RwLock<Vec<BookHandler>>,
    connected: AtomicBool,
    message_count: AtomicU64,
    /// Epoch millis of the last inbound message; 0 = never.
    last_message_ms: AtomicI64,
}

impl FeedCore {
    pub fn new(venue: Venue) -> Arc<Self> {
        Arc::new(Self {
            venue,
            books: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashSet::new()),
            handlers: RwLock::new(Vec::new()),
            connected: AtomicBool::new(false),
            message_count: AtomicU64::new(0),
            last_message_ms: AtomicI64::new(0),
        })
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    /// Add tokens to the subscription set; returns only the new ones, so
    /// subscribing twice is the same as subscribing once.
    pub fn add_subscriptions(&self, token_ids: &[String]) -> Vec<String> {
        let mut subs = self.subscriptions.write();
        token_ids
            .iter()
            .filter(|t| subs.insert((*t).clone()))
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, token_id: &str) -> bool {
        self.subscriptions.read().contains(token_id)
    }

    /// Store a full snapshot. Rejected when it fails validation, is stale
    /// or future-stamped at receipt, or would regress the cached timestamp.
    /// Handlers fire on acceptance.
    pub fn store_book(&self, book: Orderbook) -> bool {
        if book.validate().is_err() {
            debug!("{}: rejected invalid book for {}", self.venue, book.token_id);
            return false;
        }
        let age_ms = book.age_ms(Utc::now());
        if age_ms < 0 || age_ms > MAX_INGEST_AGE_MS {
            debug!(
                "{}: discarded book for {} with ingest age {}ms",
                self.venue, book.token_id, age_ms
            );
            return false;
        }
        {
            let mut books = self.books.write();
            if let Some(existing) = books.get(&book.token_id) {
                if existing.updated_at > book.updated_at {
                    return false;
                }
            }
            books.insert(book.token_id.clone(), book.clone());
        }
        self.notify(&book);
        true
    }

    /// Mutate a cached book in place (delta merge). The closure runs under
    /// the write lock; the timestamp advances to `now`. No-op for tokens
    /// without a cached snapshot.
    pub fn apply_delta<F>(&self, token_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Orderbook),
    {
        let updated = {
            let mut books = self.books.write();
            match books.get_mut(token_id) {
                Some(book) => {
                    mutate(book);
                    book.bids.retain(|l| l.shares > rust_decimal::Decimal::ZERO);
                    book.asks.retain(|l| l.shares > rust_decimal::Decimal::ZERO);
                    book.bids.sort_by(|a, b| b.price.cmp(&a.price));
                    book.asks.sort_by(|a, b| a.price.cmp(&b.price));
                    book.updated_at = Utc::now();
                    if book.validate().is_err() {
                        books.remove(token_id);
                        None
                    } else {
                        Some(book.clone())
                    }
                }
                None => None,
            }
        };
        match updated {
            Some(book) => {
                self.notify(&book);
                true
            }
            None => false,
        }
    }

    fn notify(&self, book: &Orderbook) {
        for handler in self.handlers.read().iter() {
            handler(self.venue, book);
        }
    }

    /// Cached book if fresh enough, else absent.
    pub fn snapshot(&self, token_id: &str, max_age_ms: i64) -> Option<Orderbook> {
        let books = self.books.read();
        let book = books.get(token_id)?;
        if !book.is_fresh(max_age_ms, Utc::now()) {
            return None;
        }
        Some(book.clone())
    }

    pub fn status(&self) -> FeedStatus {
        let last_ms = self.last_message_ms.load(Ordering::Relaxed);
        FeedStatus {
            connected: self.connected.load(Ordering::Relaxed),
            subscribed: self.subscriptions.read().len(),
            cache_size: self.books.read().len(),
            last_message_at: (last_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
            message_count: self.message_count.load(Ordering::Relaxed),
        }
    }

    pub fn on_change(&self, handler: BookHandler) {
        self.handlers.write().push(handler);
    }

    pub fn mark_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn clear_books(&self) {
        self.books.write().clear();
    }
}

/// Exponential reconnect backoff with ~1.7x growth and a hard cap.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let min = Duration::from_millis(min_ms.max(1));
        Self {
            current: min,
            min,
            max: Duration::from_millis(max_ms.max(min_ms)),
        }
    }

    /// Delay to sleep before the next attempt; grows until reset.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_millis() as u64 * 17 / 10;
        self.current = Duration::from_millis(grown).min(self.max);
        delay
    }

    /// Call once a connection is established (first inbound message).
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderbookLevel;
    use rust_decimal_macros::dec;

    fn book(token: &str, ts: DateTime<Utc>) -> Orderbook {
        Orderbook::new(
            token,
            vec![OrderbookLevel::new(dec!(0.49), dec!(10))],
            vec![OrderbookLevel::new(dec!(0.51), dec!(10))],
            ts,
        )
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let core = FeedCore::new(Venue::Predict);
        let added = core.add_subscriptions(&["a".into(), "b".into()]);
        assert_eq!(added.len(), 2);
        let added = core.add_subscriptions(&["a".into(), "c".into()]);
        assert_eq!(added, vec!["c".to_string()]);
        assert_eq!(core.status().subscribed, 3);
    }

    #[test]
    fn test_store_book_never_regresses() {
        let core = FeedCore::new(Venue::Predict);
        let newer = Utc::now();
        // Old enough to regress, young enough to pass the ingest guard.
        let older = newer - chrono::Duration::seconds(2);

        assert!(core.store_book(book("tok", newer)));
        assert!(!core.store_book(book("tok", older)));
        assert_eq!(core.snapshot("tok", 60_000).unwrap().updated_at, newer);
    }

    #[test]
    fn test_store_book_rejects_stale_and_future_stamps() {
        let core = FeedCore::new(Venue::Predict);
        // Buffered leftover from before the subscription settled.
        let stale = book("tok", Utc::now() - chrono::Duration::seconds(30));
        assert!(!core.store_book(stale));
        // Sender clock ahead of ours.
        let future = book("tok", Utc::now() + chrono::Duration::seconds(30));
        assert!(!core.store_book(future));
        assert_eq!(core.status().cache_size, 0);
    }

    #[test]
    fn test_store_book_rejects_invalid() {
        let core = FeedCore::new(Venue::Predict);
        let mut crossed = book("tok", Utc::now());
        crossed.bids[0].price = dec!(0.60);
        assert!(!core.store_book(crossed));
        assert_eq!(core.status().cache_size, 0);
    }

    #[test]
    fn test_snapshot_respects_max_age() {
        let core = FeedCore::new(Venue::Predict);
        let aged = Utc::now() - chrono::Duration::seconds(3);
        assert!(core.store_book(book("tok", aged)));
        assert!(core.snapshot("tok", 1_000).is_none());
        assert!(core.snapshot("tok", 60_000).is_some());
    }

    #[test]
    fn test_change_handler_fires_on_store() {
        let core = FeedCore::new(Venue::Polymarket);
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        core.on_change(Arc::new(move |venue, b: &Orderbook| {
            sink.write().push((venue, b.token_id.clone()));
        }));
        core.store_book(book("tok", Utc::now()));
        assert_eq!(seen.read().as_slice(), &[(Venue::Polymarket, "tok".to_string())]);
    }

    #[test]
    fn test_apply_delta_updates_and_notifies() {
        let core = FeedCore::new(Venue::Polymarket);
        core.store_book(book("tok", Utc::now() - chrono::Duration::seconds(1)));

        let changed = core.apply_delta("tok", |b| {
            b.asks[0].shares = dec!(25);
        });
        assert!(changed);
        let snap = core.snapshot("tok", 5_000).unwrap();
        assert_eq!(snap.asks[0].shares, dec!(25));

        assert!(!core.apply_delta("unknown", |_| {}));
    }

    #[test]
    fn test_apply_delta_drops_book_gone_invalid() {
        let core = FeedCore::new(Venue::Polymarket);
        core.store_book(book("tok", Utc::now()));
        let ok = core.apply_delta("tok", |b| {
            b.bids[0].price = dec!(0.60); // crosses the ask
        });
        assert!(!ok);
        assert!(core.snapshot("tok", 60_000).is_none());
    }

    #[test]
    fn test_backoff_growth_and_reset() {
        let mut backoff = Backoff::new(1_000, 3_000);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_700));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_890));
        assert_eq!(backoff.next_delay(), Duration::from_millis(3_000));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_status_health_gate() {
        let core = FeedCore::new(Venue::Predict);
        assert!(!core.status().is_healthy(10_000, Utc::now()));
        core.set_connected(true);
        assert!(!core.status().is_healthy(10_000, Utc::now()));
        core.mark_message();
        assert!(core.status().is_healthy(10_000, Utc::now()));
    }
}
