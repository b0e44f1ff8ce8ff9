//! Merged order book store.
//!
//! One read-mostly map over `(venue, token)` fed by WS pushes and REST
//! write-backs. Change events fan out to subscribers through bounded
//! channels; a subscriber that cannot keep up loses events (counted), the
//! publisher never blocks.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::feed::FeedCore;
use crate::models::{Orderbook, Venue};

/// Notification that a book changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookChange {
    pub venue: Venue,
    pub token_id: String,
}

pub struct BookStore {
    books: DashMap<(Venue, String), Orderbook>,
    subscribers: RwLock<Vec<mpsc::Sender<BookChange>>>,
    dropped_events: AtomicU64,
}

impl BookStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            books: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
        })
    }

    /// Insert or refresh a book. Invalid books are rejected, and a stored
    /// timestamp never regresses.
    pub fn put(&self, venue: Venue, book: Orderbook) -> bool {
        if book.validate().is_err() {
            debug!("book store rejected invalid book for {}:{}", venue, book.token_id);
            return false;
        }
        let key = (venue, book.token_id.clone());
        {
            let mut entry = self.books.entry(key).or_insert_with(|| book.clone());
            if entry.updated_at > book.updated_at {
                return false;
            }
            *entry = book.clone();
        }
        self.publish(BookChange {
            venue,
            token_id: book.token_id,
        });
        true
    }

    /// Fresh book or absent. Whatever is returned satisfies
    /// `updated_at >= now - max_age`.
    pub fn snapshot(&self, venue: Venue, token_id: &str, max_age_ms: i64) -> Option<Orderbook> {
        let book = self.books.get(&(venue, token_id.to_string()))?;
        if !book.is_fresh(max_age_ms, Utc::now()) {
            return None;
        }
        Some(book.clone())
    }

    /// Register a change subscriber with the given queue capacity.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<BookChange> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.write().push(tx);
        rx
    }

    /// Wire a venue feed into this store: every accepted feed book is
    /// mirrored here and fanned out.
    pub fn attach_feed(self: &Arc<Self>, feed: &Arc<FeedCore>) {
        let store = Arc::clone(self);
        feed.on_change(Arc::new(move |venue, book: &Orderbook| {
            store.put(venue, book.clone());
        }));
    }

    fn publish(&self, change: BookChange) {
        let mut disconnected = false;
        for tx in self.subscribers.read().iter() {
            match tx.try_send(change.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => disconnected = true,
            }
        }
        if disconnected {
            self.subscribers.write().retain(|tx| !tx.is_closed());
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderbookLevel;
    use chrono::{DateTime, Duration};
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
    fn test_put_and_snapshot_freshness() {
        let store = BookStore::new();
        assert!(store.put(Venue::Predict, book("tok", Utc::now())));
        assert!(store.snapshot(Venue::Predict, "tok", 5_000).is_some());
        // Same token on another venue is a different entry.
        assert!(store.snapshot(Venue::Polymarket, "tok", 5_000).is_none());
    }

    #[test]
    fn test_snapshot_filters_stale() {
        let store = BookStore::new();
        store.put(Venue::Predict, book("tok", Utc::now() - Duration::seconds(30)));
        assert!(store.snapshot(Venue::Predict, "tok", 5_000).is_none());
        assert!(store.snapshot(Venue::Predict, "tok", 60_000).is_some());
    }

    #[test]
    fn test_put_never_regresses() {
        let store = BookStore::new();
        let newer = Utc::now();
        store.put(Venue::Predict, book("tok", newer));
        assert!(!store.put(Venue::Predict, book("tok", newer - Duration::seconds(5))));
        assert_eq!(
            store.snapshot(Venue::Predict, "tok", 60_000).unwrap().updated_at,
            newer
        );
    }

    #[test]
    fn test_put_rejects_invalid_book() {
        let store = BookStore::new();
        let mut crossed = book("tok", Utc::now());
        crossed.bids[0].price = dec!(0.60);
        assert!(!store.put(Venue::Predict, crossed));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_receives_changes() {
        let store = BookStore::new();
        let mut rx = store.subscribe(8);
        store.put(Venue::Predict, book("tok", Utc::now()));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.venue, Venue::Predict);
        assert_eq!(change.token_id, "tok");
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_not_blocks() {
        let store = BookStore::new();
        let _rx = store.subscribe(1);
        let base = Utc::now();
        for i in 0..5 {
            store.put(
                Venue::Predict,
                book("tok", base + Duration::milliseconds(i)),
            );
        }
        // Queue holds one; the rest were dropped with a counter.
        assert_eq!(store.dropped_events(), 4);
    }

    #[tokio::test]
    async fn test_attach_feed_mirrors_books() {
        let store = BookStore::new();
        let core = FeedCore::new(Venue::Polymarket);
        store.attach_feed(&core);
        core.store_book(book("tok", Utc::now()));
        assert!(store.snapshot(Venue::Polymarket, "tok", 5_000).is_some());
    }
}
