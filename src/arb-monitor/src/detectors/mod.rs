//! Opportunity detectors.
//!
//! Each detector is a pure function from a books-and-markets snapshot to a
//! list of typed opportunities, sorted best-edge first by the caller. The
//! shared size search starts from the depth-usage cap and shrinks by 0.6 up
//! to four times, keeping the size with the best edge.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use common::{Market, Opportunity, Orderbook, Venue};

pub mod cross;
pub mod dependency;
pub mod intra;
pub mod multi;
pub mod value;

pub use cross::CrossVenueDetector;
pub use intra::IntraVenueDetector;
pub use multi::MultiOutcomeDetector;
pub use value::ValueMismatchDetector;

/// Default time-to-live stamped on emitted opportunities.
pub const OPPORTUNITY_TTL_MS: i64 = 30_000;

/// Immutable view of the world one scan operates on.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Predict markets in scope for this scan.
    pub markets: Vec<Market>,
    /// Normalized peer-venue market lists.
    pub peer_markets: HashMap<Venue, Vec<Market>>,
    /// Books keyed by venue and token.
    pub books: HashMap<(Venue, String), Orderbook>,
}

impl Snapshot {
    pub fn book(&self, venue: Venue, token_id: &str) -> Option<&Orderbook> {
        self.books.get(&(venue, token_id.to_string()))
    }

    pub fn predict_book(&self, token_id: &str) -> Option<&Orderbook> {
        self.book(Venue::Predict, token_id)
    }

    /// Valid (per the book invariants) and present, or nothing.
    pub fn valid_book(&self, venue: Venue, token_id: &str) -> Option<&Orderbook> {
        self.book(venue, token_id).filter(|b| b.validate().is_ok())
    }

    pub fn insert_book(&mut self, venue: Venue, book: Orderbook) {
        self.books.insert((venue, book.token_id.clone()), book);
    }
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, snapshot: &Snapshot) -> Vec<Opportunity>;
}

const SHRINK_FACTOR: Decimal = dec!(0.6);
const MAX_SHRINKS: usize = 4;

/// Try `start` shares and up to four 0.6x shrinks; keep the candidate with
/// the highest edge (ties prefer the larger size). The evaluator returns
/// `(edge, payload)` for sizes that pass every constraint.
pub fn shrink_search<T>(
    start: Decimal,
    mut evaluate: impl FnMut(Decimal) -> Option<(Decimal, T)>,
) -> Option<(Decimal, Decimal, T)> {
    let mut best: Option<(Decimal, Decimal, T)> = None;
    let mut size = start.floor();
    for _ in 0..=MAX_SHRINKS {
        if size < Decimal::ONE {
            break;
        }
        if let Some((edge, payload)) = evaluate(size) {
            let better = best.as_ref().map_or(true, |(_, e, _)| edge > *e);
            if better {
                best = Some((size, edge, payload));
            }
        }
        size = (size * SHRINK_FACTOR).floor();
    }
    best
}

/// Relative deviation between a fill price and the touch, in basis points.
pub fn deviation_bps(fill_price: Decimal, touch: Decimal) -> Decimal {
    if touch <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (fill_price - touch).abs() / touch * dec!(10000)
}
