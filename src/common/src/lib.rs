//! Shared library for the Predict trading agent services.
//!
//! Provides the pieces every binary composes:
//! - Typed configuration loaded from `.env`
//! - Market / orderbook / order models with invariant validation
//! - VWAP fill estimation and fair-value signals
//! - Venue REST clients and WebSocket feeds
//! - The merged book store and market catalogs
//! - Order submission seams and the opportunity executor

pub mod alert;
pub mod book_store;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod fair_value;
pub mod feed;
pub mod mapping;
pub mod models;
pub mod opinion;
pub mod opinion_ws;
pub mod opportunity;
pub mod persist;
pub mod polymarket;
pub mod polymarket_ws;
pub mod predict;
pub mod predict_ws;
pub mod submitter;
pub mod vwap;

pub use alert::{AlertOutcome, AlertSink};
pub use book_store::{BookChange, BookStore};
pub use catalog::{MarketCatalog, PeerCatalog};
pub use config::{
    AlertConfig, ArbConfig, Config, ConfigError, CrossVenueConfig, DependencyConfig, HedgeConfig,
    HedgeMode, MakerConfig, MakerTuning, MultiOutcomeConfig, OpinionConfig, PolymarketConfig,
    PredictConfig, PredictTopicKey, PredictWsConfig,
};
pub use executor::{
    ArbitrageExecution, ExecutionPolicy, ExecutionStatus, Executor, LegOutcome, TradeRecord,
};
pub use fair_value::FairValue;
pub use feed::{Backoff, BookHandler, FeedCore, FeedStatus};
pub use mapping::{normalize_question, question_similarity, MappingEntry, MappingTable};
pub use models::{
    Activation, BookError, Market, Order, Orderbook, OrderbookLevel, OrderKind, OrderSide,
    OrderStatus, Outcome, Position, Venue,
};
pub use opinion::{OpinionClient, OpinionError};
pub use opinion_ws::OpinionWsFeed;
pub use opportunity::{
    sort_by_edge, Leg, Opportunity, OpportunityKey, OpportunityKind, PairAction, RiskLevel,
};
pub use polymarket::{PolymarketClient, PolymarketError};
pub use polymarket_ws::PolymarketWsFeed;
pub use predict::{PredictClient, PredictError};
pub use predict_ws::{PredictWsFeed, SubscribeSpec};
pub use submitter::{
    CommandSigner, CrossVenueSubmitter, DryRunSubmitter, OrderHandle, OrderIntent, OrderSigner,
    OrderSubmitter, PredictSubmitter, SignedOrder, SubmitError, SubmitterAddresses,
    UnavailableCrossVenue,
};
pub use vwap::{
    estimate_buy, estimate_sell, max_buy_shares_for_limit, sum_depth, sum_notional, FeeParams,
    FillEstimate,
};
