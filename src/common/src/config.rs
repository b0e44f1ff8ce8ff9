//! Configuration loading from environment variables.
//!
//! Every knob is read once at startup into an immutable, typed `Config`.
//! Required variables fail fast with a `ConfigError`; everything else has a
//! documented default. Section structs mirror the subsystems that consume
//! them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidVar { key: String, reason: String },

    #[error("Invalid URL in {key}: {url}")]
    InvalidUrl { key: String, url: String },
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    var(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            key: key.to_string(),
            reason: format!("cannot parse {raw:?}"),
        }),
        None => Ok(default),
    }
}

fn bool_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    match var(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidVar {
                key: key.to_string(),
                reason: format!("expected boolean, got {other:?}"),
            }),
        },
        None => Ok(default),
    }
}

fn url_or(key: &str, default: &str) -> Result<String, ConfigError> {
    let raw = var(key).unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
        key: key.to_string(),
        url: raw.clone(),
    })?;
    Ok(raw)
}

/// Predict REST credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub jwt_token: Option<String>,
    /// Held opaquely; passed through to the signing capability.
    pub private_key: Option<String>,
    pub account_address: Option<String>,
    /// External signing helper command. Live submission requires it.
    pub signer_cmd: Option<String>,
}

impl PredictConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = required("API_BASE_URL")?;
        Url::parse(&api_base_url).map_err(|_| ConfigError::InvalidUrl {
            key: "API_BASE_URL".to_string(),
            url: api_base_url.clone(),
        })?;
        Ok(Self {
            api_base_url,
            api_key: var("API_KEY"),
            jwt_token: var("JWT_TOKEN"),
            private_key: var("PRIVATE_KEY"),
            account_address: var("PREDICT_ACCOUNT_ADDRESS"),
            signer_cmd: var("PREDICT_SIGNER_CMD"),
        })
    }
}

/// Market-maker base quoting parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MakerConfig {
    pub spread: Decimal,
    pub min_spread: Decimal,
    pub max_spread: Decimal,
    pub use_value_signal: bool,
    pub value_signal_weight: f64,
    pub value_confidence_min: f64,
    /// Target dollar value per quote.
    pub order_size: Decimal,
    pub max_single_order_value: Decimal,
    /// Dollar cap on absolute net exposure per token.
    pub max_position: Decimal,
    /// Session loss that latches the trading halt.
    pub max_daily_loss: Decimal,
    pub inventory_skew_factor: Decimal,
    /// Relative mid move that cancels all quotes.
    pub cancel_threshold: Decimal,
    /// Relative quote drift that triggers a cancel-and-replace.
    pub reprice_threshold: Decimal,
    pub min_order_interval_ms: u64,
    pub max_orders_per_market: usize,
    pub anti_fill_bps: u32,
    pub near_touch_bps: u32,
    pub cooldown_after_cancel_ms: u64,
    pub volatility_pause_bps: u32,
    pub volatility_lookback_ms: u64,
    pub pause_after_volatility_ms: u64,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            spread: dec!(0.02),
            min_spread: dec!(0.005),
            max_spread: dec!(0.06),
            use_value_signal: false,
            value_signal_weight: 0.3,
            value_confidence_min: 0.5,
            order_size: dec!(50),
            max_single_order_value: dec!(250),
            max_position: dec!(500),
            max_daily_loss: dec!(100),
            inventory_skew_factor: dec!(0.2),
            cancel_threshold: dec!(0.05),
            reprice_threshold: dec!(0.01),
            min_order_interval_ms: 1_500,
            max_orders_per_market: 1,
            anti_fill_bps: 15,
            near_touch_bps: 40,
            cooldown_after_cancel_ms: 2_000,
            volatility_pause_bps: 150,
            volatility_lookback_ms: 5_000,
            pause_after_volatility_ms: 10_000,
        }
    }
}

impl MakerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            spread: parse_or("SPREAD", d.spread)?,
            min_spread: parse_or("MIN_SPREAD", d.min_spread)?,
            max_spread: parse_or("MAX_SPREAD", d.max_spread)?,
            use_value_signal: bool_or("USE_VALUE_SIGNAL", d.use_value_signal)?,
            value_signal_weight: parse_or("VALUE_SIGNAL_WEIGHT", d.value_signal_weight)?,
            value_confidence_min: parse_or("VALUE_CONFIDENCE_MIN", d.value_confidence_min)?,
            order_size: parse_or("ORDER_SIZE", d.order_size)?,
            max_single_order_value: parse_or("MAX_SINGLE_ORDER_VALUE", d.max_single_order_value)?,
            max_position: parse_or("MAX_POSITION", d.max_position)?,
            max_daily_loss: parse_or("MAX_DAILY_LOSS", d.max_daily_loss)?,
            inventory_skew_factor: parse_or("INVENTORY_SKEW_FACTOR", d.inventory_skew_factor)?,
            cancel_threshold: parse_or("CANCEL_THRESHOLD", d.cancel_threshold)?,
            reprice_threshold: parse_or("REPRICE_THRESHOLD", d.reprice_threshold)?,
            min_order_interval_ms: parse_or("MIN_ORDER_INTERVAL_MS", d.min_order_interval_ms)?,
            max_orders_per_market: parse_or("MAX_ORDERS_PER_MARKET", d.max_orders_per_market)?,
            anti_fill_bps: parse_or("ANTI_FILL_BPS", d.anti_fill_bps)?,
            near_touch_bps: parse_or("NEAR_TOUCH_BPS", d.near_touch_bps)?,
            cooldown_after_cancel_ms: parse_or("COOLDOWN_AFTER_CANCEL_MS", d.cooldown_after_cancel_ms)?,
            volatility_pause_bps: parse_or("VOLATILITY_PAUSE_BPS", d.volatility_pause_bps)?,
            volatility_lookback_ms: parse_or("VOLATILITY_LOOKBACK_MS", d.volatility_lookback_ms)?,
            pause_after_volatility_ms: parse_or("PAUSE_AFTER_VOLATILITY_MS", d.pause_after_volatility_ms)?,
        };
        if cfg.min_spread > cfg.spread || cfg.spread > cfg.max_spread {
            return Err(ConfigError::InvalidVar {
                key: "SPREAD".to_string(),
                reason: format!(
                    "spread clamps must satisfy min <= base <= max ({} <= {} <= {})",
                    cfg.min_spread, cfg.spread, cfg.max_spread
                ),
            });
        }
        Ok(cfg)
    }
}

/// Adaptive maker tuning (the `mm*` family).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MakerTuning {
    /// EMA smoothing for |dMid|/mid.
    pub vol_alpha: Decimal,
    /// EMA smoothing for top-N depth.
    pub depth_alpha: Decimal,
    /// Reference depth (shares) that counts as "normal".
    pub depth_ref: Decimal,
    /// Levels counted as top-of-book depth.
    pub depth_levels: usize,
    pub imbalance_weight: Decimal,
    /// Bound on the imbalance skew as a fraction of fair.
    pub max_imbalance_skew: Decimal,
    /// Vol EMA (bps) below which the token is CALM.
    pub calm_vol_bps: u32,
    /// Vol EMA (bps) above which the token is VOLATILE.
    pub volatile_vol_bps: u32,
    /// Hysteresis fraction applied to the profile bands.
    pub profile_hysteresis: f64,
    /// Spread scale per profile is derived from these multipliers.
    pub calm_spread_scale: Decimal,
    pub volatile_spread_scale: Decimal,
    /// Threshold multiplier applied in the VOLATILE profile.
    pub volatility_multiplier: Decimal,
    pub order_refresh_ms: u64,
    /// Fraction of top depth a single quote may consume.
    pub order_depth_usage: Decimal,
    pub min_top_depth_shares: Decimal,
    pub min_top_depth_usd: Decimal,
    pub touch_buffer_bps: u32,
    /// Extra spread applied after a detected fill.
    pub fill_risk_spread_bump: Decimal,
    pub iceberg_enabled: bool,
    pub iceberg_ratio: Decimal,
    pub iceberg_max_chunk_shares: Decimal,
    pub iceberg_requote_ms: u64,
}

impl Default for MakerTuning {
    fn default() -> Self {
        Self {
            vol_alpha: dec!(0.2),
            depth_alpha: dec!(0.1),
            depth_ref: dec!(500),
            depth_levels: 3,
            imbalance_weight: dec!(0.25),
            max_imbalance_skew: dec!(0.004),
            calm_vol_bps: 10,
            volatile_vol_bps: 60,
            profile_hysteresis: 0.2,
            calm_spread_scale: dec!(0.8),
            volatile_spread_scale: dec!(1.5),
            volatility_multiplier: dec!(1.5),
            order_refresh_ms: 45_000,
            order_depth_usage: dec!(0.25),
            min_top_depth_shares: dec!(20),
            min_top_depth_usd: dec!(10),
            touch_buffer_bps: 5,
            fill_risk_spread_bump: dec!(0.002),
            iceberg_enabled: false,
            iceberg_ratio: dec!(0.25),
            iceberg_max_chunk_shares: dec!(100),
            iceberg_requote_ms: 15_000,
        }
    }
}

impl MakerTuning {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            vol_alpha: parse_or("MM_VOL_ALPHA", d.vol_alpha)?,
            depth_alpha: parse_or("MM_DEPTH_ALPHA", d.depth_alpha)?,
            depth_ref: parse_or("MM_DEPTH_REF", d.depth_ref)?,
            depth_levels: parse_or("MM_DEPTH_LEVELS", d.depth_levels)?,
            imbalance_weight: parse_or("MM_IMBALANCE_WEIGHT", d.imbalance_weight)?,
            max_imbalance_skew: parse_or("MM_MAX_IMBALANCE_SKEW", d.max_imbalance_skew)?,
            calm_vol_bps: parse_or("MM_CALM_VOL_BPS", d.calm_vol_bps)?,
            volatile_vol_bps: parse_or("MM_VOLATILE_VOL_BPS", d.volatile_vol_bps)?,
            profile_hysteresis: parse_or("MM_PROFILE_HYSTERESIS", d.profile_hysteresis)?,
            calm_spread_scale: parse_or("MM_CALM_SPREAD_SCALE", d.calm_spread_scale)?,
            volatile_spread_scale: parse_or("MM_VOLATILE_SPREAD_SCALE", d.volatile_spread_scale)?,
            volatility_multiplier: parse_or("MM_VOLATILITY_MULTIPLIER", d.volatility_multiplier)?,
            order_refresh_ms: parse_or("MM_ORDER_REFRESH_MS", d.order_refresh_ms)?,
            order_depth_usage: parse_or("MM_ORDER_DEPTH_USAGE", d.order_depth_usage)?,
            min_top_depth_shares: parse_or("MM_MIN_TOP_DEPTH_SHARES", d.min_top_depth_shares)?,
            min_top_depth_usd: parse_or("MM_MIN_TOP_DEPTH_USD", d.min_top_depth_usd)?,
            touch_buffer_bps: parse_or("MM_TOUCH_BUFFER_BPS", d.touch_buffer_bps)?,
            fill_risk_spread_bump: parse_or("MM_FILL_RISK_SPREAD_BUMP", d.fill_risk_spread_bump)?,
            iceberg_enabled: bool_or("MM_ICEBERG_ENABLED", d.iceberg_enabled)?,
            iceberg_ratio: parse_or("MM_ICEBERG_RATIO", d.iceberg_ratio)?,
            iceberg_max_chunk_shares: parse_or("MM_ICEBERG_MAX_CHUNK_SHARES", d.iceberg_max_chunk_shares)?,
            iceberg_requote_ms: parse_or("MM_ICEBERG_REQUOTE_MS", d.iceberg_requote_ms)?,
        };
        if cfg.iceberg_ratio <= Decimal::ZERO || cfg.iceberg_ratio > Decimal::ONE {
            return Err(ConfigError::InvalidVar {
                key: "MM_ICEBERG_RATIO".to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if cfg.volatile_vol_bps <= cfg.calm_vol_bps {
            return Err(ConfigError::InvalidVar {
                key: "MM_VOLATILE_VOL_BPS".to_string(),
                reason: "volatile band must sit above the calm band".to_string(),
            });
        }
        Ok(cfg)
    }
}

/// Hedge policy applied when the maker detects a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HedgeMode {
    None,
    Flatten,
    Cross,
}

impl FromStr for HedgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(HedgeMode::None),
            "FLATTEN" => Ok(HedgeMode::Flatten),
            "CROSS" => Ok(HedgeMode::Cross),
            other => Err(format!("unknown hedge mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HedgeConfig {
    pub hedge_on_fill: bool,
    pub trigger_shares: Decimal,
    pub mode: HedgeMode,
    pub max_slippage_bps: u32,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            hedge_on_fill: false,
            trigger_shares: dec!(50),
            mode: HedgeMode::None,
            max_slippage_bps: 100,
        }
    }
}

impl HedgeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let mode = match var("HEDGE_MODE") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::InvalidVar {
                key: "HEDGE_MODE".to_string(),
                reason,
            })?,
            None => d.mode,
        };
        Ok(Self {
            hedge_on_fill: bool_or("HEDGE_ON_FILL", d.hedge_on_fill)?,
            trigger_shares: parse_or("HEDGE_TRIGGER_SHARES", d.trigger_shares)?,
            mode,
            max_slippage_bps: parse_or("HEDGE_MAX_SLIPPAGE_BPS", d.max_slippage_bps)?,
        })
    }
}

/// Scanner cadence, gates and intra-venue detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbConfig {
    pub scan_interval_ms: u64,
    pub max_markets: usize,
    pub orderbook_concurrency: usize,
    pub markets_cache_ms: u64,
    /// Max WS book age accepted before falling back to REST.
    pub ws_max_age_ms: i64,
    pub max_errors: usize,
    pub error_window_ms: u64,
    pub pause_on_error_ms: u64,
    pub execute_top_n: usize,
    pub execution_cooldown_ms: u64,
    pub stability_min_count: usize,
    pub stability_window_ms: u64,
    pub require_ws: bool,
    pub require_ws_health: bool,
    pub ws_health_max_age_ms: i64,
    pub ws_realtime: bool,
    pub ws_realtime_interval_ms: u64,
    pub ws_realtime_max_batch: usize,
    pub auto_execute: bool,
    /// Separate gate for VALUE_MISMATCH auto-execution.
    pub auto_execute_value: bool,
    /// Intra-venue detector thresholds (the authoritative rich variant).
    pub min_profit: Decimal,
    pub slippage_bps: u32,
    pub depth_usage: Decimal,
    pub max_recommended_shares: Decimal,
    pub max_vwap_deviation_bps: u32,
    pub max_vwap_levels: usize,
    pub min_notional_usd: Decimal,
    pub min_profit_usd: Decimal,
    pub min_depth_usd: Decimal,
    pub recheck_deviation_bps: u32,
    pub allow_shorting: bool,
    /// Value detector thresholds.
    pub value_edge_threshold: Decimal,
    pub value_confidence_threshold: f64,
    pub value_trading_cost: Decimal,
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 30_000,
            max_markets: 200,
            orderbook_concurrency: 8,
            markets_cache_ms: 60_000,
            ws_max_age_ms: 3_000,
            max_errors: 5,
            error_window_ms: 60_000,
            pause_on_error_ms: 120_000,
            execute_top_n: 1,
            execution_cooldown_ms: 60_000,
            stability_min_count: 2,
            stability_window_ms: 15_000,
            require_ws: false,
            require_ws_health: true,
            ws_health_max_age_ms: 10_000,
            ws_realtime: true,
            ws_realtime_interval_ms: 500,
            ws_realtime_max_batch: 25,
            auto_execute: false,
            auto_execute_value: false,
            min_profit: dec!(0.02),
            slippage_bps: 0,
            depth_usage: dec!(0.5),
            max_recommended_shares: dec!(500),
            max_vwap_deviation_bps: 200,
            max_vwap_levels: 5,
            min_notional_usd: dec!(10),
            min_profit_usd: dec!(1),
            min_depth_usd: dec!(25),
            recheck_deviation_bps: 150,
            allow_shorting: false,
            value_edge_threshold: dec!(0.05),
            value_confidence_threshold: 0.5,
            value_trading_cost: dec!(0.02),
        }
    }
}

impl ArbConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            scan_interval_ms: parse_or("ARB_SCAN_INTERVAL_MS", d.scan_interval_ms)?,
            max_markets: parse_or("ARB_MAX_MARKETS", d.max_markets)?,
            orderbook_concurrency: parse_or("ARB_ORDERBOOK_CONCURRENCY", d.orderbook_concurrency)?,
            markets_cache_ms: parse_or("ARB_MARKETS_CACHE_MS", d.markets_cache_ms)?,
            ws_max_age_ms: parse_or("ARB_WS_MAX_AGE_MS", d.ws_max_age_ms)?,
            max_errors: parse_or("ARB_MAX_ERRORS", d.max_errors)?,
            error_window_ms: parse_or("ARB_ERROR_WINDOW_MS", d.error_window_ms)?,
            pause_on_error_ms: parse_or("ARB_PAUSE_ON_ERROR_MS", d.pause_on_error_ms)?,
            execute_top_n: parse_or("ARB_EXECUTE_TOP_N", d.execute_top_n)?,
            execution_cooldown_ms: parse_or("ARB_EXECUTION_COOLDOWN_MS", d.execution_cooldown_ms)?,
            stability_min_count: parse_or("ARB_STABILITY_MIN_COUNT", d.stability_min_count)?,
            stability_window_ms: parse_or("ARB_STABILITY_WINDOW_MS", d.stability_window_ms)?,
            require_ws: bool_or("ARB_REQUIRE_WS", d.require_ws)?,
            require_ws_health: bool_or("ARB_REQUIRE_WS_HEALTH", d.require_ws_health)?,
            ws_health_max_age_ms: parse_or("ARB_WS_HEALTH_MAX_AGE_MS", d.ws_health_max_age_ms)?,
            ws_realtime: bool_or("ARB_WS_REALTIME", d.ws_realtime)?,
            ws_realtime_interval_ms: parse_or("ARB_WS_REALTIME_INTERVAL_MS", d.ws_realtime_interval_ms)?,
            ws_realtime_max_batch: parse_or("ARB_WS_REALTIME_MAX_BATCH", d.ws_realtime_max_batch)?,
            auto_execute: bool_or("ARB_AUTO_EXECUTE", d.auto_execute)?,
            auto_execute_value: bool_or("ARB_AUTO_EXECUTE_VALUE", d.auto_execute_value)?,
            min_profit: parse_or("ARB_MIN_PROFIT", d.min_profit)?,
            slippage_bps: parse_or("ARB_SLIPPAGE_BPS", d.slippage_bps)?,
            depth_usage: parse_or("ARB_DEPTH_USAGE", d.depth_usage)?,
            max_recommended_shares: parse_or("ARB_MAX_RECOMMENDED_SHARES", d.max_recommended_shares)?,
            max_vwap_deviation_bps: parse_or("ARB_MAX_VWAP_DEVIATION_BPS", d.max_vwap_deviation_bps)?,
            max_vwap_levels: parse_or("ARB_MAX_VWAP_LEVELS", d.max_vwap_levels)?,
            min_notional_usd: parse_or("ARB_MIN_NOTIONAL_USD", d.min_notional_usd)?,
            min_profit_usd: parse_or("ARB_MIN_PROFIT_USD", d.min_profit_usd)?,
            min_depth_usd: parse_or("ARB_MIN_DEPTH_USD", d.min_depth_usd)?,
            recheck_deviation_bps: parse_or("ARB_RECHECK_DEVIATION_BPS", d.recheck_deviation_bps)?,
            allow_shorting: bool_or("ARB_ALLOW_SHORTING", d.allow_shorting)?,
            value_edge_threshold: parse_or("ARB_VALUE_EDGE_THRESHOLD", d.value_edge_threshold)?,
            value_confidence_threshold: parse_or(
                "ARB_VALUE_CONFIDENCE_THRESHOLD",
                d.value_confidence_threshold,
            )?,
            value_trading_cost: parse_or("ARB_VALUE_TRADING_COST", d.value_trading_cost)?,
        })
    }
}

/// Cross-venue detector and execution controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossVenueConfig {
    pub enabled: bool,
    pub min_profit: Decimal,
    pub min_similarity: f64,
    /// Subtracted once per share from the assembly edge.
    pub transfer_cost: Decimal,
    pub slippage_bps: u32,
    pub max_shares: Decimal,
    pub depth_levels: usize,
    pub depth_usage: Decimal,
    pub use_mapping: bool,
    pub auto_execute: bool,
    pub require_confirm: bool,
    pub allow_sell_both: bool,
    pub mapping_file: String,
}

impl Default for CrossVenueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_profit: dec!(0.03),
            min_similarity: 0.6,
            transfer_cost: dec!(0.01),
            slippage_bps: 50,
            max_shares: dec!(500),
            depth_levels: 5,
            depth_usage: dec!(0.5),
            use_mapping: true,
            auto_execute: false,
            require_confirm: true,
            allow_sell_both: false,
            mapping_file: "cross-platform-mapping.json".to_string(),
        }
    }
}

impl CrossVenueConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            enabled: bool_or("CROSS_PLATFORM_ENABLED", d.enabled)?,
            min_profit: parse_or("CROSS_PLATFORM_MIN_PROFIT", d.min_profit)?,
            min_similarity: parse_or("CROSS_PLATFORM_MIN_SIMILARITY", d.min_similarity)?,
            transfer_cost: parse_or("CROSS_PLATFORM_TRANSFER_COST", d.transfer_cost)?,
            slippage_bps: parse_or("CROSS_PLATFORM_SLIPPAGE_BPS", d.slippage_bps)?,
            max_shares: parse_or("CROSS_PLATFORM_MAX_SHARES", d.max_shares)?,
            depth_levels: parse_or("CROSS_PLATFORM_DEPTH_LEVELS", d.depth_levels)?,
            depth_usage: parse_or("CROSS_PLATFORM_DEPTH_USAGE", d.depth_usage)?,
            use_mapping: bool_or("CROSS_PLATFORM_USE_MAPPING", d.use_mapping)?,
            auto_execute: bool_or("CROSS_PLATFORM_AUTO_EXECUTE", d.auto_execute)?,
            require_confirm: bool_or("CROSS_PLATFORM_REQUIRE_CONFIRM", d.require_confirm)?,
            allow_sell_both: bool_or("CROSS_PLATFORM_ALLOW_SELL_BOTH", d.allow_sell_both)?,
            mapping_file: var("CROSS_PLATFORM_MAPPING_FILE").unwrap_or(d.mapping_file),
        })
    }
}

/// Multi-outcome bundle detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiOutcomeConfig {
    pub enabled: bool,
    pub min_outcomes: usize,
    pub max_shares: Decimal,
}

impl Default for MultiOutcomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_outcomes: 3,
            max_shares: dec!(500),
        }
    }
}

impl MultiOutcomeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            enabled: bool_or("MULTI_OUTCOME_ENABLED", d.enabled)?,
            min_outcomes: parse_or("MULTI_OUTCOME_MIN_OUTCOMES", d.min_outcomes)?,
            max_shares: parse_or("MULTI_OUTCOME_MAX_SHARES", d.max_shares)?,
        })
    }
}

/// Dependency-solver plug-in. The solver itself is an external process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyConfig {
    pub solver_path: Option<String>,
    pub constraints_path: Option<String>,
    pub min_edge: Decimal,
    pub max_legs: usize,
    pub max_notional: Decimal,
    pub timeout_ms: u64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            solver_path: None,
            constraints_path: None,
            min_edge: dec!(0.02),
            max_legs: 6,
            max_notional: dec!(500),
            timeout_ms: 5_000,
        }
    }
}

impl DependencyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            solver_path: var("DEPENDENCY_SOLVER_PATH"),
            constraints_path: var("DEPENDENCY_CONSTRAINTS_PATH"),
            min_edge: parse_or("DEPENDENCY_MIN_EDGE", d.min_edge)?,
            max_legs: parse_or("DEPENDENCY_MAX_LEGS", d.max_legs)?,
            max_notional: parse_or("DEPENDENCY_MAX_NOTIONAL", d.max_notional)?,
            timeout_ms: parse_or("DEPENDENCY_TIMEOUT_MS", d.timeout_ms)?,
        })
    }

    pub fn enabled(&self) -> bool {
        self.solver_path.is_some() && self.constraints_path.is_some()
    }
}

/// Which identifier names a Predict WS subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredictTopicKey {
    TokenId,
    ConditionId,
    EventId,
}

impl FromStr for PredictTopicKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tokenId" => Ok(PredictTopicKey::TokenId),
            "conditionId" => Ok(PredictTopicKey::ConditionId),
            "eventId" => Ok(PredictTopicKey::EventId),
            other => Err(format!("unknown topic key {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictWsConfig {
    pub enabled: bool,
    pub url: String,
    pub topic_key: PredictTopicKey,
    pub api_key: Option<String>,
    /// 0 disables the silent-socket watchdog.
    pub stale_ms: u64,
    pub reset_on_reconnect: bool,
}

impl Default for PredictWsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://ws.predict.fun/ws".to_string(),
            topic_key: PredictTopicKey::TokenId,
            api_key: None,
            stale_ms: 0,
            reset_on_reconnect: true,
        }
    }
}

impl PredictWsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let topic_key = match var("PREDICT_WS_TOPIC_KEY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::InvalidVar {
                key: "PREDICT_WS_TOPIC_KEY".to_string(),
                reason,
            })?,
            None => d.topic_key,
        };
        Ok(Self {
            enabled: bool_or("PREDICT_WS_ENABLED", d.enabled)?,
            url: url_or("PREDICT_WS_URL", &d.url)?,
            topic_key,
            api_key: var("PREDICT_WS_API_KEY"),
            stale_ms: parse_or("PREDICT_WS_STALE_MS", d.stale_ms)?,
            reset_on_reconnect: bool_or("PREDICT_WS_RESET_ON_RECONNECT", d.reset_on_reconnect)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolymarketConfig {
    pub gamma_url: String,
    pub clob_url: String,
    pub ws_enabled: bool,
    pub ws_url: String,
    pub ws_custom_feature: bool,
    /// Request the full book dump on subscribe.
    pub ws_initial_dump: bool,
    pub cache_ttl_ms: u64,
    pub max_markets: usize,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            clob_url: "https://clob.polymarket.com".to_string(),
            ws_enabled: true,
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            ws_custom_feature: false,
            ws_initial_dump: true,
            cache_ttl_ms: 60_000,
            max_markets: 300,
        }
    }
}

impl PolymarketConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            gamma_url: url_or("POLYMARKET_GAMMA_URL", &d.gamma_url)?,
            clob_url: url_or("POLYMARKET_CLOB_URL", &d.clob_url)?,
            ws_enabled: bool_or("POLYMARKET_WS_ENABLED", d.ws_enabled)?,
            ws_url: url_or("POLYMARKET_WS_URL", &d.ws_url)?,
            ws_custom_feature: bool_or("POLYMARKET_WS_CUSTOM_FEATURE", d.ws_custom_feature)?,
            ws_initial_dump: bool_or("POLYMARKET_WS_INITIAL_DUMP", d.ws_initial_dump)?,
            cache_ttl_ms: parse_or("POLYMARKET_CACHE_TTL_MS", d.cache_ttl_ms)?,
            max_markets: parse_or("POLYMARKET_MAX_MARKETS", d.max_markets)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpinionConfig {
    pub openapi_url: String,
    pub api_key: Option<String>,
    pub ws_enabled: bool,
    pub ws_url: String,
    pub ws_heartbeat_ms: u64,
    pub max_markets: usize,
}

impl Default for OpinionConfig {
    fn default() -> Self {
        Self {
            openapi_url: "https://openapi.opinion.trade".to_string(),
            api_key: None,
            ws_enabled: false,
            ws_url: "wss://ws.opinion.trade/stream".to_string(),
            ws_heartbeat_ms: 15_000,
            max_markets: 200,
        }
    }
}

impl OpinionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            openapi_url: url_or("OPINION_OPENAPI_URL", &d.openapi_url)?,
            api_key: var("OPINION_API_KEY"),
            ws_enabled: bool_or("OPINION_WS_ENABLED", d.ws_enabled)?,
            ws_url: url_or("OPINION_WS_URL", &d.ws_url)?,
            ws_heartbeat_ms: parse_or("OPINION_WS_HEARTBEAT_MS", d.ws_heartbeat_ms)?,
            max_markets: parse_or("OPINION_MAX_MARKETS", d.max_markets)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub min_interval_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_interval_ms: 30_000,
        }
    }
}

impl AlertConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let webhook_url = match var("ALERT_WEBHOOK_URL") {
            Some(raw) => {
                Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
                    key: "ALERT_WEBHOOK_URL".to_string(),
                    url: raw.clone(),
                })?;
                Some(raw)
            }
            None => None,
        };
        Ok(Self {
            webhook_url,
            min_interval_ms: parse_or("ALERT_MIN_INTERVAL_MS", d.min_interval_ms)?,
        })
    }
}

/// Full application configuration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub predict: PredictConfig,
    pub maker: MakerConfig,
    pub tuning: MakerTuning,
    pub hedge: HedgeConfig,
    pub arb: ArbConfig,
    pub cross_venue: CrossVenueConfig,
    pub multi_outcome: MultiOutcomeConfig,
    pub dependency: DependencyConfig,
    pub predict_ws: PredictWsConfig,
    pub polymarket: PolymarketConfig,
    pub opinion: OpinionConfig,
    pub alert: AlertConfig,
    /// Confirm every execution prompt automatically.
    pub auto_confirm_all: bool,
    /// Master switch: false routes all submissions to the dry-run submitter.
    pub enable_trading: bool,
    /// Directory for metric/state snapshot files.
    pub state_dir: String,
    /// Default HTTP request timeout.
    pub default_timeout_ms: u64,
    pub ws_reconnect_min_ms: u64,
    pub ws_reconnect_max_ms: u64,
}

impl Config {
    /// Load configuration, reading a `.env` file first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from process environment only (no `.env` file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        Ok(Self {
            predict: PredictConfig::from_env()?,
            maker: MakerConfig::from_env()?,
            tuning: MakerTuning::from_env()?,
            hedge: HedgeConfig::from_env()?,
            arb: ArbConfig::from_env()?,
            cross_venue: CrossVenueConfig::from_env()?,
            multi_outcome: MultiOutcomeConfig::from_env()?,
            dependency: DependencyConfig::from_env()?,
            predict_ws: PredictWsConfig::from_env()?,
            polymarket: PolymarketConfig::from_env()?,
            opinion: OpinionConfig::from_env()?,
            alert: AlertConfig::from_env()?,
            auto_confirm_all: bool_or("AUTO_CONFIRM_ALL", false)?,
            enable_trading: bool_or("ENABLE_TRADING", false)?,
            state_dir: var("STATE_DIR").unwrap_or_else(|| ".".to_string()),
            default_timeout_ms: parse_or("DEFAULT_TIMEOUT_MS", 10_000)?,
            ws_reconnect_min_ms: parse_or("WS_RECONNECT_MIN_MS", 1_000)?,
            ws_reconnect_max_ms: parse_or("WS_RECONNECT_MAX_MS", 30_000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in env::vars() {
            let prefixed = [
                "API_", "JWT_", "PRIVATE_", "PREDICT_", "SPREAD", "MIN_SPREAD", "MAX_SPREAD",
                "USE_VALUE", "VALUE_", "ORDER_SIZE", "MAX_SINGLE", "MAX_POSITION",
                "MAX_DAILY", "INVENTORY_", "CANCEL_", "REPRICE_", "MIN_ORDER", "MAX_ORDERS",
                "ANTI_FILL", "NEAR_TOUCH", "COOLDOWN_", "VOLATILITY_", "PAUSE_AFTER", "HEDGE_",
                "MM_", "ARB_", "CROSS_PLATFORM_", "MULTI_OUTCOME_", "DEPENDENCY_",
                "POLYMARKET_", "OPINION_", "ALERT_", "AUTO_CONFIRM", "ENABLE_TRADING",
                "STATE_DIR", "DEFAULT_TIMEOUT", "WS_RECONNECT",
            ]
            .iter()
            .any(|p| key.starts_with(p));
            if prefixed {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_missing_api_base_url_is_fatal() {
        clear_env();
        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::MissingVar(v)) if v == "API_BASE_URL"));
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        clear_env();
        env::set_var("API_BASE_URL", "https://api.predict.example");

        let config = Config::from_env_only().unwrap();
        assert_eq!(config.maker.spread, dec!(0.02));
        assert_eq!(config.arb.scan_interval_ms, 30_000);
        assert_eq!(config.hedge.mode, HedgeMode::None);
        assert_eq!(config.predict_ws.topic_key, PredictTopicKey::TokenId);
        assert!(!config.enable_trading);
        assert!(!config.dependency.enabled());

        env::remove_var("API_BASE_URL");
    }

    #[test]
    #[serial]
    fn test_invalid_spread_ordering_rejected() {
        clear_env();
        env::set_var("API_BASE_URL", "https://api.predict.example");
        env::set_var("MIN_SPREAD", "0.05");
        env::set_var("SPREAD", "0.01");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidVar { .. })));

        env::remove_var("API_BASE_URL");
        env::remove_var("MIN_SPREAD");
        env::remove_var("SPREAD");
    }

    #[test]
    #[serial]
    fn test_invalid_url_rejected() {
        clear_env();
        env::set_var("API_BASE_URL", "not a url");
        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
        env::remove_var("API_BASE_URL");
    }

    #[test]
    #[serial]
    fn test_hedge_mode_parse() {
        clear_env();
        env::set_var("API_BASE_URL", "https://api.predict.example");
        env::set_var("HEDGE_MODE", "cross");
        let config = Config::from_env_only().unwrap();
        assert_eq!(config.hedge.mode, HedgeMode::Cross);

        env::set_var("HEDGE_MODE", "sideways");
        assert!(Config::from_env_only().is_err());

        env::remove_var("API_BASE_URL");
        env::remove_var("HEDGE_MODE");
    }

    #[test]
    #[serial]
    fn test_serde_round_trip_is_fixed_point() {
        clear_env();
        env::set_var("API_BASE_URL", "https://api.predict.example");
        env::set_var("ARB_AUTO_EXECUTE", "true");
        env::set_var("CROSS_PLATFORM_MIN_PROFIT", "0.04");

        let config = Config::from_env_only().unwrap();
        let raw = serde_json::to_string(&config).unwrap();
        let reparsed: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(config, reparsed);

        env::remove_var("API_BASE_URL");
        env::remove_var("ARB_AUTO_EXECUTE");
        env::remove_var("CROSS_PLATFORM_MIN_PROFIT");
    }
}
