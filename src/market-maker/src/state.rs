//! Per-token maker state.
//!
//! Tracks the quoting state machine, volatility/depth EMAs with profile
//! hysteresis, the risk guards that flatten quotes, and per-order risk
//! actions. Everything here is synchronous; the pass loop in `main`
//! performs the I/O.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::{Duration, Instant};

use common::{MakerConfig, MakerTuning, Orderbook, OrderSide};

const BPS: Decimal = dec!(10000);

/// Volatility/depth regime. Profile selects spread scale, size scale and
/// the threshold multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteProfile {
    Calm,
    Normal,
    Volatile,
}

impl QuoteProfile {
    pub fn size_scale(&self) -> Decimal {
        match self {
            QuoteProfile::Calm => dec!(1.0),
            QuoteProfile::Normal => dec!(0.85),
            QuoteProfile::Volatile => dec!(0.6),
        }
    }

    pub fn spread_scale(&self, tuning: &MakerTuning) -> Decimal {
        match self {
            QuoteProfile::Calm => tuning.calm_spread_scale,
            QuoteProfile::Normal => Decimal::ONE,
            QuoteProfile::Volatile => tuning.volatile_spread_scale,
        }
    }

    /// Threshold multiplier: volatile regimes loosen cancel/reprice gates.
    pub fn vol_mul(&self, tuning: &MakerTuning) -> Decimal {
        match self {
            QuoteProfile::Volatile => tuning.volatility_multiplier.max(Decimal::ONE),
            _ => Decimal::ONE,
        }
    }
}

/// Quoting phase. Transitions are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerPhase {
    Idle,
    Quoting,
    Cooldown,
    Paused,
    Hedging,
}

/// Why all quotes on a token were pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTrip {
    ThinLiquidity,
    VolatilitySpike,
    BigMove,
}

/// Per-order risk decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRisk {
    /// Imminent fill risk; cancel and pause.
    AntiFill,
    /// Drifted close to the opposite touch; cancel without pausing.
    NearTouch,
    /// Order is older than the refresh window.
    Refresh,
    /// Target moved enough to justify a cancel-and-replace.
    Reprice,
}

/// One resting quote we own.
#[derive(Debug, Clone)]
pub struct OpenQuote {
    pub hash: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub shares: Decimal,
    pub placed_at: Instant,
}

#[derive(Debug)]
pub struct TokenState {
    pub token_id: String,
    pub phase: MakerPhase,
    pub profile: QuoteProfile,
    pub vol_ema: Decimal,
    pub depth_ema: Decimal,
    pub last_depth: Decimal,
    pub last_mid: Option<Decimal>,
    pub last_mid_at: Option<Instant>,
    pub open_orders: Vec<OpenQuote>,
    pub last_net_shares: Decimal,
    pub action_cooldown_until: Option<Instant>,
    pub pause_until: Option<Instant>,
    pub last_order_at: Option<Instant>,
    pub last_iceberg_repost_at: Option<Instant>,
    /// Widens the spread for the pass after a detected fill.
    pub fill_risk_bump: bool,
}

impl TokenState {
    pub fn new(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            phase: MakerPhase::Idle,
            profile: QuoteProfile::Normal,
            vol_ema: Decimal::ZERO,
            depth_ema: Decimal::ZERO,
            last_depth: Decimal::ZERO,
            last_mid: None,
            last_mid_at: None,
            open_orders: Vec::new(),
            last_net_shares: Decimal::ZERO,
            action_cooldown_until: None,
            pause_until: None,
            last_order_at: None,
            last_iceberg_repost_at: None,
            fill_risk_bump: false,
        }
    }

    /// Fold a fresh book into the EMAs and profile. Returns the relative
    /// mid move |dMid|/mid since the previous observation.
    pub fn observe(&mut self, book: &Orderbook, tuning: &MakerTuning, now: Instant) -> Decimal {
        let mid = match book.mid_price() {
            Some(m) if m > Decimal::ZERO => m,
            _ => return Decimal::ZERO,
        };

        let rel_move = match self.last_mid {
            Some(prev) if prev > Decimal::ZERO => (mid - prev).abs() / prev,
            _ => Decimal::ZERO,
        };
        self.vol_ema =
            tuning.vol_alpha * rel_move + (Decimal::ONE - tuning.vol_alpha) * self.vol_ema;

        let depth = book
            .bids
            .iter()
            .chain(book.asks.iter())
            .take(tuning.depth_levels.max(1) * 2)
            .map(|l| l.shares)
            .sum::<Decimal>();
        self.depth_ema =
            tuning.depth_alpha * depth + (Decimal::ONE - tuning.depth_alpha) * self.depth_ema;
        self.last_depth = depth;

        self.last_mid = Some(mid);
        self.last_mid_at = Some(now);
        self.update_profile(tuning);
        rel_move
    }

    /// CALM/NORMAL/VOLATILE selection with hysteresis: the band a token is
    /// in must be exceeded by the hysteresis margin before it switches.
    fn update_profile(&mut self, tuning: &MakerTuning) {
        let vol_bps = self.vol_ema * BPS;
        let hysteresis = Decimal::try_from(tuning.profile_hysteresis).unwrap_or(Decimal::ZERO);
        let calm = Decimal::from(tuning.calm_vol_bps);
        let volatile = Decimal::from(tuning.volatile_vol_bps);

        let depth_ratio = if tuning.depth_ref > Decimal::ZERO {
            self.depth_ema / tuning.depth_ref
        } else {
            Decimal::ONE
        };

        self.profile = match self.profile {
            QuoteProfile::Calm => {
                if vol_bps > calm * (Decimal::ONE + hysteresis) {
                    QuoteProfile::Normal
                } else {
                    QuoteProfile::Calm
                }
            }
            QuoteProfile::Normal => {
                if vol_bps > volatile * (Decimal::ONE + hysteresis)
                    || depth_ratio < dec!(0.25)
                {
                    QuoteProfile::Volatile
                } else if vol_bps < calm * (Decimal::ONE - hysteresis)
                    && depth_ratio >= dec!(0.5)
                {
                    QuoteProfile::Calm
                } else {
                    QuoteProfile::Normal
                }
            }
            QuoteProfile::Volatile => {
                if vol_bps < volatile * (Decimal::ONE - hysteresis)
                    && depth_ratio >= dec!(0.25)
                {
                    QuoteProfile::Normal
                } else {
                    QuoteProfile::Volatile
                }
            }
        };
    }

    /// Risk guards, checked before quoting. A trip cancels all quotes.
    pub fn guard_trip(
        &self,
        book: &Orderbook,
        rel_move: Decimal,
        maker: &MakerConfig,
        tuning: &MakerTuning,
        now: Instant,
    ) -> Option<GuardTrip> {
        let bid_top = book.best_bid().map(|l| l.shares).unwrap_or(Decimal::ZERO);
        let ask_top = book.best_ask().map(|l| l.shares).unwrap_or(Decimal::ZERO);
        let top_depth = bid_top.min(ask_top);
        let top_depth_usd = book
            .mid_price()
            .map(|m| top_depth * m)
            .unwrap_or(Decimal::ZERO);
        if top_depth < tuning.min_top_depth_shares || top_depth_usd < tuning.min_top_depth_usd {
            return Some(GuardTrip::ThinLiquidity);
        }

        let within_lookback = self
            .last_mid_at
            .map(|at| now.duration_since(at) <= Duration::from_millis(maker.volatility_lookback_ms))
            .unwrap_or(false);
        if within_lookback && rel_move * BPS >= Decimal::from(maker.volatility_pause_bps) {
            return Some(GuardTrip::VolatilitySpike);
        }

        let vol_mul = self.profile.vol_mul(tuning);
        if rel_move > maker.cancel_threshold / vol_mul {
            return Some(GuardTrip::BigMove);
        }
        None
    }

    /// Evaluate each resting order against the fresh book and targets.
    /// Returns `(hash, risk)` pairs for orders that must be cancelled.
    pub fn order_actions(
        &self,
        book: &Orderbook,
        bid_target: Decimal,
        ask_target: Decimal,
        maker: &MakerConfig,
        tuning: &MakerTuning,
        now: Instant,
    ) -> Vec<(String, OrderRisk)> {
        let vol_mul = self.profile.vol_mul(tuning);
        let anti_fill = Decimal::from(maker.anti_fill_bps) * vol_mul;
        let near_touch = Decimal::from(maker.near_touch_bps) * vol_mul;
        let refresh = Duration::from_millis(tuning.order_refresh_ms);

        let mut actions = Vec::new();
        for order in &self.open_orders {
            let opposite = match order.side {
                OrderSide::Buy => book.best_ask().map(|l| l.price),
                OrderSide::Sell => book.best_bid().map(|l| l.price),
            };
            let Some(opposite) = opposite else { continue };
            let distance_bps = if order.price > Decimal::ZERO {
                (opposite - order.price).abs() / order.price * BPS
            } else {
                Decimal::ZERO
            };

            if distance_bps <= anti_fill {
                actions.push((order.hash.clone(), OrderRisk::AntiFill));
                continue;
            }
            if distance_bps <= near_touch {
                actions.push((order.hash.clone(), OrderRisk::NearTouch));
                continue;
            }
            if now.duration_since(order.placed_at) > refresh {
                actions.push((order.hash.clone(), OrderRisk::Refresh));
                continue;
            }

            let target = match order.side {
                OrderSide::Buy => bid_target,
                OrderSide::Sell => ask_target,
            };
            if order.price > Decimal::ZERO {
                let drift = (target - order.price).abs() / order.price;
                if drift >= maker.reprice_threshold / vol_mul {
                    actions.push((order.hash.clone(), OrderRisk::Reprice));
                }
            }
        }
        actions
    }

    pub fn remove_orders(&mut self, hashes: &[String]) {
        self.open_orders.retain(|o| !hashes.contains(&o.hash));
    }

    pub fn open_on_side(&self, side: OrderSide) -> usize {
        self.open_orders.iter().filter(|o| o.side == side).count()
    }

    pub fn start_cooldown(&mut self, maker: &MakerConfig, now: Instant) {
        self.phase = MakerPhase::Cooldown;
        self.action_cooldown_until =
            Some(now + Duration::from_millis(maker.cooldown_after_cancel_ms));
    }

    pub fn start_pause(&mut self, maker: &MakerConfig, now: Instant) {
        self.phase = MakerPhase::Paused;
        self.pause_until = Some(now + Duration::from_millis(maker.pause_after_volatility_ms));
    }

    /// Clear expired time gates; returns whether the token may act now.
    pub fn gates_open(&mut self, now: Instant) -> bool {
        if let Some(until) = self.pause_until {
            if now < until {
                return false;
            }
            self.pause_until = None;
        }
        if let Some(until) = self.action_cooldown_until {
            if now < until {
                return false;
            }
            self.action_cooldown_until = None;
        }
        if matches!(self.phase, MakerPhase::Cooldown | MakerPhase::Paused) {
            self.phase = MakerPhase::Idle;
        }
        true
    }

    pub fn order_interval_open(&self, maker: &MakerConfig, now: Instant) -> bool {
        match self.last_order_at {
            Some(at) => {
                now.duration_since(at) >= Duration::from_millis(maker.min_order_interval_ms)
            }
            None => true,
        }
    }
}

/// Session-level P&L tracking with the latched trading halt.
#[derive(Debug, Default)]
pub struct SessionState {
    baseline_pnl: Option<Decimal>,
    session_pnl: Decimal,
    halted: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with the current total P&L across tracked positions. The
    /// first observation becomes the session baseline.
    pub fn update(&mut self, total_pnl: Decimal, max_daily_loss: Decimal) {
        let baseline = *self.baseline_pnl.get_or_insert(total_pnl);
        self.session_pnl = total_pnl - baseline;
        if self.session_pnl <= -max_daily_loss {
            self.halted = true;
        }
    }

    pub fn session_pnl(&self) -> Decimal {
        self.session_pnl
    }

    /// Once tripped, stays tripped for the process lifetime.
    pub fn halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::OrderbookLevel;

    fn book(bid: Decimal, bid_sz: Decimal, ask: Decimal, ask_sz: Decimal) -> Orderbook {
        Orderbook::new(
            "tok",
            vec![OrderbookLevel::new(bid, bid_sz)],
            vec![OrderbookLevel::new(ask, ask_sz)],
            Utc::now(),
        )
    }

    fn maker() -> MakerConfig {
        MakerConfig::default()
    }

    fn tuning() -> MakerTuning {
        MakerTuning::default()
    }

    #[test]
    fn test_big_move_guard_cancels() {
        // S4: lastMid 0.50, new mid 0.54, move 8% > cancelThreshold 5%.
        let mut state = TokenState::new("tok");
        let now = Instant::now();
        state.observe(&book(dec!(0.49), dec!(100), dec!(0.51), dec!(100)), &tuning(), now);
        let rel_move = state.observe(
            &book(dec!(0.53), dec!(100), dec!(0.55), dec!(100)),
            &tuning(),
            now,
        );
        assert_eq!(rel_move, dec!(0.08));
        let trip = state.guard_trip(
            &book(dec!(0.53), dec!(100), dec!(0.55), dec!(100)),
            rel_move,
            &maker(),
            &tuning(),
            now,
        );
        // 8% also exceeds the volatility-pause band; the big-move guard is
        // what fires once the pause band is loosened.
        let mut cfg = maker();
        cfg.volatility_pause_bps = 10_000;
        let trip2 = state.guard_trip(
            &book(dec!(0.53), dec!(100), dec!(0.55), dec!(100)),
            rel_move,
            &cfg,
            &tuning(),
            now,
        );
        assert_eq!(trip, Some(GuardTrip::VolatilitySpike));
        assert_eq!(trip2, Some(GuardTrip::BigMove));
    }

    #[test]
    fn test_thin_liquidity_guard() {
        let state = TokenState::new("tok");
        let thin = book(dec!(0.49), dec!(5), dec!(0.51), dec!(5));
        let trip = state.guard_trip(&thin, Decimal::ZERO, &maker(), &tuning(), Instant::now());
        assert_eq!(trip, Some(GuardTrip::ThinLiquidity));

        let deep = book(dec!(0.49), dec!(100), dec!(0.51), dec!(100));
        let trip = state.guard_trip(&deep, Decimal::ZERO, &maker(), &tuning(), Instant::now());
        assert_eq!(trip, None);
    }

    #[test]
    fn test_order_actions_anti_fill_before_near_touch() {
        let mut state = TokenState::new("tok");
        let now = Instant::now();
        // Ask touch at 0.51. A bid at 0.5095 sits ~10bps away (anti-fill);
        // a bid at 0.5085 sits ~29bps away (near-touch band).
        state.open_orders = vec![
            OpenQuote {
                hash: "h1".into(),
                side: OrderSide::Buy,
                price: dec!(0.5095),
                shares: dec!(10),
                placed_at: now,
            },
            OpenQuote {
                hash: "h2".into(),
                side: OrderSide::Buy,
                price: dec!(0.5085),
                shares: dec!(10),
                placed_at: now,
            },
        ];
        let actions = state.order_actions(
            &book(dec!(0.49), dec!(100), dec!(0.51), dec!(100)),
            dec!(0.5095),
            dec!(0.52),
            &maker(),
            &tuning(),
            now,
        );
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&("h1".to_string(), OrderRisk::AntiFill)));
        assert!(actions.contains(&("h2".to_string(), OrderRisk::NearTouch)));
    }

    #[test]
    fn test_order_actions_refresh_and_reprice() {
        let mut state = TokenState::new("tok");
        let now = Instant::now();
        let old = now - Duration::from_millis(tuning().order_refresh_ms + 1_000);
        state.open_orders = vec![
            OpenQuote {
                hash: "stale".into(),
                side: OrderSide::Buy,
                price: dec!(0.40),
                shares: dec!(10),
                placed_at: old,
            },
            OpenQuote {
                hash: "drifted".into(),
                side: OrderSide::Sell,
                price: dec!(0.60),
                shares: dec!(10),
                placed_at: now,
            },
        ];
        // Sell target far from 0.60 -> reprice; bid far from both touches
        // but old -> refresh.
        let actions = state.order_actions(
            &book(dec!(0.49), dec!(100), dec!(0.51), dec!(100)),
            dec!(0.40),
            dec!(0.65),
            &maker(),
            &tuning(),
            now,
        );
        assert!(actions.contains(&("stale".to_string(), OrderRisk::Refresh)));
        assert!(actions.contains(&("drifted".to_string(), OrderRisk::Reprice)));
    }

    #[test]
    fn test_profile_hysteresis() {
        let mut state = TokenState::new("tok");
        let t = tuning();
        // Pump the vol EMA over the volatile band.
        state.vol_ema = dec!(0.02); // 200 bps
        state.depth_ema = t.depth_ref;
        state.update_profile(&t);
        assert_eq!(state.profile, QuoteProfile::Volatile);

        // A dip just below the band does not flip back.
        state.vol_ema = Decimal::from(t.volatile_vol_bps) / BPS * dec!(0.95);
        state.update_profile(&t);
        assert_eq!(state.profile, QuoteProfile::Volatile);

        // A deep dip does.
        state.vol_ema = Decimal::from(t.volatile_vol_bps) / BPS * dec!(0.5);
        state.update_profile(&t);
        assert_eq!(state.profile, QuoteProfile::Normal);
    }

    #[test]
    fn test_gates_block_then_reopen() {
        let mut state = TokenState::new("tok");
        let now = Instant::now();
        state.start_cooldown(&maker(), now);
        assert!(!state.gates_open(now));
        assert_eq!(state.phase, MakerPhase::Cooldown);

        let later = now + Duration::from_millis(maker().cooldown_after_cancel_ms + 100);
        assert!(state.gates_open(later));
        assert_eq!(state.phase, MakerPhase::Idle);
    }

    #[test]
    fn test_session_halt_latches() {
        let mut session = SessionState::new();
        session.update(dec!(0), dec!(100));
        assert!(!session.halted());

        session.update(dec!(-150), dec!(100));
        assert!(session.halted());
        assert_eq!(session.session_pnl(), dec!(-150));

        // Recovery does not clear the halt.
        session.update(dec!(50), dec!(100));
        assert!(session.halted());
    }

    #[test]
    fn test_open_on_side_counts() {
        let mut state = TokenState::new("tok");
        let now = Instant::now();
        state.open_orders = vec![OpenQuote {
            hash: "h1".into(),
            side: OrderSide::Buy,
            price: dec!(0.5),
            shares: dec!(10),
            placed_at: now,
        }];
        assert_eq!(state.open_on_side(OrderSide::Buy), 1);
        assert_eq!(state.open_on_side(OrderSide::Sell), 0);
        state.remove_orders(&["h1".to_string()]);
        assert!(state.open_orders.is_empty());
    }
}
