// config.rs — the engine's configuration surface.
//
// Every knob the core reads is a field here, with a `Default` plus an
// inline comment stating the effect (see `MmEngineConfig::default()` /
// `RiskConfig::default()`). Environment loading follows `main.rs`'s
// `std::env::var(...).unwrap_or(...)` idiom rather than a config crate,
// since the core only needs flat scalars.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission cap: max symbols with an active grid at once.
    pub symbols_allowed: usize,

    // ── Grid shape ──────────────────────────────────────────────────────
    pub levels: usize,
    pub strength: f64,
    pub outer_price_distance: f64,
    /// Price-move fraction (while flat) that triggers a grid reissue.
    pub reissue_threshold: f64,
    pub min_buffer_pct: f64,
    pub max_buffer_pct: f64,
    /// Force exactly `levels` orders even below the per-level notional floor.
    pub enforce_full_grid: bool,

    // ── Sizing / exposure ───────────────────────────────────────────────
    pub wallet_exposure_limit_long: f64,
    pub wallet_exposure_limit_short: f64,
    /// 0 ⇒ use exchange max leverage for that side.
    pub user_defined_leverage_long: f64,
    pub user_defined_leverage_short: f64,

    // ── Take profit ─────────────────────────────────────────────────────
    pub upnl_profit_pct: f64,
    pub max_upnl_profit_pct: f64,
    pub tp_refresh_interval_secs: u64,
    /// Candles fed into the Wilder ATR backing wall detection.
    pub atr_period: usize,
    /// Minimum book-level qty, as a multiple of ATR and of the top-5
    /// average level size, to qualify as a wall.
    pub wall_base_factor: f64,
    /// Max fractional distance from current price a wall may sit at to
    /// qualify for extension.
    pub wall_atr_proximity_pct: f64,
    /// Max fractional distance the extended target may sit beyond base.
    pub wall_max_deviation: f64,

    // ── Side enablement & entry gating ──────────────────────────────────
    pub long_mode: bool,
    pub short_mode: bool,
    pub volume_check: bool,
    pub min_vol: f64,
    pub min_dist: f64,
    pub entry_during_autoreduce: bool,
    pub min_order_spacing_secs: u64,

    // ── Auto-reduce ──────────────────────────────────────────────────────
    pub auto_reduce_start_pct: f64,
    /// Per-level price step for the simple (ladder) auto-reduce variant.
    /// Distinct from `reissue_threshold`, which governs grid reissuance.
    pub auto_reduce_step_pct: f64,
    pub upnl_auto_reduce_threshold_long: f64,
    pub upnl_auto_reduce_threshold_short: f64,
    pub max_pos_balance_pct: f64,
    pub auto_reduce_grid_hardened: bool,

    // ── Funding gate ─────────────────────────────────────────────────────
    pub max_abs_funding_rate: f64,

    // ── Scheduler timers ─────────────────────────────────────────────────
    pub tick_interval_secs: u64,
    pub position_inactive_threshold_secs: u64,
    pub no_entry_signal_threshold_secs: u64,
    pub order_inactive_threshold_secs: u64,
    pub health_check_interval_secs: u64,

    // ── Exchange retry budget ────────────────────────────────────────────
    pub retry_max_attempts: u32,
    pub retry_fixed_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols_allowed: 10,

            levels: 5,
            strength: 1.0,
            outer_price_distance: 0.02,
            reissue_threshold: 0.005,
            min_buffer_pct: 0.002,
            max_buffer_pct: 0.01,
            enforce_full_grid: false,

            wallet_exposure_limit_long: 0.1,
            wallet_exposure_limit_short: 0.1,
            user_defined_leverage_long: 0.0,
            user_defined_leverage_short: 0.0,

            upnl_profit_pct: 0.004,
            max_upnl_profit_pct: 0.02,
            tp_refresh_interval_secs: 3,
            atr_period: 14,
            wall_base_factor: 1.5,
            wall_atr_proximity_pct: 0.01,
            wall_max_deviation: 0.02,

            long_mode: true,
            short_mode: true,
            volume_check: false,
            min_vol: 0.0,
            min_dist: 0.0,
            entry_during_autoreduce: false,
            min_order_spacing_secs: 60,

            auto_reduce_start_pct: 0.02,
            auto_reduce_step_pct: 0.005,
            upnl_auto_reduce_threshold_long: 0.05,
            upnl_auto_reduce_threshold_short: 0.05,
            max_pos_balance_pct: 0.5,
            auto_reduce_grid_hardened: false,

            max_abs_funding_rate: 1.0,

            tick_interval_secs: 5,
            position_inactive_threshold_secs: 150,
            no_entry_signal_threshold_secs: 150,
            order_inactive_threshold_secs: 150,
            health_check_interval_secs: 300,

            retry_max_attempts: 100,
            retry_fixed_delay_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Overlays environment variables onto the defaults, matching the
    /// `std::env::var(KEY).ok().and_then(|v| v.parse().ok())` idiom
    /// field-by-field.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        macro_rules! env_f64 {
            ($key:literal, $field:ident) => {
                if let Ok(v) = std::env::var($key) {
                    if let Ok(parsed) = v.parse::<f64>() {
                        cfg.$field = parsed;
                    }
                }
            };
        }
        macro_rules! env_bool {
            ($key:literal, $field:ident) => {
                if let Ok(v) = std::env::var($key) {
                    cfg.$field = v == "1" || v == "true";
                }
            };
        }

        if let Ok(v) = std::env::var("SYMBOLS_ALLOWED") {
            if let Ok(parsed) = v.parse::<usize>() {
                cfg.symbols_allowed = parsed;
            }
        }
        env_f64!("WALLET_EXPOSURE_LIMIT_LONG", wallet_exposure_limit_long);
        env_f64!("WALLET_EXPOSURE_LIMIT_SHORT", wallet_exposure_limit_short);
        env_f64!("UPNL_PROFIT_PCT", upnl_profit_pct);
        env_f64!("AUTO_REDUCE_START_PCT", auto_reduce_start_pct);
        env_f64!("AUTO_REDUCE_STEP_PCT", auto_reduce_step_pct);
        env_bool!("LONG_MODE", long_mode);
        env_bool!("SHORT_MODE", short_mode);
        env_bool!("ENFORCE_FULL_GRID", enforce_full_grid);
        env_bool!("ENTRY_DURING_AUTOREDUCE", entry_during_autoreduce);

        cfg
    }
}

/// `HTTP_PROXY` / `HTTPS_PROXY`, read once and threaded into the (stubbed)
/// live exchange client builder.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self {
            http_proxy: std::env::var("HTTP_PROXY").ok(),
            https_proxy: std::env::var("HTTPS_PROXY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_scenario() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.levels, 5);
        assert_eq!(cfg.strength, 1.0);
        assert_eq!(cfg.outer_price_distance, 0.02);
        assert_eq!(cfg.min_buffer_pct, 0.002);
        assert_eq!(cfg.max_buffer_pct, 0.01);
    }

    #[test]
    fn retry_budget_defaults_to_hundred_attempts() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retry_max_attempts, 100);
    }
}
