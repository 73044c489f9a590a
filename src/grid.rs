// grid.rs — Grid Planner.
//
// Derives a per-symbol long/short ladder from current price, open position
// state, and grid shape knobs. Pure functions; the reconciler owns all I/O.
// Mirrors the `compute_quote_grid` layering pass in `market_maker.rs`,
// generalized from a fixed 3-tier ladder to an N-level power-law ladder
// with a re-derived non-crossing invariant.

use crate::config::EngineConfig;
use crate::types::GridPlan;

#[derive(Debug, Clone, Copy)]
pub struct SideState {
    pub qty: f64,
    pub entry_price: f64,
}

impl SideState {
    pub fn flat() -> Self {
        Self { qty: 0.0, entry_price: 0.0 }
    }

    pub fn is_open(&self) -> bool {
        self.qty > 0.0
    }
}

/// `buffer_side = min_buffer` while flat, else scaled by adverse distance
/// from entry — the dynamic buffer rule.
pub fn dynamic_buffer(cfg: &EngineConfig, price: f64, side: SideState) -> f64 {
    if !side.is_open() || side.entry_price <= 0.0 {
        return cfg.min_buffer_pct;
    }
    let drift = (price - side.entry_price).abs() / side.entry_price;
    cfg.min_buffer_pct + (cfg.max_buffer_pct - cfg.min_buffer_pct) * drift
}

fn factor_vector(levels: usize, strength: f64) -> Vec<f64> {
    if levels <= 1 {
        return vec![0.0; levels.max(1)];
    }
    (0..levels)
        .map(|i| (i as f64 / (levels - 1) as f64).powf(strength))
        .collect()
}

/// Computes both ladders for the given price/state, re-deriving
/// `outer_price_distance` if the raw levels would cross.
pub fn plan_grid(
    cfg: &EngineConfig,
    price: f64,
    long_state: SideState,
    short_state: SideState,
) -> GridPlan {
    let buffer_long = dynamic_buffer(cfg, price, long_state);
    let buffer_short = dynamic_buffer(cfg, price, short_state);

    let (levels_long, levels_short) =
        derive_ladders(price, buffer_long, buffer_short, cfg.outer_price_distance, cfg.levels, cfg.strength);

    GridPlan {
        levels_long,
        levels_short,
        amounts_long: Vec::new(),
        amounts_short: Vec::new(),
        buffer_long,
        buffer_short,
    }
}

fn derive_ladders(
    price: f64,
    buffer_long: f64,
    buffer_short: f64,
    outer_price_distance: f64,
    levels: usize,
    strength: f64,
) -> (Vec<f64>, Vec<f64>) {
    let factors = factor_vector(levels, strength);
    let (long, short) = ladder_at_distance(price, buffer_long, buffer_short, outer_price_distance, &factors);

    let max_long = long.iter().cloned().fold(f64::MIN, f64::max);
    let min_short = short.iter().cloned().fold(f64::MAX, f64::min);

    if max_long.is_finite() && min_short.is_finite() && max_long >= min_short {
        // Non-crossing invariant violated: re-derive outer_price_distance
        // from the offending pair and recompute both ladders from it.
        let last_long = long.last().copied().unwrap_or(price);
        let first_short = short.first().copied().unwrap_or(price);
        let new_distance = ((first_short - last_long) / (2.0 * price)).abs().max(1e-9);
        return ladder_at_distance(price, buffer_long, buffer_short, new_distance, &factors);
    }
    (long, short)
}

fn ladder_at_distance(
    price: f64,
    buffer_long: f64,
    buffer_short: f64,
    outer_price_distance: f64,
    factors: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    let outer_long = price * (1.0 - outer_price_distance);
    let outer_short = price * (1.0 + outer_price_distance);

    let long: Vec<f64> = factors
        .iter()
        .map(|f_i| price - buffer_long * price - (price - outer_long) * f_i)
        .collect();
    let short: Vec<f64> = factors
        .iter()
        .map(|f_i| price + buffer_short * price + (outer_short - price) * f_i)
        .collect();
    (long, short)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReissueDecision {
    /// Side is flat and price drifted past `reissue_threshold` since the
    /// last reissue anchor — replan from scratch.
    ThresholdReissue,
    /// Side is in position and price drifted past its buffer distance —
    /// replan with the updated buffer.
    BufferMovedReissue,
    NoAction,
}

/// Per-side reissue decision.
pub fn reissue_decision(
    cfg: &EngineConfig,
    price: f64,
    side: SideState,
    last_price_for_reissue: Option<f64>,
    buffer_distance: f64,
) -> ReissueDecision {
    if !side.is_open() {
        match last_price_for_reissue {
            None => ReissueDecision::ThresholdReissue,
            Some(anchor) if anchor > 0.0 => {
                let drift = (price - anchor).abs() / anchor;
                if drift >= cfg.reissue_threshold {
                    ReissueDecision::ThresholdReissue
                } else {
                    ReissueDecision::NoAction
                }
            }
            Some(_) => ReissueDecision::ThresholdReissue,
        }
    } else if side.entry_price > 0.0 && (price - side.entry_price).abs() > buffer_distance * side.entry_price {
        ReissueDecision::BufferMovedReissue
    } else {
        ReissueDecision::NoAction
    }
}
