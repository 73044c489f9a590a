// sizing.rs — Sizing Engine.
//
// Maps (equity, exposure limit, leverage, precision, min-notional) to a
// per-side grid total and per-level amounts. Pure functions throughout —
// mirrors the `compute_quote_grid` sizing pass in `market_maker.rs`,
// generalized from a 3-tier quote ladder to an N-level power-law ladder.

use crate::types::Precision;

/// Exchange minimum-order-value floor with a small safety margin, keyed by
/// symbol prefix.
pub fn min_notional_floor(symbol: &str) -> f64 {
    if symbol.starts_with("BTC") {
        100.5
    } else if symbol.starts_with("ETH") {
        20.1
    } else {
        6.0
    }
}

#[derive(Debug, Clone)]
pub struct SizingInput {
    pub total_equity: f64,
    pub price: f64,
    pub exposure_limit: f64,
    /// 0.0 means "use exchange max leverage".
    pub leverage: f64,
    pub exchange_max_leverage: f64,
    pub precision: Precision,
    pub levels: usize,
    pub strength: f64,
    pub enforce_full_grid: bool,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct SizingPlan {
    pub total_notional: f64,
    pub amounts: Vec<f64>,
}

/// Per-level floor grows linearly with level index (deeper levels need more
/// notional room to clear the exchange minimum once summed against the
/// shallower levels already deployed).
fn per_level_floor(base_floor: f64, level_index: usize) -> f64 {
    base_floor * (1.0 + level_index as f64)
}

/// Per-side max notional, floor, total notional, power-law ratio, residual
/// redistribution — in that order.
pub fn plan_side(input: &SizingInput) -> SizingPlan {
    let levels = input.levels.max(1);
    let effective_leverage = if input.leverage > 0.0 {
        input.leverage
    } else {
        input.exchange_max_leverage
    };

    // 1. Per-side max notional.
    let max_notional = input.total_equity * input.exposure_limit * effective_leverage;

    // 2. Per-level minimum notional floor, linear in level index.
    let base_floor = min_notional_floor(&input.symbol);
    let floors: Vec<f64> = (0..levels).map(|i| per_level_floor(base_floor, i)).collect();
    let floor_sum: f64 = floors.iter().sum();

    // 3. Total notional to deploy: with enforce_full_grid, cover every
    // level's floor even if that exceeds the exposure-derived cap;
    // otherwise stay within max_notional.
    let total_notional = if input.enforce_full_grid {
        max_notional.max(floor_sum)
    } else {
        max_notional
    };

    // 4. Power-law per-level ratio and rounded amount.
    let weight_sum: f64 = (0..levels).map(|i| ((i + 1) as f64).powf(input.strength)).sum();
    let mut amounts: Vec<f64> = (0..levels)
        .map(|i| {
            let ratio = ((i + 1) as f64).powf(input.strength) / weight_sum;
            let raw_qty = ratio * total_notional / input.price;
            let rounded = input.precision.round_qty(raw_qty);
            let min_qty_for_level = (floors[i] / input.price).max(input.precision.min_qty);
            rounded.max(input.precision.round_qty(min_qty_for_level))
        })
        .collect();

    // 5. Residual redistribution, smallest-level-first, in qty_step increments.
    if input.enforce_full_grid {
        let deployed_notional: f64 = amounts.iter().map(|a| a * input.price).sum();
        let mut residual_notional = total_notional - deployed_notional;
        if residual_notional > 0.0 {
            let step_notional = input.precision.qty_step * input.price;
            if step_notional > 0.0 {
                let mut order: Vec<usize> = (0..levels).collect();
                order.sort_by(|&a, &b| amounts[a].partial_cmp(&amounts[b]).unwrap());
                let mut idx = 0;
                while residual_notional >= step_notional && idx < order.len() * 1_000_000 {
                    let level = order[idx % order.len()];
                    amounts[level] += input.precision.qty_step;
                    residual_notional -= step_notional;
                    idx += 1;
                }
            }
        }
    }

    SizingPlan { total_notional, amounts }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn precision() -> Precision {
        Precision { price_tick: 0.1, qty_step: 0.001, min_qty: 0.001 }
    }

    // equity=10000, BTC, price=50000, levels=5, strength=1.0, exposure=0.1,
    // leverage=10 → total notional ≈ 10000.
    #[test]
    fn scenario_one_total_notional_matches_reference() {
        let input = SizingInput {
            total_equity: 10_000.0,
            price: 50_000.0,
            exposure_limit: 0.1,
            leverage: 10.0,
            exchange_max_leverage: 20.0,
            precision: precision(),
            levels: 5,
            strength: 1.0,
            enforce_full_grid: false,
            symbol: "BTCUSDT".to_string(),
        };
        let plan = plan_side(&input);
        assert!((plan.total_notional - 10_000.0).abs() < 1e-6);
        assert_eq!(plan.amounts.len(), 5);
    }

    #[test]
    fn deeper_levels_get_more_weight_under_power_law() {
        let input = SizingInput {
            total_equity: 10_000.0,
            price: 50_000.0,
            exposure_limit: 0.1,
            leverage: 10.0,
            exchange_max_leverage: 20.0,
            precision: precision(),
            levels: 5,
            strength: 1.0,
            enforce_full_grid: false,
            symbol: "BTCUSDT".to_string(),
        };
        let plan = plan_side(&input);
        assert!(plan.amounts[4] >= plan.amounts[0]);
    }

    #[test]
    fn zero_leverage_falls_back_to_exchange_max() {
        let input = SizingInput {
            total_equity: 10_000.0,
            price: 50_000.0,
            exposure_limit: 0.1,
            leverage: 0.0,
            exchange_max_leverage: 20.0,
            precision: precision(),
            levels: 3,
            strength: 1.0,
            enforce_full_grid: false,
            symbol: "ETHUSDT".to_string(),
        };
        let plan = plan_side(&input);
        assert!((plan.total_notional - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn min_notional_floor_matches_reference_table() {
        assert_eq!(min_notional_floor("BTCUSDT"), 100.5);
        assert_eq!(min_notional_floor("ETHUSDT"), 20.1);
        assert_eq!(min_notional_floor("SOLUSDT"), 6.0);
    }
}
