// reconciler.rs — Order Reconciler.
//
// Brings live orders into agreement with a GridPlan with minimum churn:
// diff against open orders, cancel what must clear, place what's missing,
// never issue the same (price, side, reduce flag) twice in one tick.
// Mirrors the reconcile pass in `execution.rs` (cancel-stale,
// diff-against-plan, place-missing), generalized to hedge-mode ladders.

use log::info;

use crate::concurrency::OrderRateGate;
use crate::errors::EngineError;
use crate::exchange::ExchangePort;
use crate::signals::{should_enter, volume_ok, Signal};
use crate::tags::grid_link_id;
use crate::types::{Order, OrderSide, OrderedPrice, Side, SymbolState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    PositionWentFlat,
    TerminationFired,
}

/// Per-side inputs the reconciler needs for one tick.
pub struct SideTick<'a> {
    pub side: Side,
    pub levels: &'a [f64],
    pub amounts: &'a [f64],
    pub price_tick: f64,
    pub min_order_spacing: std::time::Duration,
    pub signal: Signal,
    pub volume_check: bool,
    pub min_vol: f64,
    pub min_dist: f64,
    pub auto_reduce_active: bool,
    pub entry_during_autoreduce: bool,
    pub clear: Option<ClearReason>,
    pub ts_millis: u64,
}

fn order_side_for(side: Side) -> OrderSide {
    match side {
        Side::Long => OrderSide::Buy,
        Side::Short => OrderSide::Sell,
    }
}

fn rounded(price: f64, tick: f64) -> OrderedPrice {
    OrderedPrice(if tick > 0.0 { (price / tick).round() * tick } else { price })
}

/// Entry gate: signal + (auto-reduce not active OR entry
/// during auto-reduce permitted) + (no volume floor OR volume floor met) +
/// per-symbol order-rate gate.
async fn entry_allowed(
    gate: &OrderRateGate,
    symbol: &str,
    tick: &SideTick<'_>,
) -> bool {
    if !should_enter(&tick.signal, tick.side) {
        return false;
    }
    if tick.volume_check && !volume_ok(&tick.signal, tick.min_vol, tick.min_dist) {
        return false;
    }
    if tick.auto_reduce_active && !tick.entry_during_autoreduce {
        return false;
    }
    gate.can_place_order(symbol, tick.min_order_spacing).await
}

/// Runs one side's reconcile step against the live exchange. Returns the
/// number of orders placed.
pub async fn reconcile_side(
    exchange: &dyn ExchangePort,
    gate: &OrderRateGate,
    symbol: &str,
    state: &mut SymbolState,
    tick: SideTick<'_>,
) -> Result<u64, EngineError> {
    let order_side = order_side_for(tick.side);
    let open_orders = exchange.open_orders(symbol).await?;
    let entries: Vec<&Order> = open_orders
        .iter()
        .filter(|o| !o.reduce_only && o.side == order_side && o.is_live())
        .collect();

    if let Some(reason) = tick.clear {
        info!("[RECONCILE] {symbol} {:?}: clearing entries ({:?})", tick.side, reason);
        exchange.cancel_all_entries(symbol).await?;
        state.filled_levels_mut(order_side).clear();
        state.set_active_grids(tick.side, false);
        return Ok(0);
    }

    if !entry_allowed(gate, symbol, &tick).await {
        return Ok(0);
    }

    let live_prices: std::collections::HashSet<OrderedPrice> =
        entries.iter().map(|o| rounded(o.price, tick.price_tick)).collect();

    let mut placed = 0u64;
    let mut issued_this_tick = std::collections::HashSet::new();

    for (level, (&price, &amount)) in tick.levels.iter().zip(tick.amounts.iter()).enumerate() {
        let key = rounded(price, tick.price_tick);
        if live_prices.contains(&key) || issued_this_tick.contains(&key) {
            continue;
        }
        if state.filled_levels(order_side).contains(&key) {
            continue;
        }

        let link_id = grid_link_id(symbol, tick.side, key.0, tick.ts_millis + level as u64);
        let id = exchange
            .create_normal_limit(symbol, order_side, amount, key.0, tick.side.position_idx(), &link_id)
            .await?;
        info!("[RECONCILE] {symbol} {:?} level {level}: placed {id} @ {}", tick.side, key.0);

        state.filled_levels_mut(order_side).insert(key);
        issued_this_tick.insert(key);
        gate.record_placed(symbol).await;
        placed += 1;
    }

    if placed > 0 {
        state.set_active_grids(tick.side, true);
    }
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::signals::SignalTag;
    use crate::types::Precision;

    fn precision() -> Precision {
        Precision { price_tick: 0.5, qty_step: 0.001, min_qty: 0.001 }
    }

    fn signal_for(side: Side) -> Signal {
        let tag = if side == Side::Long { SignalTag::Long } else { SignalTag::Short };
        Signal { mfi_signal: tag, trend: SignalTag::Neutral, ..Signal::neutral() }
    }

    fn base_tick<'a>(side: Side, levels: &'a [f64], amounts: &'a [f64]) -> SideTick<'a> {
        SideTick {
            side,
            levels,
            amounts,
            price_tick: 0.5,
            min_order_spacing: std::time::Duration::from_secs(60),
            signal: signal_for(side),
            volume_check: false,
            min_vol: 0.0,
            min_dist: 0.0,
            auto_reduce_active: false,
            entry_during_autoreduce: false,
            clear: None,
            ts_millis: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn places_one_order_per_missing_level() {
        let ex = SimExchange::new(10_000.0, precision());
        ex.set_book("BTCUSDT", 49_900.0, 50_100.0).await;
        let gate = OrderRateGate::new();
        let mut state = SymbolState::default();
        let levels = [49_900.0, 49_800.0, 49_700.0];
        let amounts = [0.01, 0.02, 0.03];
        let tick = base_tick(Side::Long, &levels, &amounts);

        let placed = reconcile_side(&ex, &gate, "BTCUSDT", &mut state, tick).await.unwrap();
        assert_eq!(placed, 3);
        assert_eq!(ex.orders_snapshot("BTCUSDT").await.len(), 3);
    }

    #[tokio::test]
    async fn does_not_duplicate_already_filled_level() {
        let ex = SimExchange::new(10_000.0, precision());
        ex.set_book("BTCUSDT", 49_900.0, 50_100.0).await;
        let gate = OrderRateGate::new();
        let mut state = SymbolState::default();
        let levels = [49_900.0];
        let amounts = [0.01];

        reconcile_side(&ex, &gate, "BTCUSDT", &mut state, base_tick(Side::Long, &levels, &amounts))
            .await
            .unwrap();
        let placed_again =
            reconcile_side(&ex, &gate, "BTCUSDT", &mut state, base_tick(Side::Long, &levels, &amounts))
                .await
                .unwrap();
        assert_eq!(placed_again, 0);
        assert_eq!(ex.orders_snapshot("BTCUSDT").await.len(), 1);
    }

    #[tokio::test]
    async fn neutral_signal_blocks_entries() {
        let ex = SimExchange::new(10_000.0, precision());
        ex.set_book("BTCUSDT", 49_900.0, 50_100.0).await;
        let gate = OrderRateGate::new();
        let mut state = SymbolState::default();
        let levels = [49_900.0];
        let amounts = [0.01];
        let mut tick = base_tick(Side::Long, &levels, &amounts);
        tick.signal = Signal::neutral();

        let placed = reconcile_side(&ex, &gate, "BTCUSDT", &mut state, tick).await.unwrap();
        assert_eq!(placed, 0);
    }

    #[tokio::test]
    async fn clear_reason_cancels_all_entries() {
        let ex = SimExchange::new(10_000.0, precision());
        ex.set_book("BTCUSDT", 49_900.0, 50_100.0).await;
        let gate = OrderRateGate::new();
        let mut state = SymbolState::default();
        let levels = [49_900.0];
        let amounts = [0.01];

        reconcile_side(&ex, &gate, "BTCUSDT", &mut state, base_tick(Side::Long, &levels, &amounts))
            .await
            .unwrap();
        assert_eq!(ex.orders_snapshot("BTCUSDT").await.len(), 1);

        let mut clearing = base_tick(Side::Long, &levels, &amounts);
        clearing.clear = Some(ClearReason::PositionWentFlat);
        reconcile_side(&ex, &gate, "BTCUSDT", &mut state, clearing).await.unwrap();
        assert_eq!(ex.orders_snapshot("BTCUSDT").await.len(), 0);
        assert!(state.filled_levels(OrderSide::Buy).is_empty());
    }
}
