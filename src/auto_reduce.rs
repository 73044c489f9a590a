// auto_reduce.rs — Auto-Reduce Controller.
//
// Two execution shapes sharing one trigger rule. Mirrors the drawdown-driven
// "Soft Exit" inventory skew in `market_maker.rs`, generalized from a
// spread-shift to explicit reduce-only order placement.

use log::warn;

use crate::errors::EngineError;
use crate::exchange::{ExchangePort, OrderBook};
use crate::tags::auto_reduce_link_id;
use crate::types::{OrderSide, Side};

#[derive(Debug, Clone, Copy)]
pub struct TriggerInputs {
    pub equity: f64,
    pub side_position_value: f64,
    pub unrealized_pnl: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub upnl_threshold_pct: f64,
    pub max_pos_balance_pct: f64,
    pub auto_reduce_start_pct: f64,
}

/// Shared trigger rule: (a) uPnL drawdown exceeds threshold, AND
/// (b) side's position value exceeds the balance cap, AND (c) price has
/// moved beyond `auto_reduce_start_pct` adverse to entry.
pub fn should_trigger(side: Side, inputs: TriggerInputs) -> bool {
    if inputs.equity <= 0.0 || inputs.entry_price <= 0.0 {
        return false;
    }
    let drawdown_pct = (-inputs.unrealized_pnl / inputs.equity).max(0.0);
    let a = drawdown_pct > inputs.upnl_threshold_pct;
    let b = (inputs.side_position_value / inputs.equity) > inputs.max_pos_balance_pct;
    let adverse_move = match side {
        Side::Long => inputs.entry_price - inputs.current_price,
        Side::Short => inputs.current_price - inputs.entry_price,
    };
    let c = (adverse_move / inputs.entry_price) > inputs.auto_reduce_start_pct;
    a && b && c
}

fn reduce_order_side(side: Side) -> OrderSide {
    match side {
        Side::Long => OrderSide::Sell,
        Side::Short => OrderSide::Buy,
    }
}

/// Simple variant: a ladder of reduce-only tagged orders strictly in the
/// adverse direction from `current_price`, stepped by `step_pct`, each
/// sized at `max(dynamic_amount, min_qty)`.
pub async fn run_simple(
    exchange: &dyn ExchangePort,
    symbol: &str,
    side: Side,
    current_price: f64,
    qty_remaining: f64,
    levels: usize,
    step_pct: f64,
    min_qty: f64,
    price_tick: f64,
) -> Result<Vec<String>, EngineError> {
    let mut placed = Vec::new();
    if levels == 0 || qty_remaining <= 0.0 {
        return Ok(placed);
    }
    let per_level_qty = (qty_remaining / levels as f64).max(min_qty);
    let order_side = reduce_order_side(side);

    for level in 0..levels {
        let adverse_steps = (level + 1) as f64;
        let price = match side {
            Side::Long => current_price * (1.0 + step_pct * adverse_steps),
            Side::Short => current_price * (1.0 - step_pct * adverse_steps),
        };
        let price = if price_tick > 0.0 { (price / price_tick).round() * price_tick } else { price };

        let link_id = auto_reduce_link_id(side, symbol, price, level);
        let id = exchange
            .create_reduce_only_limit(symbol, order_side, per_level_qty, price, side.position_idx(), false, &link_id)
            .await?;
        warn!("[AUTO-REDUCE] {symbol} {:?} simple level {level}: placed {id} @ {price}", side);
        placed.push(id);
    }
    Ok(placed)
}

/// Grid-hardened variant: a single reduce-only order at the best available
/// price on the closing side, post-only, quantity rounded to qty_step.
pub async fn run_grid_hardened(
    exchange: &dyn ExchangePort,
    symbol: &str,
    side: Side,
    book: &OrderBook,
    qty_remaining: f64,
    qty_step: f64,
) -> Result<Option<String>, EngineError> {
    if qty_remaining <= 0.0 {
        return Ok(None);
    }
    let order_side = reduce_order_side(side);
    let best_price = match side {
        Side::Long => book.best_bid(),
        Side::Short => book.best_ask(),
    };
    let Some(price) = best_price else { return Ok(None) };

    let qty = if qty_step > 0.0 { (qty_remaining / qty_step).round() * qty_step } else { qty_remaining };
    let link_id = auto_reduce_link_id(side, symbol, price, 0);
    let id = exchange
        .create_reduce_only_limit(symbol, order_side, qty, price, side.position_idx(), true, &link_id)
        .await?;
    warn!("[AUTO-REDUCE] {symbol} {:?} grid-hardened: placed {id} @ {price}", side);
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::tags::is_auto_reduce_tag;
    use crate::types::Precision;

    fn triggering_inputs(side: Side) -> TriggerInputs {
        let (entry, current) = match side {
            Side::Long => (50_000.0, 47_000.0),
            Side::Short => (50_000.0, 53_000.0),
        };
        TriggerInputs {
            equity: 10_000.0,
            side_position_value: 6_000.0,
            unrealized_pnl: -600.0,
            entry_price: entry,
            current_price: current,
            upnl_threshold_pct: 0.05,
            max_pos_balance_pct: 0.5,
            auto_reduce_start_pct: 0.02,
        }
    }

    #[test]
    fn trigger_fires_when_all_three_conditions_hold() {
        assert!(should_trigger(Side::Long, triggering_inputs(Side::Long)));
        assert!(should_trigger(Side::Short, triggering_inputs(Side::Short)));
    }

    #[test]
    fn trigger_does_not_fire_without_adverse_move() {
        let mut inputs = triggering_inputs(Side::Long);
        inputs.current_price = 50_100.0; // favorable, not adverse
        assert!(!should_trigger(Side::Long, inputs));
    }

    #[tokio::test]
    async fn simple_ladder_sits_on_adverse_side_of_market() {
        let ex = SimExchange::new(10_000.0, Precision { price_tick: 0.5, qty_step: 0.001, min_qty: 0.001 });
        let ids = run_simple(&ex, "BTCUSDT", Side::Long, 47_000.0, 0.06, 3, 0.005, 0.001, 0.5)
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        let orders = ex.orders_snapshot("BTCUSDT").await;
        for o in &orders {
            assert!(o.price > 47_000.0);
            assert!(o.reduce_only);
            assert!(is_auto_reduce_tag(o.link_id.as_deref().unwrap()));
        }
    }

    #[tokio::test]
    async fn grid_hardened_uses_best_bid_for_long() {
        let ex = SimExchange::new(10_000.0, Precision { price_tick: 0.5, qty_step: 0.001, min_qty: 0.001 });
        ex.set_book("BTCUSDT", 47_000.0, 47_010.0).await;
        let book = crate::exchange::ExchangePort::orderbook(&ex, "BTCUSDT").await.unwrap();
        let id = run_grid_hardened(&ex, "BTCUSDT", Side::Long, &book, 0.05, 0.001)
            .await
            .unwrap();
        assert!(id.is_some());
        let orders = ex.orders_snapshot("BTCUSDT").await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].price, 47_000.0);
    }
}
