// tp.rs — TP Controller.
//
// Maintains exactly one reduce-only limit order per open side, sized to
// `position.qty`. Mirrors the TP/SL check in `Position::is_tp_hit`
// (`execution.rs`/`exchange.rs`), generalized from a fixed target to
// quickscalp fixed/dynamic targets with order-book-wall assisted extension.

use log::info;

use crate::atr::{wilder_atr, Candle};
use crate::errors::EngineError;
use crate::exchange::{ExchangePort, OrderBook};
use crate::tags::is_auto_reduce_tag;
use crate::types::{OrderSide, Side};

#[derive(Debug, Clone, Copy)]
pub enum TpMode {
    QuickscalpFixed { p: f64 },
    QuickscalpDynamic { p_min: f64, p_max: f64 },
}

/// Base quickscalp target before wall-assisted extension or market clamp.
pub fn base_target(side: Side, entry_price: f64, mode: TpMode) -> f64 {
    let p = match mode {
        TpMode::QuickscalpFixed { p } => p,
        TpMode::QuickscalpDynamic { p_min, .. } => p_min,
    };
    match side {
        Side::Long => entry_price * (1.0 + p),
        Side::Short => entry_price * (1.0 - p),
    }
}

/// The far bound used for the post-only attempt under the dynamic variant.
pub fn far_bound(side: Side, entry_price: f64, mode: TpMode) -> f64 {
    match mode {
        TpMode::QuickscalpFixed { p } => base_target(side, entry_price, TpMode::QuickscalpFixed { p }),
        TpMode::QuickscalpDynamic { p_max, .. } => match side {
            Side::Long => entry_price * (1.0 + p_max),
            Side::Short => entry_price * (1.0 - p_max),
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WallParams {
    pub base_factor: f64,
    pub atr_proximity_pct: f64,
    pub max_deviation: f64,
}

/// Finds the nearest qualifying wall on the book side the TP rests on
/// (asks for a long TP, bids for a short TP), beyond `base_target` and
/// within `max_deviation` of it.
pub fn detect_wall(
    book: &OrderBook,
    side: Side,
    current_price: f64,
    candles: &[Candle],
    atr_period: usize,
    params: WallParams,
) -> Option<f64> {
    let atr = wilder_atr(candles, atr_period)?;
    let levels: &[crate::exchange::BookLevel] = match side {
        Side::Long => &book.asks,
        Side::Short => &book.bids,
    };
    if levels.is_empty() {
        return None;
    }
    let avg_top_n = levels.iter().take(5).map(|l| l.qty).sum::<f64>() / levels.len().min(5) as f64;
    let atr_floor = params.base_factor * atr;
    let size_floor = params.base_factor * avg_top_n;

    levels
        .iter()
        .filter(|l| l.qty > atr_floor && l.qty > size_floor)
        .filter(|l| (l.price - current_price).abs() / current_price <= params.atr_proximity_pct)
        .map(|l| l.price)
        .find(|&p| (p - current_price).abs() / current_price <= params.max_deviation)
}

/// Applies wall-assisted extension and the crossed-market clamp to the
/// base target, returning the final TP price and whether it must be
/// placed as a crossable (non-post-only) limit.
pub fn resolve_target(
    side: Side,
    base: f64,
    wall: Option<f64>,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
) -> (f64, bool) {
    let extended = match (wall, side) {
        (Some(w), Side::Long) if w > base => w * 0.999,
        (Some(w), Side::Short) if w < base => w * 1.001,
        _ => base,
    };

    match side {
        Side::Long => match best_bid {
            Some(bid) if bid >= extended => (bid, true),
            _ => (extended, false),
        },
        Side::Short => match best_ask {
            Some(ask) if ask <= extended => (ask, true),
            _ => (extended, false),
        },
    }
}

/// Ensures exactly one live reduce-only order of `qty` exists for `side`,
/// cancelling any mismatched TP that is NOT auto-reduce tagged first.
/// Returns `true` if a new order was placed.
pub async fn reconcile_tp(
    exchange: &dyn ExchangePort,
    symbol: &str,
    side: Side,
    qty: f64,
    target_price: f64,
    crossable: bool,
) -> Result<bool, EngineError> {
    if qty <= 0.0 {
        return Ok(false);
    }
    let order_side = match side {
        Side::Long => OrderSide::Sell,
        Side::Short => OrderSide::Buy,
    };
    let (longs, shorts) = exchange.open_tp_orders(symbol).await?;
    let existing = match side {
        Side::Long => longs,
        Side::Short => shorts,
    };

    let mismatched: Vec<&crate::types::Order> = existing
        .iter()
        .filter(|o| (o.qty - qty).abs() > 1e-9 || (o.price - target_price).abs() > 1e-9)
        .filter(|o| o.link_id.as_deref().map(|t| !is_auto_reduce_tag(t)).unwrap_or(true))
        .collect();

    if mismatched.is_empty() && !existing.is_empty() {
        return Ok(false);
    }

    for order in mismatched {
        exchange.cancel_order(symbol, &order.id).await?;
        info!("[TP] {symbol} {:?}: cancelled mismatched TP {}", side, order.id);
    }

    let link_id = crate::tags::grid_link_id(symbol, side, target_price, 0);
    let id = if crossable {
        exchange
            .create_normal_limit(symbol, order_side, qty, target_price, side.position_idx(), &link_id)
            .await?
    } else {
        exchange
            .create_reduce_only_limit(symbol, order_side, qty, target_price, side.position_idx(), true, &link_id)
            .await?
    };
    info!("[TP] {symbol} {:?}: placed {id} qty={qty} @ {target_price} crossable={crossable}", side);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_target_matches_quickscalp_formula() {
        assert_eq!(base_target(Side::Long, 100.0, TpMode::QuickscalpFixed { p: 0.01 }), 101.0);
        assert_eq!(base_target(Side::Short, 100.0, TpMode::QuickscalpFixed { p: 0.01 }), 99.0);
    }

    #[test]
    fn clamp_to_crossed_market() {
        let (price, crossable) = resolve_target(Side::Long, 101.0, None, Some(102.0), Some(102.5));
        assert_eq!(price, 102.0);
        assert!(crossable);
    }

    #[test]
    fn uncrossed_market_stays_post_only() {
        let (price, crossable) = resolve_target(Side::Long, 101.0, None, Some(100.5), Some(100.7));
        assert_eq!(price, 101.0);
        assert!(!crossable);
    }

    #[tokio::test]
    async fn places_tp_matching_position_qty() {
        use crate::exchange::SimExchange;
        use crate::types::Precision;
        let ex = SimExchange::new(10_000.0, Precision { price_tick: 0.1, qty_step: 0.001, min_qty: 0.001 });
        let placed = reconcile_tp(&ex, "BTCUSDT", Side::Long, 0.02, 51_000.0, false).await.unwrap();
        assert!(placed);
        let orders = ex.orders_snapshot("BTCUSDT").await;
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].qty, 0.02);
    }

    #[tokio::test]
    async fn does_not_replace_matching_tp() {
        use crate::exchange::SimExchange;
        use crate::types::Precision;
        let ex = SimExchange::new(10_000.0, Precision { price_tick: 0.1, qty_step: 0.001, min_qty: 0.001 });
        reconcile_tp(&ex, "BTCUSDT", Side::Long, 0.02, 51_000.0, false).await.unwrap();
        let placed_again = reconcile_tp(&ex, "BTCUSDT", Side::Long, 0.02, 51_000.0, false).await.unwrap();
        assert!(!placed_again);
        assert_eq!(ex.orders_snapshot("BTCUSDT").await.len(), 1);
    }
}
