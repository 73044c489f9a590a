// types.rs — core data model shared by every component.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::atr::Candle;

/// Rolling candle window kept per symbol to back ATR-based wall detection;
/// old enough candles fall off the front as new ones arrive.
const RECENT_CANDLE_CAPACITY: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn position_idx(self) -> u8 {
        match self {
            Side::Long => 1,
            Side::Short => 2,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

/// Minimum price increment, quantity step, and minimum order quantity for a
/// symbol. Fetched once from the exchange and cached process-wide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Precision {
    pub price_tick: f64,
    pub qty_step: f64,
    pub min_qty: f64,
}

impl Precision {
    pub fn round_price(&self, price: f64) -> f64 {
        round_to_step(price, self.price_tick)
    }

    pub fn round_qty(&self, qty: f64) -> f64 {
        round_to_step(qty, self.qty_step)
    }
}

pub fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

/// A single leg (long or short) of a hedge-mode position.
///
/// Invariant: if `qty == 0.0`, `entry_price` is undefined and MUST NOT be
/// used to drive grid or TP math — callers check `qty > 0.0` first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub liq_price: Option<f64>,
}

impl Position {
    pub fn flat(side: Side) -> Self {
        Self {
            side,
            qty: 0.0,
            entry_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            liq_price: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.qty > 0.0
    }
}

/// Both legs of a hedge-mode symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionPair {
    pub long: Position,
    pub short: Position,
}

impl PositionPair {
    pub fn flat() -> Self {
        Self {
            long: Position::flat(Side::Long),
            short: Position::flat(Side::Short),
        }
    }

    pub fn side(&self, side: Side) -> &Position {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}

/// Live view of a resting order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub qty: f64,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub position_idx: u8,
    pub link_id: Option<String>,
}

impl Order {
    pub fn is_live(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::Partial)
    }
}

/// Equity/balance snapshot the Sizing Engine reads `total_equity` from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub available_balance: f64,
}

/// Planned long/short ladders for one symbol, plus the dynamic buffers
/// used to derive them.
///
/// Invariant: `max(levels_long) < min(levels_short)` — enforced by the
/// Grid Planner by re-deriving `outer_price_distance` whenever it would be
/// violated.
#[derive(Debug, Clone, Default)]
pub struct GridPlan {
    pub levels_long: Vec<f64>,
    pub levels_short: Vec<f64>,
    pub amounts_long: Vec<f64>,
    pub amounts_short: Vec<f64>,
    pub buffer_long: f64,
    pub buffer_short: f64,
}

impl GridPlan {
    pub fn is_non_crossing(&self) -> bool {
        let max_long = self.levels_long.iter().cloned().fold(f64::MIN, f64::max);
        let min_short = self.levels_short.iter().cloned().fold(f64::MAX, f64::min);
        !(max_long.is_finite() && min_short.is_finite()) || max_long < min_short
    }
}

/// Per-symbol, per-process state the worker owns exclusively for the
/// duration of one tick.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub filled_levels_buy: HashSet<OrderedPrice>,
    pub filled_levels_sell: HashSet<OrderedPrice>,
    pub active_grids_long: bool,
    pub active_grids_short: bool,
    pub last_price_for_reissue_long: Option<f64>,
    pub last_price_for_reissue_short: Option<f64>,
    pub last_tp_update_long: Option<Instant>,
    pub last_tp_update_short: Option<Instant>,
    pub recent_candles: Vec<Candle>,
    pub auto_reduce_active_long: bool,
    pub auto_reduce_active_short: bool,
    pub last_active_long_order_time: Option<Instant>,
    pub last_active_short_order_time: Option<Instant>,
    pub position_closed_time: Option<Instant>,
    pub last_entry_signal_time: Option<Instant>,
    pub order_ids: Vec<String>,
}

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            filled_levels_buy: HashSet::new(),
            filled_levels_sell: HashSet::new(),
            active_grids_long: false,
            active_grids_short: false,
            last_price_for_reissue_long: None,
            last_price_for_reissue_short: None,
            last_tp_update_long: None,
            last_tp_update_short: None,
            recent_candles: Vec::new(),
            auto_reduce_active_long: false,
            auto_reduce_active_short: false,
            last_active_long_order_time: None,
            last_active_short_order_time: None,
            position_closed_time: None,
            last_entry_signal_time: None,
            order_ids: Vec::new(),
        }
    }
}

impl SymbolState {
    pub fn active_grids(&self, side: Side) -> bool {
        match side {
            Side::Long => self.active_grids_long,
            Side::Short => self.active_grids_short,
        }
    }

    pub fn set_active_grids(&mut self, side: Side, active: bool) {
        match side {
            Side::Long => self.active_grids_long = active,
            Side::Short => self.active_grids_short = active,
        }
    }

    pub fn filled_levels(&self, order_side: OrderSide) -> &HashSet<OrderedPrice> {
        match order_side {
            OrderSide::Buy => &self.filled_levels_buy,
            OrderSide::Sell => &self.filled_levels_sell,
        }
    }

    pub fn filled_levels_mut(&mut self, order_side: OrderSide) -> &mut HashSet<OrderedPrice> {
        match order_side {
            OrderSide::Buy => &mut self.filled_levels_buy,
            OrderSide::Sell => &mut self.filled_levels_sell,
        }
    }

    /// Appends one tick's candle, dropping the oldest once the window is full.
    pub fn record_candle(&mut self, candle: Candle) {
        self.recent_candles.push(candle);
        if self.recent_candles.len() > RECENT_CANDLE_CAPACITY {
            self.recent_candles.remove(0);
        }
    }
}

/// Wraps an `f64` price so it can live in a `HashSet`. Prices are always
/// rounded to a tick before being stored, so bit-exact comparison is safe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedPrice(pub f64);

impl PartialEq for OrderedPrice {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedPrice {}
impl std::hash::Hash for OrderedPrice {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}
