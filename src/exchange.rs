// exchange.rs — Exchange Port: the typed façade the core calls.
//
// Out of scope: the exchange REST/WebSocket adapter itself is kept only as
// the typed surface the core calls against; this module owns
// the trait contract, the retry wrapper every caller shares, and an
// in-memory `SimExchange` used by tests — mirrors the
// `ExchangeClient`/`SimExchange` split this crate's exchange layer started from.

use std::collections::HashMap;

use async_trait::async_trait;
use log::warn;
use rand::Rng;

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::types::{AccountSnapshot, Order, OrderSide, PositionPair, Precision, Side};

#[derive(Debug, Clone, Copy)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TpCounts {
    pub long_tp: usize,
    pub short_tp: usize,
}

/// The typed surface the trade-management core calls against. One generic
/// exchange abstraction; implementations map `symbol` onto whatever asset
/// identifier the venue uses.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    async fn orderbook(&self, symbol: &str) -> Result<OrderBook, EngineError>;
    async fn current_price(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn positions(&self, symbol: &str) -> Result<PositionPair, EngineError>;
    /// All open positions across every symbol — feeds the shared positions cache.
    async fn all_positions(&self) -> Result<HashMap<String, PositionPair>, EngineError>;
    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, EngineError>;
    async fn open_tp_orders(&self, symbol: &str) -> Result<(Vec<Order>, Vec<Order>), EngineError>;
    async fn open_tp_counts(&self, symbol: &str) -> Result<TpCounts, EngineError>;
    async fn balance(&self) -> Result<AccountSnapshot, EngineError>;

    async fn create_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
        position_idx: u8,
        post_only: bool,
        reduce_only: bool,
        link_id: &str,
    ) -> Result<String, EngineError>;

    async fn create_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
        position_idx: u8,
        post_only: bool,
        link_id: &str,
    ) -> Result<String, EngineError> {
        self.create_limit(symbol, side, qty, price, position_idx, post_only, true, link_id)
            .await
    }

    async fn create_normal_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
        position_idx: u8,
        link_id: &str,
    ) -> Result<String, EngineError> {
        self.create_limit(symbol, side, qty, price, position_idx, false, false, link_id)
            .await
    }

    async fn cancel_order(&self, symbol: &str, id: &str) -> Result<(), EngineError>;
    async fn cancel_all(&self, symbol: &str) -> Result<u64, EngineError>;
    async fn cancel_all_entries(&self, symbol: &str) -> Result<u64, EngineError>;
    async fn cancel_all_reduce_only(&self, symbol: &str) -> Result<u64, EngineError>;

    async fn precision(&self, symbol: &str) -> Result<Precision, EngineError>;
    async fn max_leverage(&self, symbol: &str) -> Result<u32, EngineError>;
}

/// Fixed-delay retry wrapper shared by every caller, matching a
/// `retry_api_call(function, max_retries=100, delay=10)` loop.
/// `InSettlement` waits its own fixed 10s and does not consume the budget.
pub async fn retry_with_backoff<F, Fut, T>(
    cfg: &EngineConfig,
    op_name: &str,
    mut f: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut attempts = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(EngineError::InSettlement) => {
                warn!("[{op_name}] exchange in settlement/delivery, waiting 10s");
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                continue;
            }
            Err(e) if e.is_retryable() => {
                attempts += 1;
                if attempts >= cfg.retry_max_attempts {
                    warn!("[{op_name}] retry budget ({}) exhausted: {e}", cfg.retry_max_attempts);
                    return Err(e);
                }
                // Jitter the fixed delay so a burst of callers hitting the
                // same transient error don't all retry in lockstep.
                let jitter_ms = rand::thread_rng().gen_range(0..=cfg.retry_fixed_delay_ms / 5);
                tokio::time::sleep(e.backoff(cfg.retry_fixed_delay_ms) + std::time::Duration::from_millis(jitter_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── In-memory simulation exchange, used by tests ──────────────────────────

/// Minimal in-memory venue used by the test suite: every operation is
/// synchronous in effect (no network), and orders placed via `create_limit`
/// become immediately visible to `open_orders`. Generalized from a
/// single-position `SimExchange` to hedge mode (long + short legs per symbol).
pub struct SimExchange {
    inner: tokio::sync::Mutex<SimState>,
}

struct SimState {
    positions: HashMap<String, PositionPair>,
    orders: HashMap<String, Vec<Order>>,
    books: HashMap<String, OrderBook>,
    precision: Precision,
    equity: f64,
    next_id: u64,
}

impl SimExchange {
    pub fn new(equity: f64, precision: Precision) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(SimState {
                positions: HashMap::new(),
                orders: HashMap::new(),
                books: HashMap::new(),
                precision,
                equity,
                next_id: 1,
            }),
        }
    }

    pub async fn set_book(&self, symbol: &str, bid: f64, ask: f64) {
        let mut st = self.inner.lock().await;
        st.books.insert(
            symbol.to_string(),
            OrderBook {
                bids: vec![BookLevel { price: bid, qty: 1.0 }],
                asks: vec![BookLevel { price: ask, qty: 1.0 }],
            },
        );
    }

    pub async fn set_position(&self, symbol: &str, side: Side, qty: f64, entry_price: f64) {
        let mut st = self.inner.lock().await;
        let pair = st
            .positions
            .entry(symbol.to_string())
            .or_insert_with(PositionPair::flat);
        let leg = match side {
            Side::Long => &mut pair.long,
            Side::Short => &mut pair.short,
        };
        leg.qty = qty;
        leg.entry_price = entry_price;
    }

    pub async fn orders_snapshot(&self, symbol: &str) -> Vec<Order> {
        self.inner
            .lock()
            .await
            .orders
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExchangePort for SimExchange {
    async fn orderbook(&self, symbol: &str) -> Result<OrderBook, EngineError> {
        self.inner
            .lock()
            .await
            .books
            .get(symbol)
            .map(|b| OrderBook { bids: b.bids.clone(), asks: b.asks.clone() })
            .ok_or_else(|| EngineError::InvalidArgument(format!("no book for {symbol}")))
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, EngineError> {
        self.orderbook(symbol)
            .await?
            .mid()
            .ok_or_else(|| EngineError::InvalidArgument("empty book".into()))
    }

    async fn positions(&self, symbol: &str) -> Result<PositionPair, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_else(PositionPair::flat))
    }

    async fn all_positions(&self) -> Result<HashMap<String, PositionPair>, EngineError> {
        Ok(self.inner.lock().await.positions.clone())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .orders
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_tp_orders(&self, symbol: &str) -> Result<(Vec<Order>, Vec<Order>), EngineError> {
        let orders = self.open_orders(symbol).await?;
        let longs = orders
            .iter()
            .filter(|o| o.reduce_only && o.position_idx == 1)
            .cloned()
            .collect();
        let shorts = orders
            .iter()
            .filter(|o| o.reduce_only && o.position_idx == 2)
            .cloned()
            .collect();
        Ok((longs, shorts))
    }

    async fn open_tp_counts(&self, symbol: &str) -> Result<TpCounts, EngineError> {
        let (longs, shorts) = self.open_tp_orders(symbol).await?;
        Ok(TpCounts {
            long_tp: longs.len(),
            short_tp: shorts.len(),
        })
    }

    async fn balance(&self) -> Result<AccountSnapshot, EngineError> {
        let equity = self.inner.lock().await.equity;
        Ok(AccountSnapshot {
            equity,
            available_balance: equity,
        })
    }

    async fn create_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
        position_idx: u8,
        _post_only: bool,
        reduce_only: bool,
        link_id: &str,
    ) -> Result<String, EngineError> {
        let mut st = self.inner.lock().await;

        // Idempotent placement: adopt an existing order carrying the same
        // link_id instead of creating a duplicate.
        if let Some(existing) = st
            .orders
            .get(symbol)
            .and_then(|os| os.iter().find(|o| o.link_id.as_deref() == Some(link_id)))
        {
            return Ok(existing.id.clone());
        }

        if qty < st.precision.min_qty {
            return Err(EngineError::InvalidArgument(format!(
                "qty {qty} below min_qty {}",
                st.precision.min_qty
            )));
        }

        let id = format!("sim-{}", st.next_id);
        st.next_id += 1;
        st.orders.entry(symbol.to_string()).or_default().push(Order {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            qty,
            status: crate::types::OrderStatus::Open,
            reduce_only,
            position_idx,
            link_id: Some(link_id.to_string()),
        });
        Ok(id)
    }

    async fn cancel_order(&self, symbol: &str, id: &str) -> Result<(), EngineError> {
        let mut st = self.inner.lock().await;
        if let Some(list) = st.orders.get_mut(symbol) {
            list.retain(|o| o.id != id);
        }
        Ok(())
    }

    async fn cancel_all(&self, symbol: &str) -> Result<u64, EngineError> {
        let mut st = self.inner.lock().await;
        let n = st.orders.get(symbol).map(|l| l.len()).unwrap_or(0) as u64;
        st.orders.remove(symbol);
        Ok(n)
    }

    async fn cancel_all_entries(&self, symbol: &str) -> Result<u64, EngineError> {
        let mut st = self.inner.lock().await;
        let mut n = 0u64;
        if let Some(list) = st.orders.get_mut(symbol) {
            let before = list.len();
            list.retain(|o| o.reduce_only);
            n = (before - list.len()) as u64;
        }
        Ok(n)
    }

    async fn cancel_all_reduce_only(&self, symbol: &str) -> Result<u64, EngineError> {
        let mut st = self.inner.lock().await;
        let mut n = 0u64;
        if let Some(list) = st.orders.get_mut(symbol) {
            let before = list.len();
            list.retain(|o| !o.reduce_only);
            n = (before - list.len()) as u64;
        }
        Ok(n)
    }

    async fn precision(&self, _symbol: &str) -> Result<Precision, EngineError> {
        Ok(self.inner.lock().await.precision)
    }

    async fn max_leverage(&self, _symbol: &str) -> Result<u32, EngineError> {
        Ok(20)
    }
}

// ─── Live exchange adapter, out of scope ───────────────────────────────────

/// Placeholder for the real REST/WebSocket adapter (out of scope per
/// module 1 — "the exchange REST/WebSocket adapter is kept only as the
/// typed surface the core calls against"). Holds what a live client would
/// need (base URL, credentials, an HTTP client) purely to demonstrate that
/// `ExchangePort` is object-safe and `Box<dyn ExchangePort>`-usable the same
/// way `Box<dyn ExchangeClient>` is boxed in `main.rs`; every method
/// returns `Transient` so a caller that accidentally wires this in fails
/// loudly through the normal retry/error path instead of panicking.
pub struct LiveExchange {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl LiveExchange {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    fn unimplemented(&self, op: &str) -> EngineError {
        EngineError::Transient(format!(
            "LiveExchange::{op} not implemented ({})",
            self.base_url
        ))
    }
}

#[async_trait]
impl ExchangePort for LiveExchange {
    async fn orderbook(&self, _symbol: &str) -> Result<OrderBook, EngineError> {
        Err(self.unimplemented("orderbook"))
    }

    async fn current_price(&self, _symbol: &str) -> Result<f64, EngineError> {
        Err(self.unimplemented("current_price"))
    }

    async fn positions(&self, _symbol: &str) -> Result<PositionPair, EngineError> {
        Err(self.unimplemented("positions"))
    }

    async fn all_positions(&self) -> Result<HashMap<String, PositionPair>, EngineError> {
        Err(self.unimplemented("all_positions"))
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<Order>, EngineError> {
        Err(self.unimplemented("open_orders"))
    }

    async fn open_tp_orders(&self, _symbol: &str) -> Result<(Vec<Order>, Vec<Order>), EngineError> {
        Err(self.unimplemented("open_tp_orders"))
    }

    async fn open_tp_counts(&self, _symbol: &str) -> Result<TpCounts, EngineError> {
        Err(self.unimplemented("open_tp_counts"))
    }

    async fn balance(&self) -> Result<AccountSnapshot, EngineError> {
        Err(self.unimplemented("balance"))
    }

    async fn create_limit(
        &self,
        _symbol: &str,
        _side: OrderSide,
        _qty: f64,
        _price: f64,
        _position_idx: u8,
        _post_only: bool,
        _reduce_only: bool,
        _link_id: &str,
    ) -> Result<String, EngineError> {
        Err(self.unimplemented("create_limit"))
    }

    async fn cancel_order(&self, _symbol: &str, _id: &str) -> Result<(), EngineError> {
        Err(self.unimplemented("cancel_order"))
    }

    async fn cancel_all(&self, _symbol: &str) -> Result<u64, EngineError> {
        Err(self.unimplemented("cancel_all"))
    }

    async fn cancel_all_entries(&self, _symbol: &str) -> Result<u64, EngineError> {
        Err(self.unimplemented("cancel_all_entries"))
    }

    async fn cancel_all_reduce_only(&self, _symbol: &str) -> Result<u64, EngineError> {
        Err(self.unimplemented("cancel_all_reduce_only"))
    }

    async fn precision(&self, _symbol: &str) -> Result<Precision, EngineError> {
        Err(self.unimplemented("precision"))
    }

    async fn max_leverage(&self, _symbol: &str) -> Result<u32, EngineError> {
        Err(self.unimplemented("max_leverage"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    #[tokio::test]
    async fn live_exchange_is_object_safe_and_reports_transient() {
        let boxed: Box<dyn ExchangePort> =
            Box::new(LiveExchange::new("https://example.invalid", "key"));
        let err = boxed.balance().await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
    }

    fn precision() -> Precision {
        Precision {
            price_tick: 0.1,
            qty_step: 0.001,
            min_qty: 0.001,
        }
    }

    #[tokio::test]
    async fn duplicate_link_id_is_idempotent() {
        let ex = SimExchange::new(10_000.0, precision());
        let id1 = ex
            .create_limit("BTC", OrderSide::Buy, 0.01, 49_000.0, 1, true, false, "tag1")
            .await
            .unwrap();
        let id2 = ex
            .create_limit("BTC", OrderSide::Buy, 0.01, 49_000.0, 1, true, false, "tag1")
            .await
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(ex.orders_snapshot("BTC").await.len(), 1);
    }

    #[tokio::test]
    async fn below_min_qty_is_invalid_argument() {
        let ex = SimExchange::new(10_000.0, precision());
        let err = ex
            .create_limit("BTC", OrderSide::Buy, 0.0001, 49_000.0, 1, true, false, "tag2")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn cancel_all_entries_keeps_reduce_only() {
        let ex = SimExchange::new(10_000.0, precision());
        ex.create_limit("BTC", OrderSide::Buy, 0.01, 49_000.0, 1, true, false, "entry")
            .await
            .unwrap();
        ex.create_limit("BTC", OrderSide::Sell, 0.01, 50_000.0, 1, false, true, "tp")
            .await
            .unwrap();
        let cancelled = ex.cancel_all_entries("BTC").await.unwrap();
        assert_eq!(cancelled, 1);
        let remaining = ex.orders_snapshot("BTC").await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].reduce_only);
    }
}
