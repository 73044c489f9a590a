// scheduler.rs — Per-Symbol Scheduler & Termination.
//
// Admission cap, per-symbol tick loop, the four termination conditions, and
// the periodic health-check safety net. Mirrors the `tokio::spawn`
// worker-per-concern pattern in `main.rs` (stall monitor, latency reporter,
// drawdown monitor each run as an independent loop with a sleep),
// generalized to one worker per traded symbol.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::Mutex;

use crate::exchange::ExchangePort;
use crate::types::{Side, SymbolState};

/// Admits symbols up to `symbols_allowed`; a symbol already open is always
/// re-admitted (its worker is just continuing, not starting fresh).
pub struct AdmissionControl {
    open: Mutex<HashSet<String>>,
    cap: usize,
}

impl AdmissionControl {
    pub fn new(cap: usize) -> Self {
        Self { open: Mutex::new(HashSet::new()), cap }
    }

    pub async fn try_admit(&self, symbol: &str) -> bool {
        let mut open = self.open.lock().await;
        if open.contains(symbol) {
            return true;
        }
        if open.len() < self.cap {
            open.insert(symbol.to_string());
            true
        } else {
            false
        }
    }

    pub async fn release(&self, symbol: &str) {
        self.open.lock().await.remove(symbol);
    }

    pub async fn open_symbols(&self) -> HashSet<String> {
        self.open.lock().await.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    PositionInactive,
    NoEntrySignal,
    OrdersStaleWithoutPosition,
}

pub struct TerminationThresholds {
    pub position_inactive: Duration,
    pub no_entry_signal: Duration,
    pub order_inactive: Duration,
}

/// Termination conditions 1, 2, 4. Condition 3 (side flat →
/// cancel that side) is handled inline by the reconciler's `ClearReason`,
/// not here, since it ends one side rather than the whole worker.
pub fn check_termination(
    state: &SymbolState,
    long_open: bool,
    short_open: bool,
    thresholds: &TerminationThresholds,
) -> Option<TerminationReason> {
    if !long_open && !short_open {
        if let Some(closed_at) = state.position_closed_time {
            if closed_at.elapsed() > thresholds.position_inactive {
                return Some(TerminationReason::PositionInactive);
            }
        }
    }

    if let Some(last_signal) = state.last_entry_signal_time {
        if last_signal.elapsed() > thresholds.no_entry_signal {
            return Some(TerminationReason::NoEntrySignal);
        }
    }

    let stale_long = !long_open
        && state
            .last_active_long_order_time
            .map(|t| t.elapsed() > thresholds.order_inactive)
            .unwrap_or(false);
    let stale_short = !short_open
        && state
            .last_active_short_order_time
            .map(|t| t.elapsed() > thresholds.order_inactive)
            .unwrap_or(false);
    if stale_long || stale_short {
        return Some(TerminationReason::OrdersStaleWithoutPosition);
    }

    None
}

/// Updates the bookkeeping fields `check_termination` reads, given this
/// tick's observed position state. Call once per tick before checking.
pub fn observe_tick(state: &mut SymbolState, long_open: bool, short_open: bool, had_entry_signal: bool) {
    let now = Instant::now();
    if !long_open && !short_open {
        state.position_closed_time.get_or_insert(now);
    } else {
        state.position_closed_time = None;
    }
    if had_entry_signal {
        state.last_entry_signal_time = Some(now);
    } else {
        state.last_entry_signal_time.get_or_insert(now);
    }
    if long_open {
        state.last_active_long_order_time = Some(now);
    }
    if short_open {
        state.last_active_short_order_time = Some(now);
    }
}

/// Cleanup run when any termination condition fires: cancel all open
/// orders for the symbol, then the caller drops the worker.
pub async fn terminate_symbol(
    exchange: &dyn ExchangePort,
    admission: &AdmissionControl,
    symbol: &str,
    reason: TerminationReason,
) {
    warn!("[SCHEDULER] {symbol}: terminating ({reason:?})");
    if let Err(e) = exchange.cancel_all(symbol).await {
        warn!("[SCHEDULER] {symbol}: cancel_all on terminate failed: {e}");
    }
    admission.release(symbol).await;
}

/// Periodic safety net (default 300s): cancels all open orders for every
/// currently-open symbol. Not part of steady-state logic — a backstop
/// against orphaned orders surviving a crashed or stuck worker.
pub async fn health_check_loop(
    exchange: Arc<dyn ExchangePort>,
    admission: Arc<AdmissionControl>,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        let symbols = admission.open_symbols().await;
        info!("[HEALTH CHECK] sweeping {} open symbols", symbols.len());
        for symbol in symbols {
            if let Err(e) = exchange.cancel_all(&symbol).await {
                warn!("[HEALTH CHECK] {symbol}: cancel_all failed: {e}");
            }
        }
    }
}

pub fn side_is_open(state: &SymbolState, side: Side) -> bool {
    state.active_grids(side)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admission_respects_cap_but_reopens_existing() {
        let admission = AdmissionControl::new(2);
        assert!(admission.try_admit("BTCUSDT").await);
        assert!(admission.try_admit("ETHUSDT").await);
        assert!(!admission.try_admit("SOLUSDT").await);
        assert!(admission.try_admit("BTCUSDT").await);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let admission = AdmissionControl::new(1);
        assert!(admission.try_admit("BTCUSDT").await);
        assert!(!admission.try_admit("ETHUSDT").await);
        admission.release("BTCUSDT").await;
        assert!(admission.try_admit("ETHUSDT").await);
    }

    #[test]
    fn terminates_on_stale_position_absence() {
        let mut state = SymbolState::default();
        state.position_closed_time = Some(Instant::now() - Duration::from_secs(200));
        state.last_entry_signal_time = Some(Instant::now());
        let thresholds = TerminationThresholds {
            position_inactive: Duration::from_secs(150),
            no_entry_signal: Duration::from_secs(150),
            order_inactive: Duration::from_secs(150),
        };
        assert_eq!(
            check_termination(&state, false, false, &thresholds),
            Some(TerminationReason::PositionInactive)
        );
    }

    #[test]
    fn does_not_terminate_fresh_symbol() {
        let mut state = SymbolState::default();
        state.last_entry_signal_time = Some(Instant::now());
        let thresholds = TerminationThresholds {
            position_inactive: Duration::from_secs(150),
            no_entry_signal: Duration::from_secs(150),
            order_inactive: Duration::from_secs(150),
        };
        assert_eq!(check_termination(&state, true, false, &thresholds), None);
    }
}
