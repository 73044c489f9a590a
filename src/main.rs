// grid-hedge-engine: multi-symbol hedged grid trading engine.
//
// Per-symbol trade-management core: grid construction/reissuance, TP
// reconciliation, entry gating, auto-reduce — plus the concurrency
// discipline and exchange-abstraction contract it runs under. The
// exchange REST/WS adapter, indicator stack, and CLI are out of scope;
// this binary wires the core against `SimExchange` until a live adapter is
// plugged in behind `ExchangePort`.

mod atr;
mod auto_reduce;
mod concurrency;
mod config;
mod errors;
mod exchange;
mod grid;
mod reconciler;
mod scheduler;
mod signals;
mod sizing;
mod tags;
mod tp;
mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use atr::Candle;
use concurrency::{OrderRateGate, SymbolLocks};
use config::EngineConfig;
use exchange::{ExchangePort, SimExchange};
use grid::{dynamic_buffer, reissue_decision, SideState};
use reconciler::{reconcile_side, ClearReason, SideTick};
use scheduler::{
    check_termination, observe_tick, terminate_symbol, AdmissionControl, TerminationThresholds,
};
use signals::{Signal, SignalSource, StaticSignalSource};
use sizing::{plan_side, SizingInput};
use tags::is_auto_reduce_tag;
use types::{Precision, Side, SymbolState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    info!("grid-hedge-engine starting");

    let cfg = Arc::new(EngineConfig::from_env());
    let _proxy = config::ProxyConfig::from_env();

    let symbols: Vec<String> = std::env::var("SYMBOLS")
        .unwrap_or_else(|_| "BTCUSDT,ETHUSDT".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    // Shadow exchange until a live ExchangePort is wired in; mirrors the
    // `shadow_mode` default in `main.rs`.
    let exchange: Arc<dyn ExchangePort> = Arc::new(bootstrap_sim_exchange(&symbols).await);
    let signal_source: Arc<dyn SignalSource> =
        Arc::new(StaticSignalSource(Signal::neutral()));

    let admission = Arc::new(AdmissionControl::new(cfg.symbols_allowed));
    let symbol_locks = Arc::new(SymbolLocks::new());
    let order_gate = Arc::new(OrderRateGate::new());

    {
        let exchange = exchange.clone();
        let admission = admission.clone();
        let interval = Duration::from_secs(cfg.health_check_interval_secs);
        tokio::spawn(async move {
            scheduler::health_check_loop(exchange, admission, interval).await;
        });
    }

    let mut workers = Vec::new();
    for symbol in symbols {
        if !admission.try_admit(&symbol).await {
            warn!("[SCHED] {symbol}: admission cap reached, skipping");
            continue;
        }
        let worker = tokio::spawn(run_symbol_worker(
            symbol,
            cfg.clone(),
            exchange.clone(),
            signal_source.clone(),
            admission.clone(),
            symbol_locks.clone(),
            order_gate.clone(),
        ));
        workers.push(worker);
    }

    for worker in workers {
        let _ = worker.await;
    }
}

async fn bootstrap_sim_exchange(symbols: &[String]) -> SimExchange {
    let precision = Precision { price_tick: 0.1, qty_step: 0.001, min_qty: 0.001 };
    let sim = SimExchange::new(10_000.0, precision);
    for symbol in symbols {
        sim.set_book(symbol, 49_900.0, 50_100.0).await;
    }
    sim
}

/// One symbol's tick loop: plan both sides' grids, reconcile entries,
/// reconcile TP, check auto-reduce, check termination, sleep, repeat.
async fn run_symbol_worker(
    symbol: String,
    cfg: Arc<EngineConfig>,
    exchange: Arc<dyn ExchangePort>,
    signal_source: Arc<dyn SignalSource>,
    admission: Arc<AdmissionControl>,
    symbol_locks: Arc<SymbolLocks>,
    order_gate: Arc<OrderRateGate>,
) {
    let mut state = SymbolState::default();
    let thresholds = TerminationThresholds {
        position_inactive: Duration::from_secs(cfg.position_inactive_threshold_secs),
        no_entry_signal: Duration::from_secs(cfg.no_entry_signal_threshold_secs),
        order_inactive: Duration::from_secs(cfg.order_inactive_threshold_secs),
    };

    loop {
        let _guard = symbol_locks.acquire(&symbol).await;

        if let Err(e) = tick_once(
            &symbol,
            &cfg,
            exchange.as_ref(),
            signal_source.as_ref(),
            &order_gate,
            &mut state,
        )
        .await
        {
            warn!("[SCHED] {symbol}: tick failed: {e}");
        }

        let long_open = scheduler::side_is_open(&state, Side::Long);
        let short_open = scheduler::side_is_open(&state, Side::Short);
        if let Some(reason) = check_termination(&state, long_open, short_open, &thresholds) {
            terminate_symbol(exchange.as_ref(), &admission, &symbol, reason).await;
            return;
        }

        drop(_guard);
        tokio::time::sleep(Duration::from_secs(cfg.tick_interval_secs)).await;
    }
}

async fn tick_once(
    symbol: &str,
    cfg: &EngineConfig,
    exchange: &dyn ExchangePort,
    signal_source: &dyn SignalSource,
    order_gate: &OrderRateGate,
    state: &mut SymbolState,
) -> Result<(), errors::EngineError> {
    let price = exchange.current_price(symbol).await?;
    let positions = exchange.positions(symbol).await?;
    let precision = exchange.precision(symbol).await?;
    let account = exchange.balance().await?;
    let book = exchange.orderbook(symbol).await?;
    let signal = signal_source.latest(symbol).await.unwrap_or_else(Signal::neutral);
    let had_signal = signals::should_enter(&signal, Side::Long) || signals::should_enter(&signal, Side::Short);

    state.record_candle(Candle {
        high: book.best_ask().unwrap_or(price),
        low: book.best_bid().unwrap_or(price),
        close: price,
    });

    let long_state = SideState { qty: positions.long.qty, entry_price: positions.long.entry_price };
    let short_state = SideState { qty: positions.short.qty, entry_price: positions.short.entry_price };

    // The ladder is anchored to the last reissue price, not recomputed from
    // the live price every tick — otherwise a drifting price would relabel
    // every level each tick and the reconciler would treat them all as new.
    let buffer_long = dynamic_buffer(cfg, price, long_state);
    let buffer_short = dynamic_buffer(cfg, price, short_state);
    let long_decision =
        reissue_decision(cfg, price, long_state, state.last_price_for_reissue_long, buffer_long);
    let short_decision =
        reissue_decision(cfg, price, short_state, state.last_price_for_reissue_short, buffer_short);
    let reissuing = long_decision != grid::ReissueDecision::NoAction
        || short_decision != grid::ReissueDecision::NoAction;

    let anchor_price = if reissuing {
        state.last_price_for_reissue_long = Some(price);
        state.last_price_for_reissue_short = Some(price);
        price
    } else {
        state.last_price_for_reissue_long.or(state.last_price_for_reissue_short).unwrap_or(price)
    };
    let plan = grid::plan_grid(cfg, anchor_price, long_state, short_state);

    let max_leverage = exchange.max_leverage(symbol).await? as f64;
    let ts_millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    for side in [Side::Long, Side::Short] {
        let (levels, side_state, exposure_limit, leverage, upnl_threshold) = match side {
            Side::Long => (
                &plan.levels_long,
                long_state,
                cfg.wallet_exposure_limit_long,
                cfg.user_defined_leverage_long,
                cfg.upnl_auto_reduce_threshold_long,
            ),
            Side::Short => (
                &plan.levels_short,
                short_state,
                cfg.wallet_exposure_limit_short,
                cfg.user_defined_leverage_short,
                cfg.upnl_auto_reduce_threshold_short,
            ),
        };

        let sizing = plan_side(&SizingInput {
            total_equity: account.equity,
            price,
            exposure_limit,
            leverage,
            exchange_max_leverage: max_leverage,
            precision,
            levels: cfg.levels,
            strength: cfg.strength,
            enforce_full_grid: cfg.enforce_full_grid,
            symbol: symbol.to_string(),
        });

        let position = positions.side(side);
        let clear = if side_state.qty == 0.0 && state.active_grids(side) {
            Some(ClearReason::PositionWentFlat)
        } else {
            None
        };

        let tick = SideTick {
            side,
            levels,
            amounts: &sizing.amounts,
            price_tick: precision.price_tick,
            min_order_spacing: Duration::from_secs(cfg.min_order_spacing_secs),
            signal,
            volume_check: cfg.volume_check,
            min_vol: cfg.min_vol,
            min_dist: cfg.min_dist,
            auto_reduce_active: match side {
                Side::Long => state.auto_reduce_active_long,
                Side::Short => state.auto_reduce_active_short,
            },
            entry_during_autoreduce: cfg.entry_during_autoreduce,
            clear,
            ts_millis,
        };

        reconcile_side(exchange, order_gate, symbol, state, tick).await?;

        if position.qty > 0.0 {
            let trigger_inputs = auto_reduce::TriggerInputs {
                equity: account.equity,
                side_position_value: position.qty * price,
                unrealized_pnl: position.unrealized_pnl,
                entry_price: position.entry_price,
                current_price: price,
                upnl_threshold_pct: upnl_threshold,
                max_pos_balance_pct: cfg.max_pos_balance_pct,
                auto_reduce_start_pct: cfg.auto_reduce_start_pct,
            };
            let triggered = auto_reduce::should_trigger(side, trigger_inputs);
            match side {
                Side::Long => state.auto_reduce_active_long = triggered,
                Side::Short => state.auto_reduce_active_short = triggered,
            }

            if triggered {
                if cfg.auto_reduce_grid_hardened {
                    auto_reduce::run_grid_hardened(exchange, symbol, side, &book, position.qty, precision.qty_step)
                        .await?;
                } else {
                    auto_reduce::run_simple(
                        exchange,
                        symbol,
                        side,
                        price,
                        position.qty,
                        cfg.levels,
                        cfg.auto_reduce_step_pct,
                        precision.min_qty,
                        precision.price_tick,
                    )
                    .await?;
                }
            }

            // Re-evaluate the TP at most every `tp_refresh_interval_secs`,
            // bypassed immediately whenever the resting TP's qty no longer
            // matches the live position (auto-reduce-tagged orders don't
            // count toward this, same as reconcile_tp's own replace rule).
            let now = Instant::now();
            let last_update = match side {
                Side::Long => state.last_tp_update_long,
                Side::Short => state.last_tp_update_short,
            };
            let refresh_due = last_update
                .map(|t| now.duration_since(t) >= Duration::from_secs(cfg.tp_refresh_interval_secs))
                .unwrap_or(true);

            let (existing_longs, existing_shorts) = exchange.open_tp_orders(symbol).await?;
            let existing = match side {
                Side::Long => &existing_longs,
                Side::Short => &existing_shorts,
            };
            let existing_qty: f64 = existing
                .iter()
                .filter(|o| o.link_id.as_deref().map(|t| !is_auto_reduce_tag(t)).unwrap_or(true))
                .map(|o| o.qty)
                .sum();
            let qty_mismatch = (existing_qty - position.qty).abs() > 1e-9;

            if refresh_due || qty_mismatch {
                let mode = tp::TpMode::QuickscalpDynamic { p_min: cfg.upnl_profit_pct, p_max: cfg.max_upnl_profit_pct };
                let target = tp::base_target(side, position.entry_price, mode);
                let far = tp::far_bound(side, position.entry_price, mode);
                let wall_params = tp::WallParams {
                    base_factor: cfg.wall_base_factor,
                    atr_proximity_pct: cfg.wall_atr_proximity_pct,
                    max_deviation: cfg.wall_max_deviation,
                };
                let wall = tp::detect_wall(&book, side, price, &state.recent_candles, cfg.atr_period, wall_params)
                    .map(|w| match side {
                        Side::Long => w.min(far),
                        Side::Short => w.max(far),
                    });
                let (resolved, crossable) =
                    tp::resolve_target(side, target, wall, book.best_bid(), book.best_ask());
                tp::reconcile_tp(exchange, symbol, side, position.qty, resolved, crossable).await?;

                match side {
                    Side::Long => state.last_tp_update_long = Some(now),
                    Side::Short => state.last_tp_update_short = Some(now),
                }
            }
        }
    }

    observe_tick(state, long_state.qty > 0.0, short_state.qty > 0.0, had_signal);
    Ok(())
}
