// concurrency.rs — per-symbol concurrency primitives.
//
// Mirrors the process-wide `Arc<Mutex<...>>` state split in
// `main.rs`/`execution.rs` (one mutex per shared resource, fine-grained
// rather than one big lock), generalized to per-symbol keyed locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::PositionPair;

/// Keyed exclusion lock, created on first use. All state mutation for a
/// symbol happens while holding its guard for the duration of one tick.
#[derive(Default)]
pub struct SymbolLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let mut map = self.locks.lock().await;
        let entry = map
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        drop(map);
        entry.lock_owned().await
    }
}

/// Per-symbol minimum-inter-order-spacing gate (`can_place_order`, default
/// 60s, configured via `min_order_spacing_secs`).
#[derive(Default)]
pub struct OrderRateGate {
    last_placed: Mutex<HashMap<String, Instant>>,
}

impl OrderRateGate {
    pub fn new() -> Self {
        Self { last_placed: Mutex::new(HashMap::new()) }
    }

    pub async fn can_place_order(&self, symbol: &str, min_spacing: Duration) -> bool {
        let map = self.last_placed.lock().await;
        match map.get(symbol) {
            Some(last) => last.elapsed() >= min_spacing,
            None => true,
        }
    }

    pub async fn record_placed(&self, symbol: &str) {
        self.last_placed.lock().await.insert(symbol.to_string(), Instant::now());
    }
}

/// Process-wide positions cache: a single refresh permit guards the
/// exchange round-trip; readers outside the refresh window get the cached
/// snapshot instead of each triggering their own fetch.
pub struct SharedPositionsCache {
    snapshot: Mutex<(HashMap<String, PositionPair>, Instant)>,
    refresh_permit: Mutex<()>,
    ttl: Duration,
}

impl SharedPositionsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: Mutex::new((HashMap::new(), Instant::now() - ttl - Duration::from_secs(1))),
            refresh_permit: Mutex::new(()),
            ttl,
        }
    }

    /// Returns the cached snapshot if still fresh; otherwise runs `refresh`
    /// under the single refresh permit (so concurrent callers racing past
    /// a stale cache collapse into one exchange call) and caches the result.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> HashMap<String, PositionPair>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HashMap<String, PositionPair>>,
    {
        {
            let snap = self.snapshot.lock().await;
            if snap.1.elapsed() < self.ttl {
                return snap.0.clone();
            }
        }

        let _permit = self.refresh_permit.lock().await;
        // Re-check: another caller may have refreshed while we waited for the permit.
        {
            let snap = self.snapshot.lock().await;
            if snap.1.elapsed() < self.ttl {
                return snap.0.clone();
            }
        }

        let fresh = refresh().await;
        let mut snap = self.snapshot.lock().await;
        *snap = (fresh.clone(), Instant::now());
        fresh
    }
}

/// Order-history registry: `symbol -> [(order_id, placed_at)]`, its own lock.
#[derive(Default)]
pub struct OrderHistoryRegistry {
    history: Mutex<HashMap<String, Vec<(String, Instant)>>>,
}

impl OrderHistoryRegistry {
    pub fn new() -> Self {
        Self { history: Mutex::new(HashMap::new()) }
    }

    pub async fn record(&self, symbol: &str, order_id: String) {
        self.history
            .lock()
            .await
            .entry(symbol.to_string())
            .or_default()
            .push((order_id, Instant::now()));
    }

    pub async fn oldest_for(&self, symbol: &str) -> Option<Instant> {
        self.history
            .lock()
            .await
            .get(symbol)
            .and_then(|v| v.iter().map(|(_, t)| *t).min())
    }

    pub async fn clear(&self, symbol: &str) {
        self.history.lock().await.remove(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn symbol_locks_serialize_same_symbol() {
        let locks = SymbolLocks::new();
        let guard = locks.acquire("BTCUSDT").await;
        drop(guard);
        let _guard2 = locks.acquire("BTCUSDT").await;
    }

    #[tokio::test]
    async fn order_rate_gate_blocks_within_spacing() {
        let gate = OrderRateGate::new();
        assert!(gate.can_place_order("BTCUSDT", Duration::from_secs(60)).await);
        gate.record_placed("BTCUSDT").await;
        assert!(!gate.can_place_order("BTCUSDT", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn positions_cache_serves_stale_within_ttl() {
        let cache = SharedPositionsCache::new(Duration::from_secs(60));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let snap = cache
            .get_or_refresh(|| async move {
                calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                HashMap::from([("BTCUSDT".to_string(), PositionPair::flat())])
            })
            .await;
        assert_eq!(snap.len(), 1);
        let calls3 = calls.clone();
        let _snap2 = cache
            .get_or_refresh(|| async move {
                calls3.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                HashMap::new()
            })
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn order_history_tracks_oldest_per_symbol() {
        let reg = OrderHistoryRegistry::new();
        reg.record("BTCUSDT", "order-1".to_string()).await;
        assert!(reg.oldest_for("BTCUSDT").await.is_some());
        reg.clear("BTCUSDT").await;
        assert!(reg.oldest_for("BTCUSDT").await.is_none());
    }
}
