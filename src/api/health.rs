//! Shared health/observability state (C9 ambient): exposes the
//! Prometheus-shaped counters the original service kept as module-level
//! gauges (SPEC_FULL.md's supplemented ambient-observability note),
//! read-only from the HTTP task, read-write from the Supervisor (spec.md
//! §5: the HTTP task "MUST not mutate C1/C5/C6 state").
//!
//! Grounded on `api/health.rs`'s `HealthState` (`AtomicBool`/`AtomicU64`
//! behind a shared struct), generalized from a single window-close
//! timestamp to the broader counter set spec.md's ambient stack requires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    pub ws_connected: AtomicBool,
    pub db_connected: AtomicBool,
    pub reconnect_count: AtomicU64,
    pub trades_received: AtomicU64,
    pub trades_processed: AtomicU64,
    pub cache_size: AtomicU64,
    pub watchlist_size: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ws_connected(&self, v: bool) {
        self.ws_connected.store(v, Ordering::Relaxed);
    }

    pub fn ws_connected(&self) -> bool {
        self.ws_connected.load(Ordering::Relaxed)
    }

    pub fn set_db_connected(&self, v: bool) {
        self.db_connected.store(v, Ordering::Relaxed);
    }

    pub fn db_connected(&self) -> bool {
        self.db_connected.load(Ordering::Relaxed)
    }

    pub fn inc_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn inc_trades_received(&self) {
        self.trades_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trades_processed(&self) {
        self.trades_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trades_received(&self) -> u64 {
        self.trades_received.load(Ordering::Relaxed)
    }

    pub fn trades_processed(&self) -> u64 {
        self.trades_processed.load(Ordering::Relaxed)
    }

    pub fn set_cache_size(&self, n: usize) {
        self.cache_size.store(n as u64, Ordering::Relaxed);
    }

    pub fn cache_size(&self) -> u64 {
        self.cache_size.load(Ordering::Relaxed)
    }

    pub fn set_watchlist_size(&self, n: usize) {
        self.watchlist_size.store(n as u64, Ordering::Relaxed);
    }

    pub fn watchlist_size(&self) -> u64 {
        self.watchlist_size.load(Ordering::Relaxed)
    }
}
