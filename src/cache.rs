//! Discovery Cache (C1): holds newly-created tokens for a bounded TTL,
//! buffering any trades that arrive before the token is promoted into the
//! active watchlist or evicted. Single-owner, mutated only from the
//! Supervisor's read loop (spec.md §5) — plain `HashMap`, not `DashMap`.
//!
//! Grounded on `state/market_store.rs`'s `MarketStore` shape (explicit
//! insert/remove plus a stats reader), generalized from market metadata to
//! per-token TTL bookkeeping. Behavior grounded on
//! `examples/original_source/tests/unit/test_coin_cache.py`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::{ActiveStream, CacheStats, CachedToken, CreationPayload, Mint, RawTrade};

pub struct DiscoveryCache {
    cache: HashMap<Mint, CachedToken>,
    ttl: Duration,
    activations: AtomicU64,
    expirations: AtomicU64,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            ttl,
            activations: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Idempotent by key: a second insert for the same mint replaces
    /// metadata and clears any buffered trades.
    pub fn insert(&mut self, mint: Mint, metadata: CreationPayload) {
        self.cache.insert(
            mint,
            CachedToken {
                discovered_at: Instant::now(),
                metadata,
                buffered_trades: Vec::new(),
                activated: false,
                forwarded: false,
            },
        );
    }

    /// No-op if `mint` is absent or already activated.
    pub fn append_trade(&mut self, mint: &str, trade: RawTrade) {
        if let Some(entry) = self.cache.get_mut(mint) {
            if !entry.activated {
                entry.buffered_trades.push((Instant::now(), trade));
            }
        }
    }

    /// Returns buffered trades sorted ascending by arrival instant and marks
    /// the entry activated. Returns an empty list for an unknown or
    /// already-activated mint (no state change in the latter case).
    pub fn promote(&mut self, mint: &str) -> Vec<(Instant, RawTrade)> {
        let Some(entry) = self.cache.get_mut(mint) else {
            return Vec::new();
        };
        if entry.activated {
            return Vec::new();
        }
        entry.activated = true;
        self.activations.fetch_add(1, Ordering::Relaxed);
        let mut trades = std::mem::take(&mut entry.buffered_trades);
        trades.sort_by_key(|(at, _)| *at);
        trades
    }

    pub fn evict(&mut self, mint: &str) {
        if let Some(entry) = self.cache.remove(mint) {
            if !entry.activated {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn contains(&self, mint: &str) -> bool {
        self.cache.contains_key(mint)
    }

    pub fn metadata(&self, mint: &str) -> Option<&CreationPayload> {
        self.cache.get(mint).map(|e| &e.metadata)
    }

    pub fn mark_forwarded(&mut self, mint: &str) {
        if let Some(entry) = self.cache.get_mut(mint) {
            entry.forwarded = true;
        }
    }

    /// Iterates entries whose age exceeds TTL: promotes the ones confirmed by
    /// `active_set`, evicts the rest. Also runs an independent defensive pass
    /// evicting any un-activated entry older than TTL regardless of order
    /// (spec.md §4.1). Returns `(promoted, expired)`, where `promoted`
    /// carries each mint's replayed trade list so the caller can install a
    /// watchlist entry with the trades already folded in (spec.md §4.9).
    pub fn reconcile(
        &mut self,
        active_set: &HashSet<Mint>,
    ) -> (Vec<(Mint, Vec<(Instant, RawTrade)>)>, Vec<Mint>) {
        let now = Instant::now();
        let stale: Vec<Mint> = self
            .cache
            .iter()
            .filter(|(_, e)| !e.activated && now.duration_since(e.discovered_at) >= self.ttl)
            .map(|(m, _)| m.clone())
            .collect();

        let mut promoted = Vec::new();
        let mut expired = Vec::new();
        for mint in stale {
            if active_set.contains(&mint) {
                let trades = self.promote(&mint);
                promoted.push((mint, trades));
            } else {
                self.evict(&mint);
                expired.push(mint);
            }
        }

        // Defensive second pass: anything still un-activated and past TTL
        // (e.g. entries that raced past the first pass) is evicted outright.
        let leftover: Vec<Mint> = self
            .cache
            .iter()
            .filter(|(_, e)| !e.activated && now.duration_since(e.discovered_at) >= self.ttl)
            .map(|(m, _)| m.clone())
            .collect();
        for mint in leftover {
            self.evict(&mint);
            expired.push(mint);
        }

        (promoted, expired)
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.cache.len();
        let activated = self.cache.values().filter(|e| e.activated).count();
        let now = Instant::now();
        let (oldest, newest) = self
            .cache
            .values()
            .map(|e| now.duration_since(e.discovered_at).as_secs_f64())
            .fold((0.0_f64, 0.0_f64), |(max_age, min_age), age| {
                (max_age.max(age), if min_age == 0.0 { age } else { min_age.min(age) })
            });
        CacheStats {
            total_coins: total,
            activated_coins: activated,
            expired_coins: total.saturating_sub(activated),
            oldest_age_seconds: oldest,
            newest_age_seconds: newest,
        }
    }

    pub fn activation_count(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn expiration_count(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

/// Seeds an entry's ATH when the active registry confirms it; used by the
/// supervisor when handing a promoted mint's metadata over to C3/C5.
pub fn seed_ath(active: &ActiveStream, in_memory_ath: f64) -> f64 {
    active.ath_price_sol.max(in_memory_ath)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(mint: &str) -> CreationPayload {
        CreationPayload {
            mint: mint.to_string(),
            name: "Moon Rocket".to_string(),
            symbol: "MOON".to_string(),
            market_cap_sol: None,
            v_tokens_in_bonding_curve: None,
            v_sol_in_bonding_curve: None,
            bonding_curve_key: None,
            trader_public_key: Some("creator1".to_string()),
            extra: serde_json::Map::new(),
        }
    }

    fn trade(mint: &str) -> RawTrade {
        RawTrade {
            mint: mint.to_string(),
            side: crate::types::TradeSide::Buy,
            sol_amount: 0.1,
            v_sol_in_bonding_curve: 30.0,
            v_tokens_in_bonding_curve: 1_000_000.0,
            trader_public_key: "wallet1".to_string(),
        }
    }

    #[test]
    fn insert_then_promote_returns_chronological_trades() {
        let mut cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.insert("M".to_string(), payload("M"));
        for _ in 0..5 {
            cache.append_trade("M", trade("M"));
        }
        let trades = cache.promote("M");
        assert_eq!(trades.len(), 5);
        assert!(cache.cache.get("M").unwrap().activated);
    }

    #[test]
    fn append_trade_ignored_once_activated() {
        let mut cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.insert("M".to_string(), payload("M"));
        cache.promote("M");
        cache.append_trade("M", trade("M"));
        assert!(cache.cache.get("M").unwrap().buffered_trades.is_empty());
    }

    #[test]
    fn append_trade_ignored_for_unknown_mint() {
        let mut cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.append_trade("unknown", trade("unknown"));
        assert!(!cache.contains("unknown"));
    }

    #[test]
    fn promote_on_activated_mint_returns_empty_and_does_not_change_flag() {
        let mut cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.insert("M".to_string(), payload("M"));
        assert_eq!(cache.promote("M").len(), 0);
        let again = cache.promote("M");
        assert!(again.is_empty());
        assert!(cache.cache.get("M").unwrap().activated);
    }

    #[test]
    fn reconcile_evicts_un_activated_entries_past_ttl() {
        let mut cache = DiscoveryCache::new(Duration::from_millis(1));
        cache.insert("M".to_string(), payload("M"));
        std::thread::sleep(Duration::from_millis(5));
        let (promoted, expired) = cache.reconcile(&HashSet::new());
        assert!(promoted.is_empty());
        assert_eq!(expired, vec!["M".to_string()]);
        assert!(!cache.contains("M"));
        assert_eq!(cache.expiration_count(), 1);
    }

    #[test]
    fn reconcile_promotes_entries_confirmed_by_active_set() {
        let mut cache = DiscoveryCache::new(Duration::from_millis(1));
        cache.insert("M".to_string(), payload("M"));
        std::thread::sleep(Duration::from_millis(5));
        let mut active = HashSet::new();
        active.insert("M".to_string());
        let (promoted, expired) = cache.reconcile(&active);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].0, "M".to_string());
        assert!(expired.is_empty());
        assert_eq!(cache.activation_count(), 1);
    }

    #[test]
    fn stats_reports_total_and_activated() {
        let mut cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.insert("A".to_string(), payload("A"));
        cache.insert("B".to_string(), payload("B"));
        cache.promote("A");
        let stats = cache.stats();
        assert_eq!(stats.total_coins, 2);
        assert_eq!(stats.activated_coins, 1);
        assert_eq!(stats.expired_coins, 1);
    }
}
