//! ATH sink (C8): flushes the dirty subset of the all-time-high cache on its
//! own cadence, independent of the metric sink (spec.md §4.8).
//!
//! Grounded on `scorer/market_scorer.rs`'s own-interval background task and
//! its `ON CONFLICT ... DO UPDATE` upsert idiom, generalized to a single
//! multi-row update keyed by mint via `UNNEST`.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use crate::types::Mint;

/// `Mint -> price`; `dirty` marks entries changed since the last flush.
#[derive(Default)]
pub struct AthCache {
    prices: HashMap<Mint, f64>,
    dirty: HashSet<Mint>,
}

impl AthCache {
    pub fn get(&self, mint: &str) -> f64 {
        self.prices.get(mint).copied().unwrap_or(0.0)
    }

    pub fn seed(&mut self, mint: Mint, price: f64) {
        self.prices.insert(mint, price);
    }

    /// Updates the cache if `price` is a new high; marks the mint dirty.
    pub fn observe(&mut self, mint: &str, price: f64) {
        let current = self.prices.get(mint).copied().unwrap_or(0.0);
        if price > current {
            self.prices.insert(mint.to_string(), price);
            self.dirty.insert(mint.to_string());
        }
    }

    pub fn remove(&mut self, mint: &str) {
        self.prices.remove(mint);
        self.dirty.remove(mint);
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Full `mint -> price` snapshot, used to seed `ActiveRegistry::refresh`'s
    /// `in_memory_ath` argument so a freshly-observed high isn't clobbered by
    /// a stale value still sitting in the store (spec.md §4.3).
    pub fn snapshot(&self) -> HashMap<Mint, f64> {
        self.prices.clone()
    }
}

pub struct AthSink {
    pool: PgPool,
}

impl AthSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes every dirty `(mint, price)` pair in one statement. On failure
    /// the dirty set is retained so the next flush attempt retries it.
    pub async fn flush(&self, cache: &mut AthCache) {
        if cache.dirty.is_empty() {
            return;
        }

        let mints: Vec<String> = cache.dirty.iter().cloned().collect();
        let prices: Vec<f64> = mints.iter().map(|m| cache.prices[m]).collect();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE coin_streams AS s
            SET ath_price_sol = u.price, ath_timestamp = $3
            FROM (SELECT * FROM UNNEST($1::text[], $2::float8[]) AS t(mint, price)) AS u
            WHERE s.token_address = u.mint
            "#,
        )
        .bind(&mints)
        .bind(&prices)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => cache.dirty.clear(),
            Err(e) => error!("ATH sink flush failed, retaining {} dirty mints: {e}", mints.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_only_updates_on_higher_price() {
        let mut cache = AthCache::default();
        cache.observe("M", 1.0);
        assert_eq!(cache.get("M"), 1.0);
        assert_eq!(cache.dirty_count(), 1);

        cache.observe("M", 0.5);
        assert_eq!(cache.get("M"), 1.0, "lower price must not overwrite ATH");
    }

    #[test]
    fn seed_does_not_mark_dirty() {
        let mut cache = AthCache::default();
        cache.seed("M".to_string(), 2.0);
        assert_eq!(cache.dirty_count(), 0);
        assert_eq!(cache.get("M"), 2.0);
    }
}
