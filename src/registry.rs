//! Active Registry (C3): mirror of the store's set of active token streams,
//! periodically refreshed (spec.md §4.3).
//!
//! Grounded on `market_refresh.rs`'s `MarketRefresher` — a periodic
//! fetch-then-diff-against-store pattern, reused here as a
//! query-then-replace-snapshot. Phase reference loading follows the same
//! typed-fetch-returns-`Result` convention as `fetcher.rs`.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use sqlx::{PgPool, Row};

use crate::error::{AppError, Result};
use crate::types::{ActiveStream, Mint, Phase, StreamUpdate};

pub struct ActiveRegistry {
    pool: PgPool,
    dsn: String,
    /// Set when the DSN changes at runtime; forces a pool recreation before
    /// the next refresh (spec.md §4.3).
    force_reconnect: bool,
}

impl ActiveRegistry {
    pub fn new(pool: PgPool, dsn: String) -> Self {
        Self {
            pool,
            dsn,
            force_reconnect: false,
        }
    }

    /// Records a new DSN and arms the forced-reconnect flag for the next
    /// refresh tick.
    pub fn set_dsn(&mut self, dsn: String) {
        self.dsn = dsn;
        self.force_reconnect = true;
    }

    /// Loads the immutable phase reference table. An empty table is treated
    /// as a startup error — see SPEC_FULL.md's Open Questions decision.
    pub async fn load_phases(&self) -> Result<Vec<Phase>> {
        let rows = sqlx::query("SELECT id, name, interval_seconds, max_age_minutes FROM ref_coin_phases")
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Err(AppError::Bootstrap(
                "ref_coin_phases table is empty — refusing to guess a fallback phase".to_string(),
            ));
        }

        Ok(rows
            .into_iter()
            .map(|r| Phase {
                id: r.get::<i64, _>("id"),
                name: r.get::<String, _>("name"),
                interval_seconds: r.get::<i64, _>("interval_seconds") as u64,
                max_age_minutes: r.get::<f64, _>("max_age_minutes"),
            })
            .collect())
    }

    /// Joins `coin_streams` with `discovered_coins`, filtered to
    /// `is_active = true`. Normalizes timestamps to UTC (assumed UTC when
    /// absent — the store is expected to store UTC instants already).
    pub async fn refresh(&mut self, in_memory_ath: &HashMap<Mint, f64>) -> Result<(PgPool, HashMap<Mint, ActiveStream>)> {
        if self.force_reconnect {
            self.pool.close().await;
            self.pool = PgPool::connect(&self.dsn).await?;
            self.force_reconnect = false;
        }

        let rows = sqlx::query(
            r#"
            SELECT s.token_address, s.current_phase_id, s.started_at, s.ath_price_sol,
                   d.trader_public_key, d.token_created_at
            FROM coin_streams s
            JOIN discovered_coins d ON d.mint = s.token_address
            WHERE s.is_active = true
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let mint: String = row.get("token_address");
            let created_at: chrono::DateTime<Utc> = row
                .try_get("token_created_at")
                .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap());
            let started_at: chrono::DateTime<Utc> = row
                .try_get("started_at")
                .unwrap_or(created_at);
            let stored_ath: f64 = row.try_get("ath_price_sol").unwrap_or(0.0);
            let seeded_ath = stored_ath.max(in_memory_ath.get(&mint).copied().unwrap_or(0.0));

            map.insert(
                mint,
                ActiveStream {
                    phase_id: row.get("current_phase_id"),
                    created_at,
                    started_at,
                    creator_address: row.try_get("trader_public_key").ok(),
                    ath_price_sol: seeded_ath,
                },
            );
        }

        Ok((self.pool.clone(), map))
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Writes every phase-switch and terminal-transition update produced by
    /// one C6 sweep in a single multi-row statement, keyed by
    /// `token_address` (spec.md §4.6 step 1-2, §6: "updated on phase switch,
    /// terminal transitions"). On failure the whole batch is dropped — the
    /// store keeps its previous row and the next sweep's in-memory state
    /// (already advanced) will simply re-attempt the same write next time a
    /// transition recomputes it, same at-most-once-per-window tolerance as
    /// the metric sink (spec.md §7 TransientStore).
    pub async fn write_stream_updates(&self, updates: &[StreamUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mints: Vec<String> = updates.iter().map(|u| u.mint.clone()).collect();
        let phase_ids: Vec<i64> = updates.iter().map(|u| u.phase_id).collect();
        let is_active: Vec<bool> = updates.iter().map(|u| u.is_active).collect();
        let is_graduated: Vec<bool> = updates.iter().map(|u| u.is_graduated).collect();

        sqlx::query(
            r#"
            UPDATE coin_streams AS s
            SET current_phase_id = u.phase_id, is_active = u.is_active, is_graduated = u.is_graduated
            FROM (
                SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::bool[], $4::bool[])
                    AS t(mint, phase_id, is_active, is_graduated)
            ) AS u
            WHERE s.token_address = u.mint
            "#,
        )
        .bind(&mints)
        .bind(&phase_ids)
        .bind(&is_active)
        .bind(&is_graduated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Picks the smallest phase id whose `max_age_minutes` is strictly greater
/// than `age_minutes`; `None` means the token has aged past every known
/// phase and should transition to `PHASE_FINISHED` (spec.md §4.6).
pub fn next_phase_for_age<'a>(phases: &'a [Phase], age_minutes: f64) -> Option<&'a Phase> {
    phases
        .iter()
        .filter(|p| p.max_age_minutes > age_minutes)
        .min_by(|a, b| a.max_age_minutes.partial_cmp(&b.max_age_minutes).unwrap())
}
