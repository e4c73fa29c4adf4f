//! Metric sink (C8): writes the batch of rows produced by one phase-scheduler
//! sweep as a single multi-row insert against `coin_metrics`.
//!
//! Grounded on `db/writer.rs`'s `DbWriter` shape (owns a pool, `run(self)`
//! drains an `mpsc::Receiver`), generalized from upsert-on-close to a pure
//! batched insert since metric rows are always new (spec.md §4.8).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::PgPool;
use tracing::error;

use crate::config::KOTH_MCAP_THRESHOLD;
use crate::types::MetricRow;

#[derive(Default)]
pub struct MetricSinkStats {
    pub insert_errors: AtomicU64,
}

pub struct MetricSink {
    pool: PgPool,
    stats: Arc<MetricSinkStats>,
}

impl MetricSink {
    pub fn new(pool: PgPool, stats: Arc<MetricSinkStats>) -> Self {
        Self { pool, stats }
    }

    /// Writes `rows` in one multi-row insert. On failure the whole batch is
    /// dropped — rows regenerate on the next flush interval, acceptable
    /// under at-most-once per window (spec.md §4.8, §7 TransientStore).
    pub async fn write_batch(&self, rows: &[MetricRow]) {
        if rows.is_empty() {
            return;
        }

        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO coin_metrics (
                mint, timestamp, phase_id_at_time,
                price_open, price_high, price_low, price_close,
                market_cap_close, bonding_curve_pct, virtual_sol_reserves, is_koth,
                volume_sol, buy_volume_sol, sell_volume_sol, num_buys, num_sells,
                unique_wallets, num_micro_trades, dev_sold_amount,
                max_single_buy_sol, max_single_sell_sol, net_volume_sol,
                volatility_pct, avg_trade_size_sol,
                whale_buy_volume_sol, whale_sell_volume_sol,
                num_whale_buys, num_whale_sells,
                buy_pressure_ratio, unique_signer_ratio
            ) ",
        );

        qb.push_values(rows, |mut b, row| {
            b.push_bind(&row.mint)
                .push_bind(row.timestamp)
                .push_bind(row.phase_id_at_time)
                .push_bind(row.price_open)
                .push_bind(row.price_high)
                .push_bind(row.price_low)
                .push_bind(row.price_close)
                .push_bind(row.market_cap_close)
                .push_bind(row.bonding_curve_pct)
                .push_bind(row.virtual_sol_reserves)
                .push_bind(row.market_cap_close > KOTH_MCAP_THRESHOLD)
                .push_bind(row.volume_sol)
                .push_bind(row.buy_volume_sol)
                .push_bind(row.sell_volume_sol)
                .push_bind(row.num_buys as i64)
                .push_bind(row.num_sells as i64)
                .push_bind(row.unique_wallets as i64)
                .push_bind(row.num_micro_trades as i64)
                .push_bind(row.dev_sold_amount)
                .push_bind(row.max_single_buy_sol)
                .push_bind(row.max_single_sell_sol)
                .push_bind(row.net_volume_sol)
                .push_bind(row.volatility_pct)
                .push_bind(row.avg_trade_size_sol)
                .push_bind(row.whale_buy_volume_sol)
                .push_bind(row.whale_sell_volume_sol)
                .push_bind(row.num_whale_buys as i64)
                .push_bind(row.num_whale_sells as i64)
                .push_bind(row.buy_pressure_ratio)
                .push_bind(row.unique_signer_ratio);
        });

        if let Err(e) = qb.build().execute(&self.pool).await {
            error!("metric sink insert failed, dropping batch of {}: {e}", rows.len());
            self.stats.insert_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// `is_koth` per spec.md glossary: `mcap_close > 30000` at flush time.
pub fn is_koth(mcap_close: f64) -> bool {
    mcap_close > KOTH_MCAP_THRESHOLD
}
