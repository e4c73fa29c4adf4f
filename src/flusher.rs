//! Phase Scheduler & Flusher (C6): runs once per sweep over the watchlist,
//! handling graduation, phase-age transitions (with forced resubscribe), and
//! the interval-driven flush/stale-signature check (spec.md §4.6).
//!
//! Grounded on the teacher's per-tick sweep pattern in `market_refresh.rs`
//! (`refresh()` diffing current vs. fresh state and issuing control
//! messages), generalized to per-token phase/flush-interval bookkeeping.
//! Stale-signature suppression and the warning-count/resubscribe threshold
//! are grounded on
//! `examples/original_source/backend/tests/integration/test_zombie_detection.py::TestStaleDataDetection`.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{
    Config, GRADUATION_BONDING_PCT, KOTH_MCAP_THRESHOLD, STALE_RESUBSCRIBE_IDLE_SECS,
    STALE_RESUBSCRIBE_WARNINGS,
};
use crate::registry::next_phase_for_age;
use crate::types::{
    AggregationBuffer, Mint, MetricRow, Phase, PHASE_FINISHED, PHASE_GRADUATED, StreamUpdate,
    WatchdogState, WatchlistEntry,
};
use crate::ws::subscription::SubscriptionHandle;

/// Side effects collected from one sweep; handed to the batch sinks and the
/// supervisor's registry/subscription bookkeeping by the caller.
#[derive(Default)]
pub struct SweepOutcome {
    pub rows: Vec<MetricRow>,
    pub graduated: Vec<Mint>,
    pub finished: Vec<Mint>,
    /// `coin_streams` writes for every phase switch and terminal transition
    /// observed this sweep (spec.md §4.6 step 1-2, §6).
    pub stream_updates: Vec<StreamUpdate>,
}

/// Runs the graduation/phase-transition/flush sequence over every watchlist
/// entry. `watchdogs` must contain an entry for every `Mint` in `watchlist`
/// (the supervisor inserts a default on promotion).
pub fn sweep(
    watchlist: &mut HashMap<Mint, WatchlistEntry>,
    watchdogs: &mut HashMap<Mint, WatchdogState>,
    phases: &[Phase],
    cfg: &Config,
    subs: &SubscriptionHandle,
    now: Instant,
    now_utc: DateTime<Utc>,
) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();
    let mints: Vec<Mint> = watchlist.keys().cloned().collect();

    for mint in mints {
        let Some(entry) = watchlist.get_mut(&mint) else { continue };

        // 1. Graduation: bonding curve effectively full.
        let bonding_pct = if cfg.sol_reserves_full > 0.0 {
            entry.buffer.v_sol / cfg.sol_reserves_full * 100.0
        } else {
            0.0
        };
        if bonding_pct >= GRADUATION_BONDING_PCT {
            info!(mint = %mint, bonding_pct, "token graduated, removing from watchlist");
            watchlist.remove(&mint);
            watchdogs.remove(&mint);
            outcome.stream_updates.push(StreamUpdate {
                mint: mint.clone(),
                phase_id: PHASE_GRADUATED,
                is_active: false,
                is_graduated: true,
            });
            outcome.graduated.push(mint);
            continue;
        }

        // 2. Phase transition by age.
        let age_minutes = ((now_utc - entry.meta.created_at).num_seconds() as f64 / 60.0
            - cfg.age_calculation_offset_min)
            .max(0.0);
        let current_max_age = phases
            .iter()
            .find(|p| p.id == entry.meta.phase_id)
            .map(|p| p.max_age_minutes)
            .unwrap_or(f64::INFINITY);

        if current_max_age < age_minutes {
            match next_phase_for_age(phases, age_minutes) {
                Some(next) => {
                    entry.meta.phase_id = next.id;
                    entry.interval_seconds = next.interval_seconds;
                    entry.next_flush_at = now + std::time::Duration::from_secs(next.interval_seconds);
                    subs.force_resubscribe(mint.clone());
                    info!(mint = %mint, new_phase = next.id, interval = next.interval_seconds, "phase transition");
                    outcome.stream_updates.push(StreamUpdate {
                        mint: mint.clone(),
                        phase_id: next.id,
                        is_active: true,
                        is_graduated: false,
                    });
                }
                None => {
                    info!(mint = %mint, age_minutes, "token aged past final phase, marking finished");
                    entry.meta.phase_id = PHASE_FINISHED;
                    watchlist.remove(&mint);
                    watchdogs.remove(&mint);
                    outcome.stream_updates.push(StreamUpdate {
                        mint: mint.clone(),
                        phase_id: PHASE_FINISHED,
                        is_active: false,
                        is_graduated: false,
                    });
                    outcome.finished.push(mint);
                    continue;
                }
            }
        }

        // 3. Flush check.
        let entry = watchlist.get_mut(&mint).expect("entry present, not removed above");
        if now < entry.next_flush_at {
            continue;
        }

        let interval = entry.interval_seconds;
        if entry.buffer.vol > 0.0 {
            let signature = (
                entry.buffer.close.unwrap_or(0.0),
                entry.buffer.vol,
                entry.buffer.buys + entry.buffer.sells,
            );
            let watchdog = watchdogs.entry(mint.clone()).or_default();

            if watchdog.last_saved_signature == Some(signature) {
                watchdog.stale_warnings += 1;
                let idle_too_long = watchdog
                    .last_trade_at
                    .map(|t| now.duration_since(t).as_secs() > STALE_RESUBSCRIBE_IDLE_SECS)
                    .unwrap_or(true);
                if watchdog.stale_warnings >= STALE_RESUBSCRIBE_WARNINGS && idle_too_long {
                    subs.force_resubscribe(mint.clone());
                }
            } else {
                outcome.rows.push(build_row(&mint, entry, now_utc, bonding_pct));
                watchdog.last_saved_signature = Some(signature);
                watchdog.stale_warnings = 0;
            }
        }

        entry.buffer = AggregationBuffer::default();
        entry.next_flush_at = now + std::time::Duration::from_secs(interval);
    }

    outcome
}

fn build_row(mint: &Mint, entry: &WatchlistEntry, now_utc: DateTime<Utc>, bonding_pct: f64) -> MetricRow {
    let buf = &entry.buffer;
    let derived = buf.derived();
    let open = buf.open.unwrap_or(0.0);
    let close = buf.close.unwrap_or(0.0);
    let mcap_close = buf.mcap;

    MetricRow {
        mint: mint.clone(),
        timestamp: now_utc,
        phase_id_at_time: entry.meta.phase_id,
        price_open: open,
        price_high: buf.high,
        price_low: buf.low,
        price_close: close,
        market_cap_close: mcap_close,
        bonding_curve_pct: bonding_pct,
        virtual_sol_reserves: buf.v_sol,
        is_koth: mcap_close > KOTH_MCAP_THRESHOLD,
        volume_sol: buf.vol,
        buy_volume_sol: buf.vol_buy,
        sell_volume_sol: buf.vol_sell,
        num_buys: buf.buys,
        num_sells: buf.sells,
        unique_wallets: buf.wallets.len() as u64,
        num_micro_trades: buf.micro_trades,
        dev_sold_amount: buf.dev_sold_amount,
        max_single_buy_sol: buf.max_buy,
        max_single_sell_sol: buf.max_sell,
        net_volume_sol: derived.net_volume,
        volatility_pct: derived.volatility_pct,
        avg_trade_size_sol: derived.avg_trade_size,
        whale_buy_volume_sol: buf.whale_buy_vol,
        whale_sell_volume_sol: buf.whale_sell_vol,
        num_whale_buys: buf.whale_buys,
        num_whale_sells: buf.whale_sells,
        buy_pressure_ratio: derived.buy_pressure,
        unique_signer_ratio: derived.unique_signer_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActiveStream;
    use tokio::sync::mpsc;

    fn cfg() -> Config {
        let mut c = Config::from_env().unwrap();
        c.sol_reserves_full = 85.0;
        c.age_calculation_offset_min = 0.0;
        c
    }

    fn phases() -> Vec<Phase> {
        vec![
            Phase { id: 1, name: "early".into(), interval_seconds: 5, max_age_minutes: 2.0 },
            Phase { id: 2, name: "mid".into(), interval_seconds: 30, max_age_minutes: 15.0 },
        ]
    }

    fn handle() -> SubscriptionHandle {
        let (tx, _rx) = mpsc::channel(16);
        crate::ws::subscription::SubscriptionManager::new(tx, 16).1
    }

    fn make_entry(phase_id: i64, created_secs_ago: i64, vol: f64, buys: u64) -> WatchlistEntry {
        let mut buf = AggregationBuffer::default();
        buf.vol = vol;
        buf.buys = buys;
        buf.close = Some(0.001);
        buf.open = Some(0.001);
        WatchlistEntry {
            meta: ActiveStream {
                phase_id,
                created_at: Utc::now() - chrono::Duration::seconds(created_secs_ago),
                started_at: Utc::now(),
                creator_address: None,
                ath_price_sol: 0.0,
            },
            buffer: buf,
            interval_seconds: 5,
            next_flush_at: Instant::now(),
        }
    }

    #[test]
    fn phase_transition_on_age_forces_resubscribe() {
        let mut wl = HashMap::new();
        wl.insert("M".to_string(), make_entry(1, 180, 1.0, 1));
        let mut wd = HashMap::new();
        wd.insert("M".to_string(), WatchdogState::default());

        let outcome = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert!(outcome.graduated.is_empty());
        let entry = wl.get("M").unwrap();
        assert_eq!(entry.meta.phase_id, 2);
        assert_eq!(entry.interval_seconds, 30);
        assert_eq!(outcome.stream_updates.len(), 1);
        assert_eq!(outcome.stream_updates[0].phase_id, 2);
        assert!(outcome.stream_updates[0].is_active);
    }

    #[test]
    fn graduation_removes_from_watchlist() {
        let mut entry = make_entry(1, 0, 1.0, 1);
        entry.buffer.v_sol = 90.0; // > 85 * 0.995
        let mut wl = HashMap::new();
        wl.insert("M".to_string(), entry);
        let mut wd = HashMap::new();
        wd.insert("M".to_string(), WatchdogState::default());

        let outcome = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert_eq!(outcome.graduated, vec!["M".to_string()]);
        assert!(wl.is_empty());
        assert_eq!(outcome.stream_updates.len(), 1);
        assert_eq!(outcome.stream_updates[0].phase_id, PHASE_GRADUATED);
        assert!(!outcome.stream_updates[0].is_active);
        assert!(outcome.stream_updates[0].is_graduated);
    }

    #[test]
    fn finished_when_age_exceeds_all_phases() {
        let mut wl = HashMap::new();
        wl.insert("M".to_string(), make_entry(2, 3600, 1.0, 1));
        let mut wd = HashMap::new();
        wd.insert("M".to_string(), WatchdogState::default());

        let outcome = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert_eq!(outcome.finished, vec!["M".to_string()]);
        assert!(wl.is_empty());
        assert_eq!(outcome.stream_updates.len(), 1);
        assert_eq!(outcome.stream_updates[0].phase_id, PHASE_FINISHED);
        assert!(!outcome.stream_updates[0].is_active);
    }

    #[test]
    fn no_row_when_volume_is_zero() {
        let mut e = make_entry(1, 0, 0.0, 0);
        e.next_flush_at = Instant::now() - std::time::Duration::from_secs(1);
        let mut wl = HashMap::new();
        wl.insert("M".to_string(), e);
        let mut wd = HashMap::new();
        wd.insert("M".to_string(), WatchdogState::default());

        let outcome = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn stale_signature_suppresses_second_identical_flush() {
        let mut e = make_entry(1, 0, 1.5, 3);
        e.next_flush_at = Instant::now() - std::time::Duration::from_secs(1);
        let mut wl = HashMap::new();
        wl.insert("M".to_string(), e);
        let mut wd = HashMap::new();
        wd.insert("M".to_string(), WatchdogState::default());

        let first = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert_eq!(first.rows.len(), 1);

        // Buffer was reset; no new trades arrive, but signature now compares
        // against a zero-volume buffer so nothing flushes a second row either.
        let entry = wl.get_mut("M").unwrap();
        entry.next_flush_at = Instant::now() - std::time::Duration::from_secs(1);
        entry.buffer.vol = 1.5;
        entry.buffer.buys = 3;
        entry.buffer.close = Some(0.001);

        let second = sweep(&mut wl, &mut wd, &phases(), &cfg(), &handle(), Instant::now(), Utc::now());
        assert!(second.rows.is_empty());
        assert_eq!(wd.get("M").unwrap().stale_warnings, 1);
    }
}
