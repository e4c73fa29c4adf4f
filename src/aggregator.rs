//! Trade Aggregator (C5): folds one parsed trade into a watchlist entry's
//! aggregation buffer, the all-time-high cache, and the stale-data watchdog's
//! `last_trade_at` bookkeeping (spec.md §4.5).
//!
//! Grounded on `detector/spread.rs`'s `handle_trade`/`handle_price_change`
//! split (per-key mutable state update driven by a channel message,
//! producer/consumer split between the WS layer and the processing layer),
//! generalized from bid/ask spread tracking to OHLC/volume/whale/wallet
//! aggregation. Field-level semantics grounded on
//! `examples/original_source/backend/tests/unit/test_trade_processing.py`.

use std::time::Instant;

use crate::config::Config;
use crate::db::ath_sink::AthCache;
use crate::types::{RawTrade, TradeSide, WatchdogState, WatchlistEntry};

/// Folds `trade` into `entry`'s buffer, updates `ath_cache` and `watchdog`.
/// All updates are atomic from the caller's perspective — no suspension
/// points occur inside this function (spec.md §5).
pub fn process_trade(
    entry: &mut WatchlistEntry,
    watchdog: &mut WatchdogState,
    ath_cache: &mut AthCache,
    trade: &RawTrade,
    cfg: &Config,
    now: Instant,
) {
    let buf = &mut entry.buffer;

    if trade.v_tokens_in_bonding_curve == 0.0 {
        return;
    }
    let price = trade.v_sol_in_bonding_curve / trade.v_tokens_in_bonding_curve;

    if buf.open.is_none() {
        buf.open = Some(price);
    }
    buf.close = Some(price);
    buf.high = buf.high.max(price);
    buf.low = buf.low.min(price);

    buf.vol += trade.sol_amount;

    match trade.side {
        TradeSide::Buy => {
            buf.buys += 1;
            buf.vol_buy += trade.sol_amount;
            buf.max_buy = buf.max_buy.max(trade.sol_amount);
            if trade.sol_amount >= cfg.whale_threshold_sol {
                buf.whale_buys += 1;
                buf.whale_buy_vol += trade.sol_amount;
            }
        }
        TradeSide::Sell => {
            buf.sells += 1;
            buf.vol_sell += trade.sol_amount;
            buf.max_sell = buf.max_sell.max(trade.sol_amount);
            if trade.sol_amount >= cfg.whale_threshold_sol {
                buf.whale_sells += 1;
                buf.whale_sell_vol += trade.sol_amount;
            }
            if entry.meta.creator_address.as_deref() == Some(trade.trader_public_key.as_str()) {
                buf.dev_sold_amount += trade.sol_amount;
            }
        }
    }

    if trade.sol_amount < 0.01 {
        buf.micro_trades += 1;
    }

    buf.wallets.insert(trade.trader_public_key.clone());
    buf.v_sol = trade.v_sol_in_bonding_curve;
    buf.mcap = price * crate::config::TOKEN_SUPPLY;

    watchdog.last_trade_at = Some(now);
    ath_cache.observe(&trade.mint, price);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActiveStream, AggregationBuffer};
    use chrono::Utc;

    fn cfg() -> Config {
        let mut c = Config::from_env().unwrap();
        c.whale_threshold_sol = 1.0;
        c
    }

    fn entry(creator: Option<&str>) -> WatchlistEntry {
        WatchlistEntry {
            meta: ActiveStream {
                phase_id: 1,
                created_at: Utc::now(),
                started_at: Utc::now(),
                creator_address: creator.map(|s| s.to_string()),
                ath_price_sol: 0.0,
            },
            buffer: AggregationBuffer::default(),
            interval_seconds: 5,
            next_flush_at: Instant::now(),
        }
    }

    fn trade(side: TradeSide, amount: f64, trader: &str) -> RawTrade {
        RawTrade {
            mint: "M".to_string(),
            side,
            sol_amount: amount,
            v_sol_in_bonding_curve: 30.0,
            v_tokens_in_bonding_curve: 1_000_000.0,
            trader_public_key: trader.to_string(),
        }
    }

    #[test]
    fn buy_updates_vol_buy_and_max_buy() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.25, "w1"), &cfg(), Instant::now());
        assert_eq!(e.buffer.buys, 1);
        assert!((e.buffer.vol_buy - 0.25).abs() < 1e-9);
        assert!((e.buffer.max_buy - 0.25).abs() < 1e-9);
    }

    #[test]
    fn whale_threshold_is_inclusive() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 1.0, "w1"), &cfg(), Instant::now());
        assert_eq!(e.buffer.whale_buys, 1);
    }

    #[test]
    fn below_whale_threshold_not_counted() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.99, "w1"), &cfg(), Instant::now());
        assert_eq!(e.buffer.whale_buys, 0);
    }

    #[test]
    fn micro_trade_strictly_less_than_threshold() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.009, "w1"), &cfg(), Instant::now());
        assert_eq!(e.buffer.micro_trades, 1);

        let mut e2 = entry(None);
        process_trade(&mut e2, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.01, "w1"), &cfg(), Instant::now());
        assert_eq!(e2.buffer.micro_trades, 0, "exactly 0.01 is not micro (strict <)");
    }

    #[test]
    fn dev_sold_amount_tracked_only_for_creator() {
        let mut e = entry(Some("creator1"));
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Sell, 0.4, "creator1"), &cfg(), Instant::now());
        assert!((e.buffer.dev_sold_amount - 0.4).abs() < 1e-9);

        let mut e2 = entry(Some("creator1"));
        process_trade(&mut e2, &mut wd, &mut ath, &trade(TradeSide::Sell, 0.4, "someoneelse"), &cfg(), Instant::now());
        assert_eq!(e2.buffer.dev_sold_amount, 0.0);
    }

    #[test]
    fn ohlc_tracks_across_multiple_trades() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        let t1 = RawTrade { v_sol_in_bonding_curve: 10.0, v_tokens_in_bonding_curve: 1_000_000.0, ..trade(TradeSide::Buy, 1.0, "a") };
        let t2 = RawTrade { v_sol_in_bonding_curve: 20.0, v_tokens_in_bonding_curve: 1_000_000.0, ..trade(TradeSide::Buy, 1.0, "b") };
        let t3 = RawTrade { v_sol_in_bonding_curve: 5.0, v_tokens_in_bonding_curve: 1_000_000.0, ..trade(TradeSide::Buy, 1.0, "c") };
        process_trade(&mut e, &mut wd, &mut ath, &t1, &cfg(), Instant::now());
        process_trade(&mut e, &mut wd, &mut ath, &t2, &cfg(), Instant::now());
        process_trade(&mut e, &mut wd, &mut ath, &t3, &cfg(), Instant::now());
        assert_eq!(e.buffer.open, Some(0.00001));
        assert_eq!(e.buffer.close, Some(0.000005));
        assert_eq!(e.buffer.high, 0.00002);
        assert_eq!(e.buffer.low, 0.000005);
    }

    #[test]
    fn wallets_track_unique_traders() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.1, "a"), &cfg(), Instant::now());
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.1, "a"), &cfg(), Instant::now());
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.1, "b"), &cfg(), Instant::now());
        assert_eq!(e.buffer.wallets.len(), 2);
        assert_eq!(e.buffer.buys, 3);
    }

    #[test]
    fn ath_cache_marks_dirty_on_new_high() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        process_trade(&mut e, &mut wd, &mut ath, &trade(TradeSide::Buy, 0.1, "a"), &cfg(), Instant::now());
        assert_eq!(ath.dirty_count(), 1);
        assert!(ath.get("M") > 0.0);
    }

    #[test]
    fn repeated_identical_trade_is_independent_not_deduped() {
        let mut e = entry(None);
        let mut wd = WatchdogState::default();
        let mut ath = AthCache::default();
        let t = trade(TradeSide::Buy, 0.2, "a");
        process_trade(&mut e, &mut wd, &mut ath, &t, &cfg(), Instant::now());
        process_trade(&mut e, &mut wd, &mut ath, &t, &cfg(), Instant::now());
        assert_eq!(e.buffer.buys, 2);
        assert!((e.buffer.vol_buy - 0.4).abs() < 1e-9);
    }
}
