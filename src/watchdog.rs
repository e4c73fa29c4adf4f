//! Stale-Data Watchdog (C7): a coarse-cadence sweep independent of the
//! flush-time stale-signature check in C6, catching subscriptions that have
//! produced no trade at all for an extended period (spec.md §4.7).
//!
//! Grounded on the teacher's own-interval background task shape
//! (`scorer/market_scorer.rs`, `market_refresh.rs`: `interval.tick().await`
//! then a fallible per-tick sweep method). The 10-minute zombie threshold is
//! grounded on
//! `examples/original_source/backend/tests/integration/test_zombie_detection.py::TestZombieWatchdogTiming`.

use std::collections::HashMap;
use std::time::Instant;

use tracing::warn;

use crate::config::WATCHDOG_ZOMBIE_THRESHOLD_SECS;
use crate::types::{Mint, WatchdogState};
use crate::ws::subscription::SubscriptionHandle;

/// Forces a resubscribe for every mint idle strictly more than
/// `WATCHDOG_ZOMBIE_THRESHOLD_SECS` without a single observed trade
/// (exactly-at-threshold does not trigger — spec.md §8), resetting
/// `last_trade_at` to `now` so the same mint isn't re-flagged before the
/// next real trade or the next full threshold elapses again.
///
/// Returns the mints that were force-resubscribed, for logging/metrics by
/// the caller.
pub fn sweep(
    watchdogs: &mut HashMap<Mint, WatchdogState>,
    subs: &SubscriptionHandle,
    now: Instant,
) -> Vec<Mint> {
    let mut flagged = Vec::new();

    for (mint, state) in watchdogs.iter_mut() {
        let idle_secs = state
            .last_trade_at
            .map(|t| now.duration_since(t).as_secs())
            .unwrap_or(u64::MAX);

        if idle_secs > WATCHDOG_ZOMBIE_THRESHOLD_SECS {
            warn!(mint = %mint, idle_secs, "zombie subscription detected, forcing resubscribe");
            subs.force_resubscribe(mint.clone());
            state.last_trade_at = Some(now);
            flagged.push(mint.clone());
        }
    }

    flagged
}
