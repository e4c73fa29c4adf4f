//! Name/Burst Filter (C2): rejects newly-created tokens by name pattern or
//! recent-duplicate burst, before they ever reach the cache (spec.md §4.2).
//!
//! No direct teacher analogue; `regex` usage follows the teacher's
//! parse-or-default convention in `config.rs`. Burst/spam semantics grounded
//! on `examples/original_source/tests/unit/test_coin_filter.py`.

use std::time::{Duration, Instant};

use regex::Regex;

use crate::types::{FilterOutcome, RejectReason};

pub struct CoinFilter {
    bad_names: Regex,
    burst_window: Duration,
    /// (seen_at, name, symbol), pruned on every evaluation.
    recent: Vec<(Instant, String, String)>,
}

impl CoinFilter {
    pub fn new(pattern: &str, burst_window: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            bad_names: Regex::new(&format!("(?i){pattern}"))?,
            burst_window,
            recent: Vec::new(),
        })
    }

    /// Recompiles the bad-name pattern, e.g. on `BAD_NAMES_PATTERN` change.
    pub fn set_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.bad_names = Regex::new(&format!("(?i){pattern}"))?;
        Ok(())
    }

    pub fn evaluate(&mut self, name: &str, symbol: &str) -> FilterOutcome {
        let trimmed = name.trim();

        if self.bad_names.is_match(trimmed) {
            return FilterOutcome::Reject(RejectReason::BadName);
        }

        let now = Instant::now();
        self.recent
            .retain(|(seen_at, _, _)| now.duration_since(*seen_at) <= self.burst_window * 2);

        let burst = self
            .recent
            .iter()
            .any(|(seen_at, n, s)| {
                now.duration_since(*seen_at) <= self.burst_window && (n == trimmed || s == symbol)
            });
        if burst {
            return FilterOutcome::Reject(RejectReason::SpamBurst);
        }

        self.recent.push((now, trimmed.to_string(), symbol.to_string()));
        FilterOutcome::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CoinFilter {
        CoinFilter::new(crate::config::BAD_NAMES_PATTERN, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn rejects_known_bad_name_substrings() {
        let mut f = filter();
        for bad in ["TestCoin", "Trading Bot", "RugPull Coin", "Not A Scam", "Honeypot Token", "Free Faucet"] {
            assert_eq!(f.evaluate(bad, "X"), FilterOutcome::Reject(RejectReason::BadName));
        }
    }

    #[test]
    fn case_insensitive_matching() {
        let mut f = filter();
        assert_eq!(f.evaluate("TESTCOIN", "TEST"), FilterOutcome::Reject(RejectReason::BadName));
        assert_eq!(f.evaluate("TeSt CoIn", "TsT"), FilterOutcome::Reject(RejectReason::BadName));
    }

    #[test]
    fn good_coin_passes_and_is_tracked() {
        let mut f = filter();
        assert_eq!(f.evaluate("Moon Rocket", "MOON"), FilterOutcome::Accept);
        assert_eq!(f.recent.len(), 1);
    }

    #[test]
    fn duplicate_name_within_window_is_spam_burst() {
        let mut f = filter();
        assert_eq!(f.evaluate("Duplicate Coin", "DUP1"), FilterOutcome::Accept);
        assert_eq!(
            f.evaluate("Duplicate Coin", "DUP2"),
            FilterOutcome::Reject(RejectReason::SpamBurst)
        );
    }

    #[test]
    fn duplicate_symbol_within_window_is_spam_burst() {
        let mut f = filter();
        assert_eq!(f.evaluate("First Coin", "SAME"), FilterOutcome::Accept);
        assert_eq!(
            f.evaluate("Second Coin", "SAME"),
            FilterOutcome::Reject(RejectReason::SpamBurst)
        );
    }

    #[test]
    fn similar_but_distinct_names_pass() {
        let mut f = filter();
        assert_eq!(f.evaluate("Moon Coin", "MOON1"), FilterOutcome::Accept);
        assert_eq!(f.evaluate("Moon Token", "MOON2"), FilterOutcome::Accept);
    }

    #[test]
    fn empty_and_unicode_names_do_not_panic() {
        let mut f = filter();
        assert_eq!(f.evaluate("", "EMPTY"), FilterOutcome::Accept);
        assert_eq!(f.evaluate("\u{1f680} Rocket Moon \u{1f319}", "ROCKET"), FilterOutcome::Accept);
    }

    #[test]
    fn whitespace_is_trimmed_before_matching() {
        let mut f = filter();
        assert_eq!(f.evaluate("  Test Coin  ", "TST"), FilterOutcome::Reject(RejectReason::BadName));
    }
}
