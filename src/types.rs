use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Mint
// ---------------------------------------------------------------------------

/// Opaque token identifier, globally unique per token on the upstream feed.
pub type Mint = String;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// Creation-event payload as received from the upstream WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationPayload {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    #[serde(rename = "marketCapSol")]
    pub market_cap_sol: Option<f64>,
    #[serde(rename = "vTokensInBondingCurve")]
    pub v_tokens_in_bonding_curve: Option<f64>,
    #[serde(rename = "vSolInBondingCurve")]
    pub v_sol_in_bonding_curve: Option<f64>,
    #[serde(rename = "bondingCurveKey")]
    pub bonding_curve_key: Option<String>,
    #[serde(rename = "traderPublicKey")]
    pub trader_public_key: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Buy/sell trade payload as received from the upstream WebSocket.
#[derive(Debug, Clone)]
pub struct RawTrade {
    pub mint: String,
    pub side: TradeSide,
    pub sol_amount: f64,
    pub v_sol_in_bonding_curve: f64,
    pub v_tokens_in_bonding_curve: f64,
    pub trader_public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A parsed upstream frame, demuxed by `txType` at the wire boundary.
/// Downstream components never see raw JSON.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Create(CreationPayload),
    Trade(RawTrade),
}

// ---------------------------------------------------------------------------
// Discovery Cache (C1)
// ---------------------------------------------------------------------------

/// A cached token awaiting registry confirmation (C1 entry).
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub discovered_at: Instant,
    pub metadata: CreationPayload,
    /// Ordered by arrival; append-only until promotion or expiry.
    pub buffered_trades: Vec<(Instant, RawTrade)>,
    pub activated: bool,
    pub forwarded: bool,
}

/// Snapshot returned by `DiscoveryCache::stats()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total_coins: usize,
    pub activated_coins: usize,
    pub expired_coins: usize,
    pub oldest_age_seconds: f64,
    pub newest_age_seconds: f64,
}

// ---------------------------------------------------------------------------
// Active Registry (C3)
// ---------------------------------------------------------------------------

/// Terminal phase sentinels (spec.md §3).
pub const PHASE_FINISHED: i64 = 99;
pub const PHASE_GRADUATED: i64 = 100;

/// Immutable-per-run phase reference row.
#[derive(Debug, Clone)]
pub struct Phase {
    pub id: i64,
    pub name: String,
    pub interval_seconds: u64,
    pub max_age_minutes: f64,
}

/// Mirror of the store's active-stream row (C3 entry).
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub phase_id: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub creator_address: Option<String>,
    pub ath_price_sol: f64,
}

/// A `coin_streams` write produced by one C6 sweep: a phase switch or a
/// terminal transition (graduation/finished). Driven off `SweepOutcome` and
/// applied by the Active Registry alongside the metric batch (spec.md §4.6,
/// §6: "`coin_streams` ... updated on phase switch, terminal transitions").
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub mint: Mint,
    pub phase_id: i64,
    pub is_active: bool,
    pub is_graduated: bool,
}

// ---------------------------------------------------------------------------
// Aggregation buffer / watchlist (C5 / C6)
// ---------------------------------------------------------------------------

/// Per-token OHLCV-style aggregation buffer, reset on each flush.
#[derive(Debug, Clone)]
pub struct AggregationBuffer {
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub vol: f64,
    pub vol_buy: f64,
    pub vol_sell: f64,
    pub buys: u64,
    pub sells: u64,
    pub max_buy: f64,
    pub max_sell: f64,
    pub whale_buy_vol: f64,
    pub whale_sell_vol: f64,
    pub whale_buys: u64,
    pub whale_sells: u64,
    pub dev_sold_amount: f64,
    pub micro_trades: u64,
    pub wallets: HashSet<String>,
    pub v_sol: f64,
    pub mcap: f64,
}

impl Default for AggregationBuffer {
    fn default() -> Self {
        Self {
            open: None,
            close: None,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            vol: 0.0,
            vol_buy: 0.0,
            vol_sell: 0.0,
            buys: 0,
            sells: 0,
            max_buy: 0.0,
            max_sell: 0.0,
            whale_buy_vol: 0.0,
            whale_sell_vol: 0.0,
            whale_buys: 0,
            whale_sells: 0,
            dev_sold_amount: 0.0,
            micro_trades: 0,
            wallets: HashSet::new(),
            v_sol: 0.0,
            mcap: 0.0,
        }
    }
}

/// Derived metrics computed only at flush time (spec.md §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedMetrics {
    pub net_volume: f64,
    pub volatility_pct: f64,
    pub avg_trade_size: f64,
    pub buy_pressure: f64,
    pub unique_signer_ratio: f64,
}

impl AggregationBuffer {
    pub fn derived(&self) -> DerivedMetrics {
        let trades = self.buys + self.sells;
        let open = self.open.unwrap_or(0.0);
        DerivedMetrics {
            net_volume: self.vol_buy - self.vol_sell,
            volatility_pct: if open > 0.0 {
                (self.high - self.low) / open * 100.0
            } else {
                0.0
            },
            avg_trade_size: if trades > 0 {
                self.vol / trades as f64
            } else {
                0.0
            },
            buy_pressure: if self.vol_buy + self.vol_sell > 0.0 {
                self.vol_buy / (self.vol_buy + self.vol_sell)
            } else {
                0.0
            },
            unique_signer_ratio: if trades > 0 {
                self.wallets.len() as f64 / trades as f64
            } else {
                0.0
            },
        }
    }
}

/// Per-token watchlist entry (C5/C6), installed on promotion from the cache.
#[derive(Debug, Clone)]
pub struct WatchlistEntry {
    pub meta: ActiveStream,
    pub buffer: AggregationBuffer,
    pub interval_seconds: u64,
    pub next_flush_at: Instant,
}

/// Stale-flush / zombie-subscription bookkeeping (C7), keyed by `Mint`.
#[derive(Debug, Clone, Default)]
pub struct WatchdogState {
    pub last_trade_at: Option<Instant>,
    pub last_saved_signature: Option<(f64, f64, u64)>,
    pub stale_warnings: u32,
}

/// A fully computed row handed to the metric sink at flush time.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub mint: Mint,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub phase_id_at_time: i64,
    pub price_open: f64,
    pub price_high: f64,
    pub price_low: f64,
    pub price_close: f64,
    pub market_cap_close: f64,
    pub bonding_curve_pct: f64,
    pub virtual_sol_reserves: f64,
    pub is_koth: bool,
    pub volume_sol: f64,
    pub buy_volume_sol: f64,
    pub sell_volume_sol: f64,
    pub num_buys: u64,
    pub num_sells: u64,
    pub unique_wallets: u64,
    pub num_micro_trades: u64,
    pub dev_sold_amount: f64,
    pub max_single_buy_sol: f64,
    pub max_single_sell_sol: f64,
    pub net_volume_sol: f64,
    pub volatility_pct: f64,
    pub avg_trade_size_sol: f64,
    pub whale_buy_volume_sol: f64,
    pub whale_sell_volume_sol: f64,
    pub num_whale_buys: u64,
    pub num_whale_sells: u64,
    pub buy_pressure_ratio: f64,
    pub unique_signer_ratio: f64,
}

// ---------------------------------------------------------------------------
// Filter (C2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BadName,
    SpamBurst,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::BadName => "bad_name",
            RejectReason::SpamBurst => "spam_burst",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Accept,
    Reject(RejectReason),
}

// ---------------------------------------------------------------------------
// Channel message types
// ---------------------------------------------------------------------------

/// Control messages accepted by the Subscription Manager's batcher (C4).
#[derive(Debug, Clone)]
pub enum ControlMsg {
    Subscribe(Mint),
    Unsubscribe(Mint),
    /// Force an immediate unsubscribe-then-subscribe cycle for one mint.
    ForceResubscribe(Mint),
    /// Signals a fresh upstream connection: replays `subscribeNewToken` plus
    /// the full `subscribed` set as one batch (spec.md §4.4 `on_connected`).
    Connected,
}
