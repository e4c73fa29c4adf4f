//! Supervisor (C9): owns every piece of per-mint state and drives the single
//! read loop the rest of the system hangs off of (spec.md §4.9, §5). All of
//! C1-C8's mutable state is touched only from here — the subscription
//! batcher and the HTTP task are the only other tasks in the process, and
//! neither mutates this state (spec.md §5).
//!
//! Grounded on the teacher's `run()`/`WsManager::run` reconnect-with-backoff
//! outer loop, generalized from a single spread-detector pipeline to the
//! full C1-C8 fan-out this service performs inline, single-threaded, on every
//! read-loop tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::automation::{AutomationSink, DiscoveryBatcher};
use crate::cache::DiscoveryCache;
use crate::config::{Config, CHANNEL_CAPACITY, WATCHDOG_INTERVAL_SECS};
use crate::db::ath_sink::{AthCache, AthSink};
use crate::db::metrics_sink::{MetricSink, MetricSinkStats};
use crate::error::{AppError, Result};
use crate::filter::CoinFilter;
use crate::registry::ActiveRegistry;
use crate::types::{
    ActiveStream, AggregationBuffer, CreationPayload, FilterOutcome, Mint, Phase, RawTrade,
    UpstreamEvent, WatchdogState, WatchlistEntry,
};
use crate::ws::connection::{RecvOutcome, UpstreamConnection};
use crate::ws::messages::parse_frame;
use crate::ws::subscription::{SubscriptionHandle, SubscriptionManager};
use crate::{aggregator, flusher, watchdog};

pub struct Supervisor {
    cfg: Config,
    registry: ActiveRegistry,
    phases: Vec<Phase>,
    filter: CoinFilter,
    cache: DiscoveryCache,
    watchlist: HashMap<Mint, WatchlistEntry>,
    watchdogs: HashMap<Mint, WatchdogState>,
    ath_cache: AthCache,
    ath_sink: AthSink,
    metric_sink: MetricSink,
    discovery_batcher: DiscoveryBatcher,
    automation_sink: AutomationSink,
    /// Latched once the automation endpoint answers 404 — forwarding stays
    /// off for the rest of the process run (spec.md §4.8, §7).
    automation_disabled: bool,
    subs: SubscriptionHandle,
    ws_frame_rx: mpsc::Receiver<Message>,
    health: Arc<HealthState>,
}

impl Supervisor {
    /// Builds the supervisor and spawns the subscription batcher task
    /// (spec.md §5's "two auxiliary tasks" — this is one of them; the HTTP
    /// task is wired separately in `main`). Returns the batcher's join
    /// handle so the caller can observe or abort it on shutdown.
    pub fn new(
        cfg: Config,
        pool: PgPool,
        phases: Vec<Phase>,
        health: Arc<HealthState>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>)> {
        let filter = CoinFilter::new(&cfg.bad_names_pattern, Duration::from_secs(cfg.spam_burst_window))
            .map_err(|e| AppError::ConfigInvalid(format!("invalid BAD_NAMES_PATTERN: {e}")))?;
        let cache = DiscoveryCache::new(Duration::from_secs(cfg.coin_cache_seconds));
        let ath_sink = AthSink::new(pool.clone());
        let metric_sink = MetricSink::new(pool.clone(), Arc::new(MetricSinkStats::default()));
        let automation_sink = AutomationSink::new(&cfg)?;
        let registry = ActiveRegistry::new(pool, cfg.db_dsn.clone());

        let (ws_frame_tx, ws_frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sub_mgr, subs) = SubscriptionManager::new(ws_frame_tx, CHANNEL_CAPACITY);
        let batcher_handle = tokio::spawn(sub_mgr.run());

        Ok((
            Self {
                cfg,
                registry,
                phases,
                filter,
                cache,
                watchlist: HashMap::new(),
                watchdogs: HashMap::new(),
                ath_cache: AthCache::default(),
                ath_sink,
                metric_sink,
                discovery_batcher: DiscoveryBatcher::new(),
                automation_sink,
                automation_disabled: false,
                subs,
                ws_frame_rx,
                health,
            },
            batcher_handle,
        ))
    }

    /// Connects, serves, and reconnects forever with bounded backoff
    /// (spec.md §5). Never returns — the process exits only via the HTTP
    /// task's failure or a signal handled in `main`.
    pub async fn run(mut self) -> ! {
        let mut attempt: u32 = 0;
        loop {
            if let Err(e) = self.connect_and_serve(&mut attempt).await {
                warn!("upstream WebSocket session ended: {e}");
            }

            self.health.set_ws_connected(false);
            self.health.inc_reconnect();
            let delay = self.cfg.reconnect_backoff(attempt);
            attempt = attempt.saturating_add(1);
            warn!("reconnecting to upstream in {delay:.1}s (attempt {attempt})");
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// One connection's worth of life: connect, replay subscriptions, then
    /// drive the main read loop until the connection drops or goes idle past
    /// `ws_connection_timeout` (spec.md §4.9).
    async fn connect_and_serve(&mut self, attempt: &mut u32) -> Result<()> {
        let mut conn = UpstreamConnection::connect(&self.cfg.ws_uri).await?;
        *attempt = 0;
        self.health.set_ws_connected(true);
        self.subs.notify_connected();
        info!("connected to upstream WebSocket");

        let mut idle_secs: u64 = 0;
        let mut ping_interval = tokio::time::interval(Duration::from_secs(self.cfg.ws_ping_interval));
        ping_interval.tick().await;
        let mut db_refresh_interval = tokio::time::interval(Duration::from_secs(self.cfg.db_refresh_interval));
        db_refresh_interval.tick().await;
        let mut ath_interval = tokio::time::interval(Duration::from_secs(self.cfg.ath_flush_interval));
        ath_interval.tick().await;
        let mut watchdog_interval = tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
        watchdog_interval.tick().await;
        let mut automation_interval = tokio::time::interval(Duration::from_secs(5));
        automation_interval.tick().await;

        loop {
            tokio::select! {
                outcome = conn.recv_timeout(Duration::from_secs(1)) => {
                    match outcome {
                        RecvOutcome::Frame(msg) => {
                            idle_secs = 0;
                            self.handle_frame(msg);
                        }
                        RecvOutcome::Timeout => {
                            idle_secs += 1;
                            if idle_secs >= self.cfg.ws_connection_timeout {
                                warn!("no frames in {idle_secs}s, forcing reconnect");
                                return Ok(());
                            }
                        }
                        RecvOutcome::Closed => return Ok(()),
                    }
                }
                frame = self.ws_frame_rx.recv() => {
                    match frame {
                        Some(msg) => conn.send(msg).await?,
                        None => {
                            warn!("subscription batcher task ended, reconnecting");
                            return Ok(());
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    conn.ping().await?;
                }
                _ = db_refresh_interval.tick() => {
                    self.refresh_and_sweep().await;
                }
                _ = ath_interval.tick() => {
                    self.ath_sink.flush(&mut self.ath_cache).await;
                }
                _ = watchdog_interval.tick() => {
                    let flagged = watchdog::sweep(&mut self.watchdogs, &self.subs, Instant::now());
                    if !flagged.is_empty() {
                        info!("watchdog flagged {} zombie subscription(s)", flagged.len());
                    }
                }
                _ = automation_interval.tick() => {
                    self.flush_automation_if_due().await;
                }
            }
        }
    }

    /// Demuxes one text frame and dispatches it to C2/C1 (create) or C5/C1
    /// (trade). Non-text frames are ignored; `ws::messages::parse_frame`
    /// already counts malformed payloads.
    fn handle_frame(&mut self, msg: Message) {
        let Message::Text(text) = msg else { return };
        let Some(event) = parse_frame(&text) else { return };

        match event {
            UpstreamEvent::Create(payload) => self.handle_create(payload),
            UpstreamEvent::Trade(trade) => self.handle_trade(trade),
        }

        self.health.set_cache_size(self.cache.stats().total_coins);
        self.health.set_watchlist_size(self.watchlist.len());
    }

    fn handle_create(&mut self, payload: CreationPayload) {
        match self.filter.evaluate(&payload.name, &payload.symbol) {
            FilterOutcome::Accept => {
                let mint = payload.mint.clone();
                self.cache.insert(mint.clone(), payload.clone());
                if !self.automation_disabled {
                    self.discovery_batcher.push(payload);
                }
                self.subs.enqueue_subscribe(mint);
            }
            FilterOutcome::Reject(reason) => {
                debug!(mint = %payload.mint, %reason, "rejected new token");
            }
        }
    }

    fn handle_trade(&mut self, trade: RawTrade) {
        self.health.inc_trades_received();
        if let Some(entry) = self.watchlist.get_mut(&trade.mint) {
            let watchdog = self.watchdogs.entry(trade.mint.clone()).or_default();
            aggregator::process_trade(entry, watchdog, &mut self.ath_cache, &trade, &self.cfg, Instant::now());
            self.health.inc_trades_processed();
        } else if self.cache.contains(&trade.mint) {
            self.cache.append_trade(&trade.mint, trade);
        }
    }

    /// Every `db_refresh_interval`: refresh C3, reconcile C1 against it, then
    /// run one C6 flush sweep and persist its rows (spec.md §4.9).
    async fn refresh_and_sweep(&mut self) {
        let ath_snapshot = self.ath_cache.snapshot();
        match self.registry.refresh(&ath_snapshot).await {
            Ok((_pool, active_map)) => {
                self.health.set_db_connected(true);
                self.reconcile_active_set(active_map);
            }
            Err(e) => {
                self.health.set_db_connected(false);
                warn!("active registry refresh failed: {e}");
            }
        }

        let outcome = flusher::sweep(
            &mut self.watchlist,
            &mut self.watchdogs,
            &self.phases,
            &self.cfg,
            &self.subs,
            Instant::now(),
            Utc::now(),
        );

        for mint in outcome.graduated.iter().chain(outcome.finished.iter()) {
            self.ath_cache.remove(mint);
            self.subs.enqueue_unsubscribe(mint.clone());
        }

        if let Err(e) = self.registry.write_stream_updates(&outcome.stream_updates).await {
            warn!(
                "coin_streams update failed, dropping {} phase/terminal transition(s): {e}",
                outcome.stream_updates.len()
            );
        }

        self.metric_sink.write_batch(&outcome.rows).await;
        self.health.set_watchlist_size(self.watchlist.len());
        self.health.set_cache_size(self.cache.stats().total_coins);
    }

    /// Diffs the freshly-refreshed active set against C1 (promote/expire)
    /// and against the current watchlist (install newly-active streams that
    /// never passed through the cache this run, retire ones the store no
    /// longer considers active).
    fn reconcile_active_set(&mut self, active_map: HashMap<Mint, ActiveStream>) {
        let active_set: HashSet<Mint> = active_map.keys().cloned().collect();

        let (promoted, expired) = self.cache.reconcile(&active_set);
        for (mint, trades) in promoted {
            if let Some(meta) = active_map.get(&mint) {
                self.install_watchlist_entry(mint, meta.clone(), trades);
            }
        }
        for mint in expired {
            debug!(mint = %mint, "discovery cache entry expired without registry confirmation");
        }

        let watchlist_keys: HashSet<Mint> = self.watchlist.keys().cloned().collect();

        for mint in active_set.difference(&watchlist_keys) {
            if self.cache.contains(mint) {
                continue; // still waiting out its own TTL before promotion
            }
            if let Some(meta) = active_map.get(mint) {
                self.install_watchlist_entry(mint.clone(), meta.clone(), Vec::new());
            }
        }

        for mint in watchlist_keys.difference(&active_set) {
            self.watchlist.remove(mint);
            self.watchdogs.remove(mint);
            self.subs.enqueue_unsubscribe(mint.clone());
        }
    }

    fn install_watchlist_entry(&mut self, mint: Mint, meta: ActiveStream, trades: Vec<(Instant, RawTrade)>) {
        // A promoted mint is now owned by the watchlist and MUST leave the
        // cache on this sweep (spec.md §3); a no-op for mints that never
        // passed through the cache at all.
        self.cache.evict(&mint);

        let interval_seconds = self
            .phases
            .iter()
            .find(|p| p.id == meta.phase_id)
            .map(|p| p.interval_seconds)
            .unwrap_or(self.cfg.db_refresh_interval);

        self.ath_cache.seed(mint.clone(), meta.ath_price_sol);

        let mut entry = WatchlistEntry {
            meta,
            buffer: AggregationBuffer::default(),
            interval_seconds,
            next_flush_at: Instant::now() + Duration::from_secs(interval_seconds),
        };
        let mut watchdog_state = WatchdogState::default();
        for (_, trade) in trades {
            aggregator::process_trade(&mut entry, &mut watchdog_state, &mut self.ath_cache, &trade, &self.cfg, Instant::now());
        }

        self.watchlist.insert(mint.clone(), entry);
        self.watchdogs.insert(mint.clone(), watchdog_state);
        self.subs.enqueue_subscribe(mint);
    }

    async fn flush_automation_if_due(&mut self) {
        if self.automation_disabled {
            return;
        }
        let now = Instant::now();
        if !self.discovery_batcher.should_flush(&self.cfg, now) {
            return;
        }
        let batch = self.discovery_batcher.take(now);
        if batch.is_empty() {
            return;
        }

        match self.automation_sink.send_batch(&batch).await {
            Ok(()) => {
                for payload in &batch {
                    self.cache.mark_forwarded(&payload.mint);
                }
            }
            Err(AppError::Fatal) => {
                warn!("automation endpoint returned 404, disabling automation sink for the rest of this run");
                self.automation_disabled = true;
            }
            Err(e) => {
                warn!("automation sink gave up on a batch of {}: {e}", batch.len());
            }
        }
    }
}
