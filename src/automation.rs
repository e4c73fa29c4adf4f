//! Automation sink (C8): batches discovery-event payloads and forwards them
//! to a configurable webhook, with bounded linear-backoff retry and a fatal
//! abort on 404 (spec.md §4.8, §6).
//!
//! Grounded on the teacher's `fetcher.rs` `reqwest::Client::builder()
//! .timeout(...).build()` pattern, generalized from GET-only to POST/GET
//! with retry since the teacher never POSTs or retries.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, warn};

use crate::config::{Config, WebhookMethod, AUTOMATION_MAX_RETRIES, AUTOMATION_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::CreationPayload;

/// Accumulates creation payloads between flushes. Owned by the Supervisor's
/// single logical task — no locking required (spec.md §5).
pub struct DiscoveryBatcher {
    buffer: Vec<CreationPayload>,
    last_flush: Instant,
}

impl DiscoveryBatcher {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, payload: CreationPayload) {
        self.buffer.push(payload);
    }

    pub fn should_flush(&self, cfg: &Config, now: Instant) -> bool {
        self.buffer.len() >= cfg.batch_size
            || now.duration_since(self.last_flush).as_secs() > cfg.batch_timeout
    }

    /// Drains the buffer and resets the flush clock, regardless of whether
    /// the caller's send ultimately succeeds (spec.md §4.8: "on final
    /// failure clear the buffer — no cross-cycle retention").
    pub fn take(&mut self, now: Instant) -> Vec<CreationPayload> {
        self.last_flush = now;
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

pub struct AutomationSink {
    client: reqwest::Client,
    url: String,
    method: WebhookMethod,
}

impl AutomationSink {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(AUTOMATION_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: cfg.n8n_webhook_url.clone(),
            method: cfg.n8n_webhook_method,
        })
    }

    /// Sends one batch. Retries transport errors and non-200 responses up to
    /// `AUTOMATION_MAX_RETRIES` times with linear backoff
    /// (`retry_delay * attempt`); a 404 aborts immediately without retry.
    /// The caller clears its buffer regardless of the outcome.
    pub async fn send_batch(&self, payloads: &[CreationPayload]) -> Result<()> {
        if self.url.is_empty() || payloads.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "source": "unified_pump_service",
            "count": payloads.len(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": payloads,
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.method {
                WebhookMethod::Post => self.client.post(&self.url).json(&body).send().await,
                WebhookMethod::Get => {
                    let encoded = serde_json::to_string(&body).unwrap_or_default();
                    self.client
                        .get(&self.url)
                        .query(&[("data", encoded)])
                        .send()
                        .await
                }
            };

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().as_u16() == 404 => {
                    error!("automation endpoint returned 404, aborting without retry");
                    return Err(AppError::Fatal);
                }
                Ok(resp) => {
                    warn!(
                        "automation sink got status {} on attempt {attempt}/{AUTOMATION_MAX_RETRIES}",
                        resp.status()
                    );
                }
                Err(e) => {
                    warn!("automation sink transport error on attempt {attempt}/{AUTOMATION_MAX_RETRIES}: {e}");
                }
            }

            if attempt >= AUTOMATION_MAX_RETRIES {
                return Err(AppError::AutomationRetriesExhausted(format!(
                    "gave up after {attempt} attempts"
                )));
            }
            tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::from_env().unwrap()
    }

    #[test]
    fn batcher_flushes_on_size_threshold() {
        let mut c = cfg();
        c.batch_size = 2;
        let mut b = DiscoveryBatcher::new();
        assert!(!b.should_flush(&c, Instant::now()));
        b.push(sample_payload("a"));
        assert!(!b.should_flush(&c, Instant::now()));
        b.push(sample_payload("b"));
        assert!(b.should_flush(&c, Instant::now()));
    }

    #[test]
    fn batcher_flushes_on_timeout() {
        let mut c = cfg();
        c.batch_timeout = 1;
        let mut b = DiscoveryBatcher::new();
        b.push(sample_payload("a"));
        assert!(!b.should_flush(&c, Instant::now()));
        let later = Instant::now() + Duration::from_secs(2);
        assert!(b.should_flush(&c, later));
    }

    #[test]
    fn take_drains_and_resets() {
        let mut b = DiscoveryBatcher::new();
        b.push(sample_payload("a"));
        let drained = b.take(Instant::now());
        assert_eq!(drained.len(), 1);
        assert!(b.is_empty());
    }

    fn sample_payload(mint: &str) -> CreationPayload {
        CreationPayload {
            mint: mint.to_string(),
            name: "n".to_string(),
            symbol: "s".to_string(),
            market_cap_sol: None,
            v_tokens_in_bonding_curve: None,
            v_sol_in_bonding_curve: None,
            bonding_curve_key: None,
            trader_public_key: None,
            extra: serde_json::Map::new(),
        }
    }
}
