use crate::error::{AppError, Result};

pub const DB_DSN: &str = "postgres://localhost/pump";
pub const WS_URI: &str = "wss://pumpportal.fun/api/data";

/// Default bad-name alternation, case-insensitive (original_source/tests/unit/test_coin_filter.py).
pub const BAD_NAMES_PATTERN: &str = r"(test|bot|rug|scam|cant|honey|faucet)";

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Subscription batcher cadence (spec.md §4.4).
pub const SUBSCRIBE_BATCH_INTERVAL_SECS: u64 = 2;
pub const SUBSCRIBE_BATCH_SIZE: usize = 50;

/// Stale-data watchdog cadence (spec.md §4.7).
pub const WATCHDOG_INTERVAL_SECS: u64 = 60;
pub const WATCHDOG_ZOMBIE_THRESHOLD_SECS: u64 = 600;

/// Flush-time stale-signature resubscribe threshold (spec.md §4.6).
pub const STALE_RESUBSCRIBE_WARNINGS: u32 = 2;
pub const STALE_RESUBSCRIBE_IDLE_SECS: u64 = 300;

/// Graduation threshold: bonding curve fill percentage (spec.md §4.6).
pub const GRADUATION_BONDING_PCT: f64 = 99.5;

/// KOTH flag threshold on emitted rows (spec.md §6).
pub const KOTH_MCAP_THRESHOLD: f64 = 30_000.0;

/// Fixed token supply convention: mcap = price * 1e9 (spec.md §3).
pub const TOKEN_SUPPLY: f64 = 1_000_000_000.0;

/// Automation sink retry policy (spec.md §4.8).
pub const AUTOMATION_MAX_RETRIES: u32 = 3;
pub const AUTOMATION_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookMethod {
    Post,
    Get,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_dsn: String,
    pub ws_uri: String,
    pub db_refresh_interval: u64,
    pub db_retry_delay: u64,
    pub ws_retry_delay: f64,
    pub ws_max_retry_delay: f64,
    pub ws_ping_interval: u64,
    pub ws_ping_timeout: u64,
    pub ws_connection_timeout: u64,
    pub n8n_webhook_url: String,
    pub n8n_webhook_method: WebhookMethod,
    pub batch_size: usize,
    pub batch_timeout: u64,
    pub bad_names_pattern: String,
    pub coin_cache_seconds: u64,
    pub spam_burst_window: u64,
    pub sol_reserves_full: f64,
    pub age_calculation_offset_min: f64,
    pub whale_threshold_sol: f64,
    pub ath_flush_interval: u64,
    pub trade_buffer_seconds: u64,
    pub log_level: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_dsn: std::env::var("DB_DSN").unwrap_or_else(|_| DB_DSN.to_string()),
            ws_uri: std::env::var("WS_URI").unwrap_or_else(|_| WS_URI.to_string()),
            db_refresh_interval: std::env::var("DB_REFRESH_INTERVAL")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .unwrap_or(10),
            db_retry_delay: std::env::var("DB_RETRY_DELAY")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u64>()
                .unwrap_or(5),
            ws_retry_delay: std::env::var("WS_RETRY_DELAY")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<f64>()
                .unwrap_or(3.0),
            ws_max_retry_delay: std::env::var("WS_MAX_RETRY_DELAY")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<f64>()
                .unwrap_or(60.0),
            ws_ping_interval: std::env::var("WS_PING_INTERVAL")
                .unwrap_or_else(|_| "20".to_string())
                .parse::<u64>()
                .unwrap_or(20),
            ws_ping_timeout: std::env::var("WS_PING_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u64>()
                .unwrap_or(5),
            ws_connection_timeout: std::env::var("WS_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            n8n_webhook_url: std::env::var("N8N_WEBHOOK_URL").unwrap_or_default(),
            n8n_webhook_method: match std::env::var("N8N_WEBHOOK_METHOD")
                .unwrap_or_else(|_| "POST".to_string())
                .to_uppercase()
                .as_str()
            {
                "GET" => WebhookMethod::Get,
                _ => WebhookMethod::Post,
            },
            batch_size: std::env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<usize>()
                .unwrap_or(10),
            batch_timeout: std::env::var("BATCH_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            bad_names_pattern: std::env::var("BAD_NAMES_PATTERN")
                .unwrap_or_else(|_| BAD_NAMES_PATTERN.to_string()),
            coin_cache_seconds: std::env::var("COIN_CACHE_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .unwrap_or(120),
            spam_burst_window: std::env::var("SPAM_BURST_WINDOW")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            sol_reserves_full: std::env::var("SOL_RESERVES_FULL")
                .unwrap_or_else(|_| "85".to_string())
                .parse::<f64>()
                .unwrap_or(85.0),
            age_calculation_offset_min: std::env::var("AGE_CALCULATION_OFFSET_MIN")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<f64>()
                .unwrap_or(0.0),
            whale_threshold_sol: std::env::var("WHALE_THRESHOLD_SOL")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse::<f64>()
                .map_err(|_| AppError::ConfigInvalid("WHALE_THRESHOLD_SOL must be a float".to_string()))?,
            ath_flush_interval: std::env::var("ATH_FLUSH_INTERVAL")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u64>()
                .unwrap_or(5),
            trade_buffer_seconds: std::env::var("TRADE_BUFFER_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .unwrap_or(120),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::ConfigInvalid("API_PORT must be a valid port number".to_string()))?,
        })
    }

    /// Bounded exponential reconnect backoff: `delay_n = min(base*(1+n*0.5), max)` (spec.md §5).
    pub fn reconnect_backoff(&self, attempt: u32) -> f64 {
        let delay = self.ws_retry_delay * (1.0 + attempt as f64 * 0.5);
        delay.min(self.ws_max_retry_delay)
    }
}
