mod aggregator;
mod api;
mod automation;
mod cache;
mod config;
mod db;
mod error;
mod filter;
mod flusher;
mod registry;
mod supervisor;
mod types;
mod watchdog;
mod ws;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::registry::ActiveRegistry;
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = connect_store_with_retry(&cfg).await;
    info!("connected to store");

    let registry = ActiveRegistry::new(pool.clone(), cfg.db_dsn.clone());
    let phases = registry.load_phases().await?;
    info!("loaded {} phase(s) from ref_coin_phases", phases.len());

    let health = Arc::new(HealthState::new());

    let (supervisor, batcher_handle) = Supervisor::new(cfg.clone(), pool, phases, Arc::clone(&health))?;
    let supervisor_handle = tokio::spawn(supervisor.run());

    let api_state = ApiState { health };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = supervisor_handle => {
            warn!("supervisor task ended unexpectedly");
        }
    }

    batcher_handle.abort();
    Ok(())
}

/// Retries the initial store connection every `db_retry_delay` seconds until
/// it succeeds — there is nothing useful to do before the store is up
/// (spec.md §4.9).
async fn connect_store_with_retry(cfg: &Config) -> sqlx::PgPool {
    loop {
        match sqlx::PgPool::connect(&cfg.db_dsn).await {
            Ok(pool) => return pool,
            Err(e) => {
                warn!("store connection failed, retrying in {}s: {e}", cfg.db_retry_delay);
                tokio::time::sleep(std::time::Duration::from_secs(cfg.db_retry_delay)).await;
            }
        }
    }
}
