//! Minimal read-only HTTP surface. A full query/metrics surface is out of
//! scope (spec.md §1 Non-goals); this crate still wires the one endpoint
//! described in SPEC_FULL.md ("the crate still wires a minimal router the
//! way the teacher's `api/routes.rs` and `api/health.rs` do, so the core's
//! health state has a real consumer") — grounded on the teacher's
//! axum `Router`/`State` shape, reduced from a full markets/windows/stats
//! surface to a single health snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::health::HealthState;

#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/health", get(get_health)).with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ws_connected: bool,
    db_connected: bool,
    reconnect_count: u64,
    trades_received: u64,
    trades_processed: u64,
    cache_size: u64,
    watchlist_size: u64,
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ws_connected: state.health.ws_connected(),
        db_connected: state.health.db_connected(),
        reconnect_count: state.health.reconnect_count(),
        trades_received: state.health.trades_received(),
        trades_processed: state.health.trades_processed(),
        cache_size: state.health.cache_size(),
        watchlist_size: state.health.watchlist_size(),
    })
}
