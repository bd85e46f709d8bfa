//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub long_term_url: String,
    pub components: HealthComponents,
    pub metrics: HealthMetrics,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub short_term: bool,
    pub long_term: bool,
    pub shuttle: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub records: usize,
    pub users: usize,
}

/// Health check endpoint
///
/// Reports `degraded` while the long-term tier is unreachable; the engine
/// keeps serving from the short-term store in that state.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let engine = &state.engine;

    let stm_stats = engine.stm().stats().ok();
    let stm_healthy = stm_stats.is_some();
    let ltm_healthy = engine.ltm().is_ready();

    let status = if stm_healthy && ltm_healthy {
        "healthy"
    } else {
        "degraded"
    };

    let (records, users) = stm_stats
        .map(|s| (s.total_records, s.users))
        .unwrap_or_default();

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        long_term_url: state.config.engine.ltm.base_url.clone(),
        components: HealthComponents {
            short_term: stm_healthy,
            long_term: ltm_healthy,
            shuttle: engine.is_running(),
        },
        metrics: HealthMetrics { records, users },
    })
}
