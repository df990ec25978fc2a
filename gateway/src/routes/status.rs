use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::gateway::{PoolStats, RegistryMetrics};
use crate::limiter::LimitsView;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DetectorStatus {
    pub name: String,
    pub ready: bool,
    pub classes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub detector: DetectorStatus,
    pub connections: RegistryMetrics,
    pub pool: PoolStats,
    pub limits: LimitsView,
}

/// GET /api/health - detector readiness, connection counters and limits
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let engine = state.pool.engine();
    let ready = engine.is_ready();

    Json(StatusResponse {
        status: if ready { "healthy" } else { "unhealthy" },
        detector: DetectorStatus {
            name: engine.detector_name().to_string(),
            ready,
            classes: engine.classes().class_names().map(String::from).collect(),
        },
        connections: state.registry.metrics().await,
        pool: state.pool.stats(),
        limits: state.limiter.view(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(status))
        .with_state(state)
}
