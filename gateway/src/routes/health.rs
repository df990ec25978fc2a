use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let connections = state.registry.metrics().await;
    let pool = state.pool.stats();
    let ready = u8::from(state.pool.engine().is_ready());

    let body = format!(
        "# HELP ppe_up Whether the service is up\n\
         # TYPE ppe_up gauge\n\
         ppe_up 1\n\
         # HELP ppe_info Service information\n\
         # TYPE ppe_info gauge\n\
         ppe_info{{version=\"{}\"}} 1\n\
         # HELP ppe_detector_ready Whether the detector can serve requests\n\
         # TYPE ppe_detector_ready gauge\n\
         ppe_detector_ready {}\n\
         # HELP ppe_connections_active Currently admitted streaming connections\n\
         # TYPE ppe_connections_active gauge\n\
         ppe_connections_active {}\n\
         # HELP ppe_connections_total Streaming connections admitted since start\n\
         # TYPE ppe_connections_total counter\n\
         ppe_connections_total {}\n\
         # HELP ppe_connections_rejected_total Streaming connections refused at the ceiling\n\
         # TYPE ppe_connections_rejected_total counter\n\
         ppe_connections_rejected_total {}\n\
         # HELP ppe_pool_running Detections currently running\n\
         # TYPE ppe_pool_running gauge\n\
         ppe_pool_running {}\n\
         # HELP ppe_pool_queued Detections waiting for a worker\n\
         # TYPE ppe_pool_queued gauge\n\
         ppe_pool_queued {}\n",
        env!("CARGO_PKG_VERSION"),
        ready,
        connections.active,
        connections.total,
        connections.rejected,
        pool.running,
        pool.queued,
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
