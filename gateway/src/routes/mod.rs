pub mod detect;
pub mod health;
pub mod status;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

/// GET / - service banner
async fn root() -> Json<Value> {
    Json(json!({
        "service": "ppe-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "detect": "/api/detect",
            "stream": "/api/ws/detect",
            "metrics": "/metrics"
        }
    }))
}

pub fn router() -> Router {
    Router::new().route("/", get(root))
}
