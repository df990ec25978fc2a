pub mod config;
pub mod decode;
pub mod detector;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod logging;
pub mod routes;
pub mod test_util;

pub use config::Config;
pub use detector::{DetectionEngine, Detector, HttpDetector, UnavailableDetector};
pub use error::GatewayError;
pub use gateway::{ConnectionRegistry, SessionSettings, WorkerPool};
pub use limiter::{LimiterConfig, ResourceLimiter};

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{middleware, routing::get, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared application state.
pub struct AppState {
    pub limiter: Arc<ResourceLimiter>,
    /// Admitted streaming connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Detection workers shared by streaming and single-shot requests.
    pub pool: Arc<WorkerPool>,
    pub settings: SessionSettings,
}

impl AppState {
    /// Wire up registry and pool. Must be called within a tokio runtime.
    pub fn new(limiter: ResourceLimiter, engine: DetectionEngine, settings: SessionSettings) -> Self {
        let limiter = Arc::new(limiter);
        let registry = Arc::new(ConnectionRegistry::new(limiter.clone()));
        let pool = Arc::new(WorkerPool::new(limiter.clone(), Arc::new(engine)));

        Self {
            limiter,
            registry,
            pool,
            settings,
        }
    }
}

/// Build the full HTTP and WebSocket router.
pub fn app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let ws_routes = Router::new()
        .route("/api/ws/detect", get(gateway::ws_handler))
        .with_state(state.clone());

    Router::new()
        .merge(routes::router())
        .merge(routes::health::router(state.clone()))
        .merge(routes::status::router(state.clone()))
        .merge(routes::detect::router(state))
        .merge(ws_routes)
        .layer(cors_layer(cors_origins))
        .layer(middleware::from_fn(logging::request_logger))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
