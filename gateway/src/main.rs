//! PPE detection gateway - streams images from clients to a detection model.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use ppe_gateway::detector::{ClassTable, DetectionEngine, Detector, HttpDetector, UnavailableDetector};
use ppe_gateway::logging::init_tracing;
use ppe_gateway::{app, AppState, Config, ResourceLimiter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    if env::args().any(|a| a == "--version" || a == "-V") {
        println!("ppe-gateway {}", VERSION);
        return Ok(());
    }

    // Load configuration
    let config = Config::load().map_err(|e| format!("Failed to load configuration: {}", e))?;

    init_tracing(&config.logging.level);
    tracing::info!("Starting ppe-gateway {}", VERSION);

    let limits = config
        .limiter_config()
        .map_err(|e| format!("Invalid limits: {}", e))?;
    let settings = config.session_settings()?;
    let limiter = ResourceLimiter::new(limits)?;

    let detector: Arc<dyn Detector> = match config.detector.endpoint {
        Some(ref endpoint) => {
            let detector = HttpDetector::new(
                endpoint.clone(),
                Duration::from_secs(config.detector.timeout_secs),
            )?;
            tracing::info!("Using model server at {}", endpoint);
            Arc::new(detector)
        }
        None => {
            tracing::warn!("No detector endpoint configured, detection requests will be refused");
            Arc::new(UnavailableDetector)
        }
    };

    let classes = ClassTable::new(config.classes.mappings.clone());
    tracing::info!(
        classes = ?classes.class_names().collect::<Vec<_>>(),
        "Loaded PPE classes"
    );
    let engine = DetectionEngine::new(detector, classes);

    tracing::info!(
        max_connections = limiter.config().max_connections,
        max_payload_bytes = limiter.config().max_payload_bytes,
        max_queue_depth = limiter.config().max_queue_depth,
        worker_count = limiter.config().worker_count,
        heartbeat_secs = limiter.config().heartbeat_interval.as_secs(),
        inactivity_secs = limiter.config().inactivity_timeout.as_secs(),
        "Resource limits"
    );

    let state = Arc::new(AppState::new(limiter, engine, settings));
    let app = app(state, &config.server.cors_origins);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
