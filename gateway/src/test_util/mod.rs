//! Helpers shared by unit and integration tests.

pub mod mock_detector;

pub use mock_detector::{MockBehavior, MockDetector};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::net::TcpListener;

use crate::decode::{decode_bytes, DecodedImage};
use crate::detector::{ClassTable, DetectionEngine, Detector};
use crate::gateway::SessionSettings;
use crate::limiter::{LimiterConfig, ResourceLimiter};
use crate::AppState;

/// Small limits with long timers, so nothing fires unless a test asks for it.
pub fn test_limits() -> LimiterConfig {
    LimiterConfig {
        max_connections: 8,
        max_payload_bytes: 64 * 1024,
        max_queue_depth: 4,
        heartbeat_interval: Duration::from_secs(30),
        inactivity_timeout: Duration::from_secs(60),
        worker_count: 2,
        sweep_interval: Duration::from_secs(15),
    }
}

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        read_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        default_confidence: 0.5,
    }
}

/// PNG signature followed by the start of an IHDR chunk.
pub fn png_bytes() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0, 0, 1,
        0, 0, 0, 1, 8, 6, 0, 0, 0,
    ]
}

pub fn png_base64() -> String {
    STANDARD.encode(png_bytes())
}

pub fn png_image() -> DecodedImage {
    decode_bytes(png_bytes()).expect("fixture is a PNG")
}

/// State with the default class table around `detector`.
pub fn test_state(
    limits: LimiterConfig,
    settings: SessionSettings,
    detector: Arc<dyn Detector>,
) -> Arc<AppState> {
    let limiter = ResourceLimiter::new(limits).expect("valid test limits");
    let engine = DetectionEngine::new(detector, ClassTable::default());
    Arc::new(AppState::new(limiter, engine, settings))
}

/// Serve the full app on an ephemeral local port.
pub async fn spawn_test_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let app = crate::app(state, &[]);

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("test server");
    });

    addr
}
