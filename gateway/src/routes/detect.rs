use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use ppe_common::{validate_confidence, DetectionResult};

use crate::error::{GatewayError, Result};
use crate::gateway::prepare_image;
use crate::limiter::{PayloadTooLarge, ResourceLimiter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    /// Base64 image, optionally as a `data:` URL.
    pub image: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// POST /api/detect - single-shot detection through the shared worker pool
async fn detect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: std::result::Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectionResult>> {
    let Json(request) = request.map_err(|e| rejection_error(&state.limiter, &headers, e))?;

    if !state.pool.engine().is_ready() {
        return Err(GatewayError::ServiceUnavailable);
    }

    let confidence = match request.confidence {
        Some(confidence) => {
            validate_confidence(confidence)?;
            confidence
        }
        None => state.settings.default_confidence,
    };

    let image = prepare_image(&state.limiter, &request.image)?;
    let result = state
        .pool
        .submit(image, confidence, state.settings.request_timeout)
        .await?;

    Ok(Json(result))
}

/// A body cut off by the body limit carries an oversized image.
fn rejection_error(limiter: &ResourceLimiter, headers: &HeaderMap, rejection: JsonRejection) -> GatewayError {
    if rejection.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return GatewayError::MalformedMessage(rejection.body_text());
    }

    let actual = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| limiter.max_message_bytes().saturating_add(1));

    GatewayError::PayloadTooLarge(PayloadTooLarge {
        actual,
        limit: limiter.config().max_payload_bytes,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.limiter.max_message_bytes();

    Router::new()
        .route("/api/detect", post(detect))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
