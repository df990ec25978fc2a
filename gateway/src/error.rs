//! Error types for the gateway.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use ppe_common::{close_code, error_code};

use crate::decode::DecodeError;
use crate::detector::DetectionError;
use crate::gateway::AdmissionRejected;
use crate::limiter::PayloadTooLarge;

/// Failures surfaced to clients.
///
/// Everything except `AdmissionRejected` is per-message: a streaming session
/// reports it as an `error` message and keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Connection limit reached ({max_connections} active connections)")]
    AdmissionRejected { max_connections: usize },

    #[error("Image too large: {0}")]
    PayloadTooLarge(#[from] PayloadTooLarge),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid image: {0}")]
    DecodeFailure(#[from] DecodeError),

    #[error("Detection queue is full, retry later")]
    QueueSaturated,

    #[error("Detection did not finish within {0:?}")]
    DetectionTimeout(Duration),

    #[error("Detection failed: {0}")]
    DetectionFailure(String),

    #[error("Detection service unavailable")]
    ServiceUnavailable,
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AdmissionRejected { .. } => error_code::ADMISSION_REJECTED,
            GatewayError::PayloadTooLarge(_) => error_code::PAYLOAD_TOO_LARGE,
            GatewayError::MalformedMessage(_) => error_code::MALFORMED_MESSAGE,
            GatewayError::DecodeFailure(_) => error_code::DECODE_FAILURE,
            GatewayError::QueueSaturated => error_code::QUEUE_SATURATED,
            GatewayError::DetectionTimeout(_) => error_code::DETECTION_TIMEOUT,
            GatewayError::DetectionFailure(_) => error_code::DETECTION_FAILURE,
            GatewayError::ServiceUnavailable => error_code::SERVICE_UNAVAILABLE,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AdmissionRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            GatewayError::DecodeFailure(_) => StatusCode::BAD_REQUEST,
            GatewayError::QueueSaturated => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::DetectionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::DetectionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// WebSocket close code and reason for errors that end a session.
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        match self {
            GatewayError::AdmissionRejected { .. } => Some((
                close_code::ADMISSION_REJECTED,
                close_code::ADMISSION_REJECTED_REASON,
            )),
            GatewayError::ServiceUnavailable => Some((
                close_code::SERVICE_UNAVAILABLE,
                close_code::SERVICE_UNAVAILABLE_REASON,
            )),
            _ => None,
        }
    }
}

impl From<AdmissionRejected> for GatewayError {
    fn from(err: AdmissionRejected) -> Self {
        GatewayError::AdmissionRejected {
            max_connections: err.max_connections,
        }
    }
}

impl From<DetectionError> for GatewayError {
    fn from(err: DetectionError) -> Self {
        GatewayError::DetectionFailure(err.to_string())
    }
}

impl From<ppe_common::MalformedMessage> for GatewayError {
    fn from(err: ppe_common::MalformedMessage) -> Self {
        GatewayError::MalformedMessage(err.0)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string()
            }
        }));

        (self.status(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
