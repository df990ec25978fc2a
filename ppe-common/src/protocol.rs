//! WebSocket protocol types for client-gateway communication.
//!
//! Messages are JSON objects with a `type` field.
//!
//! ## Connection Flow
//!
//! 1. Client opens the streaming endpoint
//! 2. Gateway either sends `connected` or closes with [`close_code::ADMISSION_REJECTED`]
//! 3. Client sends `frame` messages; each one gets `processing` followed by
//!    `result` or `error`
//! 4. Gateway sends periodic `ping` messages, client answers with `pong`
//! 5. Silent connections are closed with [`close_code::INACTIVITY`]
//!
//! A client may also send its own `ping`; the gateway answers with `pong`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DetectionResult;

/// Confidence threshold used when a frame does not specify one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// WebSocket close codes used by the gateway.
pub mod close_code {
    /// The connection ceiling was reached (policy violation).
    pub const ADMISSION_REJECTED: u16 = 1008;
    /// The connection was idle for longer than the inactivity timeout.
    pub const INACTIVITY: u16 = 1000;
    /// The detector is not available.
    pub const SERVICE_UNAVAILABLE: u16 = 1011;

    pub const ADMISSION_REJECTED_REASON: &str = "max connections reached";
    pub const INACTIVITY_REASON: &str = "inactivity";
    pub const SERVICE_UNAVAILABLE_REASON: &str = "detector unavailable";
}

/// Error codes carried by `error` messages and HTTP error bodies.
pub mod error_code {
    pub const ADMISSION_REJECTED: &str = "admission_rejected";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const MALFORMED_MESSAGE: &str = "malformed_message";
    pub const DECODE_FAILURE: &str = "decode_failure";
    pub const QUEUE_SATURATED: &str = "queue_saturated";
    pub const DETECTION_TIMEOUT: &str = "detection_timeout";
    pub const DETECTION_FAILURE: &str = "detection_failure";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Messages sent from client to gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// An image to run detection on (base64, optionally a `data:` URL).
    Frame {
        image: String,
        confidence: Option<f32>,
    },
    /// Client-initiated liveness check.
    Ping,
    /// Reply to a gateway `ping`.
    Pong,
    /// Echo of the gateway's `connected` message; ignored.
    Connected,
}

/// Raw shape of an inbound message before classification.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// An inbound message that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMessage(pub String);

impl fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MalformedMessage {}

impl ClientMessage {
    /// Parse and classify a text message.
    ///
    /// A message with an `image` and no `type` is treated as a frame.
    pub fn parse(text: &str) -> Result<Self, MalformedMessage> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| MalformedMessage(format!("invalid JSON: {}", e)))?;

        match envelope.kind.as_deref() {
            Some("ping") => Ok(Self::Ping),
            Some("pong") => Ok(Self::Pong),
            Some("connected") => Ok(Self::Connected),
            None | Some("frame") => {
                let image = envelope
                    .image
                    .filter(|image| !image.is_empty())
                    .ok_or_else(|| MalformedMessage("missing field 'image'".to_string()))?;
                if let Some(confidence) = envelope.confidence {
                    validate_confidence(confidence)?;
                }
                Ok(Self::Frame {
                    image,
                    confidence: envelope.confidence,
                })
            }
            Some(other) => Err(MalformedMessage(format!("unknown message type '{}'", other))),
        }
    }
}

/// Check that a confidence threshold lies in `[0, 1]`.
pub fn validate_confidence(confidence: f32) -> Result<(), MalformedMessage> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(MalformedMessage(format!(
            "confidence must be between 0 and 1, got {}",
            confidence
        )))
    }
}

/// Messages sent from gateway to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection has been admitted.
    Connected {
        connection_id: String,
        message: String,
        timestamp: i64,
    },
    /// A frame was accepted and is being processed.
    Processing { message: String, timestamp: i64 },
    /// Liveness check; the client should answer with `pong`.
    Ping { timestamp: i64 },
    /// Answer to a client `ping`.
    Pong { timestamp: i64 },
    /// Detection result for the most recent frame.
    Result(DetectionResult),
    /// A frame or message could not be processed; the connection stays open.
    Error {
        code: String,
        message: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn connected(connection_id: impl Into<String>) -> Self {
        Self::Connected {
            connection_id: connection_id.into(),
            message: "ready for detection".to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn processing() -> Self {
        Self::Processing {
            message: "processing image".to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn ping() -> Self {
        Self::Ping {
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_typed_frame() {
        let msg = ClientMessage::parse(r#"{"type":"frame","image":"abc","confidence":0.7}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Frame {
                image: "abc".to_string(),
                confidence: Some(0.7),
            }
        );
    }

    #[test]
    fn test_parse_untyped_frame() {
        let msg = ClientMessage::parse(r#"{"image":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Frame {
                image: "abc".to_string(),
                confidence: None,
            }
        );
    }

    #[test]
    fn test_parse_heartbeats() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"pong","timestamp":1}"#).unwrap(),
            ClientMessage::Pong
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"connected"}"#).unwrap(),
            ClientMessage::Connected
        );
    }

    #[test]
    fn test_parse_missing_image() {
        let err = ClientMessage::parse(r#"{"type":"frame"}"#).unwrap_err();
        assert!(err.0.contains("missing field 'image'"));

        let err = ClientMessage::parse(r#"{"type":"frame","image":""}"#).unwrap_err();
        assert!(err.0.contains("missing field 'image'"));
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = ClientMessage::parse("not json").unwrap_err();
        assert!(err.0.starts_with("invalid JSON"));
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap_err();
        assert!(err.0.contains("unknown message type 'subscribe'"));
    }

    #[test]
    fn test_parse_confidence_out_of_range() {
        let err = ClientMessage::parse(r#"{"image":"abc","confidence":1.5}"#).unwrap_err();
        assert!(err.0.contains("confidence must be between 0 and 1"));
    }

    #[test]
    fn test_server_message_tags() {
        let json = serde_json::to_value(ServerMessage::ping()).unwrap();
        assert_eq!(json["type"], "ping");
        assert!(json["timestamp"].as_i64().unwrap() > 0);

        let json = serde_json::to_value(ServerMessage::error(error_code::QUEUE_SATURATED, "busy")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "queue_saturated");
        assert_eq!(json["message"], "busy");
    }

    #[test]
    fn test_result_message_is_flattened() {
        let mut ppe_status = BTreeMap::new();
        ppe_status.insert("casco".to_string(), true);
        let msg = ServerMessage::Result(DetectionResult {
            ppe_status,
            detections: vec![],
            is_compliant: true,
            processing_time: 3.0,
            has_person: true,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["is_compliant"], true);
        assert_eq!(json["ppe_status"]["casco"], true);

        let parsed: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }
}
