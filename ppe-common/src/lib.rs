//! PPE Gateway Common Types
//!
//! Shared types used by the gateway and its clients: detection results and the
//! WebSocket message protocol.

pub mod detection;
pub mod protocol;

pub use detection::{Detection, DetectionResult};
pub use protocol::{
    close_code, error_code, now_millis, validate_confidence, ClientMessage, MalformedMessage,
    ServerMessage, DEFAULT_CONFIDENCE,
};
