//! Streaming gateway for detection clients.
//!
//! This module provides:
//! - Connection registry enforcing the connection ceiling
//! - Bounded worker pool shared by all connections
//! - Per-connection heartbeat and inactivity tasks
//! - WebSocket session handling

pub mod liveness;
pub mod pool;
pub mod registry;
mod session;

pub use liveness::{CloseReason, LivenessMonitor, SessionCommand};
pub use pool::{PoolStats, WorkerPool};
pub use registry::{AdmissionRejected, ConnectionEntry, ConnectionHandle, ConnectionRegistry, RegistryMetrics};
pub use session::{prepare_image, ws_handler, SessionPhase, SessionSettings};
