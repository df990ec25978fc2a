//! Registry of admitted streaming connections.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::limiter::ResourceLimiter;

/// Opaque identifier of one admitted connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(Uuid);

impl ConnectionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Information about an admitted connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub handle: ConnectionHandle,
    /// Remote address, when the transport exposes one.
    pub peer: Option<SocketAddr>,
    /// Wall-clock admission time, for display.
    pub connected_at: DateTime<Utc>,
    pub admitted_at: Instant,
    /// Last inbound message of any kind.
    pub last_activity: Instant,
    /// Last heartbeat sent by the gateway.
    pub last_ping_sent: Option<Instant>,
}

/// Admission refused because the connection ceiling was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection limit of {max_connections} reached")]
pub struct AdmissionRejected {
    pub max_connections: usize,
}

/// Snapshot of the connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryMetrics {
    pub active: usize,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionHandle, ConnectionEntry>,
    total: u64,
    rejected: u64,
}

/// Tracks every admitted connection and the admission counters.
///
/// All state sits behind one mutex, so admission is a single
/// check-and-insert and concurrent admits can never overshoot the ceiling.
/// The active count is the size of the connection map.
#[derive(Debug)]
pub struct ConnectionRegistry {
    limiter: Arc<ResourceLimiter>,
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new(limiter: Arc<ResourceLimiter>) -> Self {
        Self {
            limiter,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Admit a new connection if the ceiling allows it.
    pub async fn admit(&self, peer: Option<SocketAddr>) -> Result<ConnectionHandle, AdmissionRejected> {
        let mut state = self.state.lock().await;

        if !self.limiter.can_admit(state.connections.len()) {
            state.rejected += 1;
            return Err(AdmissionRejected {
                max_connections: self.limiter.config().max_connections,
            });
        }

        let handle = ConnectionHandle::new();
        let now = Instant::now();
        state.connections.insert(
            handle,
            ConnectionEntry {
                handle,
                peer,
                connected_at: Utc::now(),
                admitted_at: now,
                last_activity: now,
                last_ping_sent: None,
            },
        );
        state.total += 1;

        Ok(handle)
    }

    /// Remove a connection. Returns false if it was already gone.
    pub async fn evict(&self, handle: &ConnectionHandle) -> bool {
        self.state.lock().await.connections.remove(handle).is_some()
    }

    /// Record inbound activity on a connection.
    pub async fn touch(&self, handle: &ConnectionHandle) -> bool {
        match self.state.lock().await.connections.get_mut(handle) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Record that a heartbeat was sent to a connection.
    pub async fn record_ping(&self, handle: &ConnectionHandle) {
        if let Some(entry) = self.state.lock().await.connections.get_mut(handle) {
            entry.last_ping_sent = Some(Instant::now());
        }
    }

    pub async fn metrics(&self) -> RegistryMetrics {
        let state = self.state.lock().await;
        RegistryMetrics {
            active: state.connections.len(),
            total: state.total,
            rejected: state.rejected,
        }
    }

    /// Connections whose last activity is older than `inactivity_timeout`.
    pub async fn scan_inactive(&self, now: Instant, inactivity_timeout: Duration) -> Vec<ConnectionHandle> {
        self.state
            .lock()
            .await
            .connections
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_activity) > inactivity_timeout)
            .map(|entry| entry.handle)
            .collect()
    }

    pub async fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.state.lock().await.connections.contains_key(handle)
    }

    pub async fn entry(&self, handle: &ConnectionHandle) -> Option<ConnectionEntry> {
        self.state.lock().await.connections.get(handle).cloned()
    }
}
