//! Resource ceilings for connections, payloads and queued work.
//!
//! The limiter is a pure policy object: it owns an immutable, validated
//! [`LimiterConfig`] and answers admission questions without side effects.

use std::time::Duration;

use serde::Serialize;

/// Slack on top of the payload limit for the JSON envelope around an image.
const ENVELOPE_OVERHEAD: usize = 4 * 1024;

/// Immutable resource limits, fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum number of concurrently admitted streaming connections.
    pub max_connections: usize,
    /// Maximum size of one image payload, in bytes as received.
    pub max_payload_bytes: usize,
    /// Maximum number of detections waiting for a free worker.
    pub max_queue_depth: usize,
    /// How often the gateway pings each connection.
    pub heartbeat_interval: Duration,
    /// Idle time after which a connection is forcibly closed.
    pub inactivity_timeout: Duration,
    /// Number of detections that may run at the same time.
    pub worker_count: usize,
    /// How often each connection checks itself against the inactivity timeout.
    pub sweep_interval: Duration,
}

impl LimiterConfig {
    /// Default sweep cadence for a given inactivity timeout.
    pub fn default_sweep_interval(inactivity_timeout: Duration) -> Duration {
        (inactivity_timeout / 4).max(Duration::from_millis(1))
    }

    /// Check the invariants that make the limits meaningful.
    pub fn validate(&self) -> Result<(), LimitConfigError> {
        let counts = [
            ("max_connections", self.max_connections),
            ("max_payload_bytes", self.max_payload_bytes),
            ("max_queue_depth", self.max_queue_depth),
            ("worker_count", self.worker_count),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(LimitConfigError::Zero(name));
            }
        }

        let durations = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("inactivity_timeout", self.inactivity_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(LimitConfigError::Zero(name));
            }
        }

        if self.heartbeat_interval >= self.inactivity_timeout {
            return Err(LimitConfigError::HeartbeatNotBelowTimeout {
                heartbeat: self.heartbeat_interval,
                inactivity: self.inactivity_timeout,
            });
        }
        if self.sweep_interval >= self.inactivity_timeout {
            return Err(LimitConfigError::SweepNotBelowTimeout {
                sweep: self.sweep_interval,
                inactivity: self.inactivity_timeout,
            });
        }

        Ok(())
    }
}

/// Invalid resource limits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("heartbeat interval ({heartbeat:?}) must be shorter than the inactivity timeout ({inactivity:?})")]
    HeartbeatNotBelowTimeout {
        heartbeat: Duration,
        inactivity: Duration,
    },

    #[error("sweep interval ({sweep:?}) must be shorter than the inactivity timeout ({inactivity:?})")]
    SweepNotBelowTimeout {
        sweep: Duration,
        inactivity: Duration,
    },
}

/// A payload rejected by [`ResourceLimiter::validate_payload_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload of {actual} bytes exceeds the limit of {limit} bytes")]
pub struct PayloadTooLarge {
    pub actual: usize,
    pub limit: usize,
}

/// Serializable view of the limits for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LimitsView {
    pub max_connections: usize,
    pub max_payload_bytes: usize,
    pub max_queue_depth: usize,
    pub worker_count: usize,
    pub heartbeat_interval_secs: f64,
    pub inactivity_timeout_secs: f64,
    pub sweep_interval_secs: f64,
}

/// Admission policy over a validated [`LimiterConfig`].
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    config: LimiterConfig,
}

impl ResourceLimiter {
    /// Create a limiter, rejecting configurations that break the invariants.
    pub fn new(config: LimiterConfig) -> Result<Self, LimitConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Whether one more connection fits next to `current_active` ones.
    pub fn can_admit(&self, current_active: usize) -> bool {
        current_active < self.config.max_connections
    }

    pub fn validate_payload_size(&self, byte_length: usize) -> Result<(), PayloadTooLarge> {
        if byte_length > self.config.max_payload_bytes {
            return Err(PayloadTooLarge {
                actual: byte_length,
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }

    /// Upper bound on a whole inbound message (WebSocket frame or HTTP body).
    ///
    /// Messages above the payload limit must still arrive so they can be
    /// answered with `payload_too_large` instead of a transport error.
    pub fn max_message_bytes(&self) -> usize {
        self.config
            .max_payload_bytes
            .saturating_mul(4)
            .saturating_add(ENVELOPE_OVERHEAD)
    }

    /// Whether one more item may wait behind `current_queue_depth` queued ones.
    pub fn can_enqueue(&self, current_queue_depth: usize) -> bool {
        current_queue_depth < self.config.max_queue_depth
    }

    pub fn view(&self) -> LimitsView {
        LimitsView {
            max_connections: self.config.max_connections,
            max_payload_bytes: self.config.max_payload_bytes,
            max_queue_depth: self.config.max_queue_depth,
            worker_count: self.config.worker_count,
            heartbeat_interval_secs: self.config.heartbeat_interval.as_secs_f64(),
            inactivity_timeout_secs: self.config.inactivity_timeout.as_secs_f64(),
            sweep_interval_secs: self.config.sweep_interval.as_secs_f64(),
        }
    }
}
