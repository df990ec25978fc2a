//! Configuration for the detection gateway.

use std::collections::BTreeMap;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use ppe_common::{validate_confidence, DEFAULT_CONFIDENCE};

use crate::detector::default_mappings;
use crate::gateway::SessionSettings;
use crate::limiter::{LimitConfigError, LimiterConfig};

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub classes: ClassesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Resource limits and session timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Defaults to a quarter of the inactivity timeout.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_payload_bytes: default_max_payload_bytes(),
            max_queue_depth: default_max_queue_depth(),
            worker_count: default_worker_count(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            sweep_interval_secs: None,
            read_timeout_secs: default_read_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Model server URL. Without one the gateway starts but reports unhealthy.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_detector_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_confidence")]
    pub default_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_detector_timeout(),
            default_confidence: default_confidence(),
        }
    }
}

/// PPE classes and the model labels that count as each of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassesConfig {
    #[serde(default = "default_mappings")]
    pub mappings: BTreeMap<String, Vec<String>>,
}

impl Default for ClassesConfig {
    fn default() -> Self {
        Self {
            mappings: default_mappings(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_connections() -> usize {
    50
}
fn default_max_payload_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_max_queue_depth() -> usize {
    100
}
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() + 1)
        .unwrap_or(4)
        .min(4)
}
fn default_heartbeat_interval() -> u64 {
    15
}
fn default_inactivity_timeout() -> u64 {
    120
}
fn default_read_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    30
}
fn default_detector_timeout() -> u64 {
    30
}
fn default_confidence() -> f32 {
    DEFAULT_CONFIDENCE
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (PPE__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("PPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Resource limits derived from `[limits]`, validated.
    pub fn limiter_config(&self) -> Result<LimiterConfig, LimitConfigError> {
        let limits = &self.limits;
        let inactivity_timeout = Duration::from_secs(limits.inactivity_timeout_secs);
        let sweep_interval = match limits.sweep_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => LimiterConfig::default_sweep_interval(inactivity_timeout),
        };

        let config = LimiterConfig {
            max_connections: limits.max_connections,
            max_payload_bytes: limits.max_payload_bytes,
            max_queue_depth: limits.max_queue_depth,
            heartbeat_interval: Duration::from_secs(limits.heartbeat_interval_secs),
            inactivity_timeout,
            worker_count: limits.worker_count,
            sweep_interval,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        validate_confidence(self.detector.default_confidence)
            .map_err(|e| ConfigError::Message(format!("detector.default_confidence: {}", e)))?;
        if self.limits.read_timeout_secs == 0 || self.limits.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "read and request timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(SessionSettings {
            read_timeout: Duration::from_secs(self.limits.read_timeout_secs),
            request_timeout: Duration::from_secs(self.limits.request_timeout_secs),
            default_confidence: self.detector.default_confidence,
        })
    }
}
