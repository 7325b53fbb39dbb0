//! SMS Dispatch Configuration
//!
//! TOML-based configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Bounds accepted for the number of records per chunk
pub const BATCH_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1..=20;
/// Bounds accepted for the pause after each send, in milliseconds
pub const INTER_MESSAGE_DELAY_MS_RANGE: std::ops::RangeInclusive<u64> = 1_000..=10_000;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub gateway: GatewayConfig,
    pub report: ReportConfig,
}

/// Batch pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Records per chunk
    pub batch_size: usize,
    /// Pause after every individual send, in milliseconds
    pub inter_message_delay_ms: u64,
    /// Interval between completion checks after a chunk is sent
    pub poll_interval_ms: u64,
    /// Completion checks before a chunk is declared complete regardless
    pub max_polls: u32,
    /// Run every chunk without stopping for confirmation
    pub auto_continue: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_message_delay_ms: 2000,
            poll_interval_ms: 1000,
            max_polls: 30,
            auto_continue: false,
        }
    }
}

impl DispatchConfig {
    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which transmission gateway to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// In-process simulated carrier
    #[default]
    Loopback,
    /// Provider HTTP API
    Http,
}

impl std::str::FromStr for GatewayKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loopback" => Ok(GatewayKind::Loopback),
            "http" => Ok(GatewayKind::Http),
            other => Err(ConfigError::ValidationError(format!(
                "unknown gateway kind '{}' (expected loopback or http)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub kind: GatewayKind,
    /// Characters per single-part message
    pub segment_limit: usize,
    pub http: HttpGatewayConfig,
    pub loopback: LoopbackGatewayConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::Loopback,
            segment_limit: 160,
            http: HttpGatewayConfig::default(),
            loopback: LoopbackGatewayConfig::default(),
        }
    }
}

/// Provider HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpGatewayConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            timeout_ms: 10_000,
        }
    }
}

/// Simulated carrier timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackGatewayConfig {
    pub sent_delay_ms: u64,
    pub delivered_delay_ms: u64,
    pub report_delivery: bool,
}

impl Default for LoopbackGatewayConfig {
    fn default() -> Self {
        Self {
            sent_delay_ms: 200,
            delivered_delay_ms: 800,
            report_delivery: true,
        }
    }
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: String,
    pub file_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "./reports".to_string(),
            file_prefix: "SMS".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Check value bounds
    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;
        if !BATCH_SIZE_RANGE.contains(&dispatch.batch_size) {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.batch_size must be between {} and {}, got {}",
                BATCH_SIZE_RANGE.start(),
                BATCH_SIZE_RANGE.end(),
                dispatch.batch_size
            )));
        }
        if !INTER_MESSAGE_DELAY_MS_RANGE.contains(&dispatch.inter_message_delay_ms) {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.inter_message_delay_ms must be between {} and {}, got {}",
                INTER_MESSAGE_DELAY_MS_RANGE.start(),
                INTER_MESSAGE_DELAY_MS_RANGE.end(),
                dispatch.inter_message_delay_ms
            )));
        }
        if dispatch.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.poll_interval_ms must be positive".to_string(),
            ));
        }
        if dispatch.max_polls == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_polls must be at least 1".to_string(),
            ));
        }
        if self.gateway.segment_limit < 2 {
            return Err(ConfigError::ValidationError(
                "gateway.segment_limit must be at least 2".to_string(),
            ));
        }
        if self.gateway.kind == GatewayKind::Http && self.gateway.http.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.http.url is required when gateway.kind = \"http\"".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# SMS Dispatch Configuration
# Environment variables (SMS_DISPATCH_*) override these settings

[dispatch]
batch_size = 10               # 1-20 records per chunk
inter_message_delay_ms = 2000 # 1000-10000, applied after every send
poll_interval_ms = 1000
max_polls = 30
auto_continue = false

[gateway]
kind = "loopback"  # loopback or http
segment_limit = 160

[gateway.http]
url = ""
timeout_ms = 10000

[gateway.loopback]
sent_delay_ms = 200
delivered_delay_ms = 800
report_delivery = true

[report]
output_dir = "./reports"
file_prefix = "SMS"
"#
        .to_string()
    }
}
