//! Configuration loader with file and environment variable support

use crate::{AppConfig, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "sms-dispatch.toml",
    "./config/config.toml",
    "/etc/sms-dispatch/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file not found, searching defaults");
        }

        if let Ok(path) = env::var("SMS_DISPATCH_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Dispatch
        if let Ok(val) = env::var("SMS_DISPATCH_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.dispatch.batch_size = size;
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_DELAY_MS") {
            if let Ok(delay) = val.parse() {
                config.dispatch.inter_message_delay_ms = delay;
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                config.dispatch.poll_interval_ms = interval;
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_MAX_POLLS") {
            if let Ok(polls) = val.parse() {
                config.dispatch.max_polls = polls;
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_AUTO_CONTINUE") {
            config.dispatch.auto_continue = val.parse().unwrap_or(false);
        }

        // Gateway
        if let Ok(val) = env::var("SMS_DISPATCH_GATEWAY") {
            match val.parse() {
                Ok(kind) => config.gateway.kind = kind,
                Err(e) => warn!("Ignoring SMS_DISPATCH_GATEWAY: {}", e),
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_SEGMENT_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.gateway.segment_limit = limit;
            }
        }
        if let Ok(val) = env::var("SMS_DISPATCH_HTTP_URL") {
            config.gateway.http.url = val;
        }
        if let Ok(val) = env::var("SMS_DISPATCH_HTTP_TOKEN") {
            config.gateway.http.auth_token = Some(val);
        }
        if let Ok(val) = env::var("SMS_DISPATCH_HTTP_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                config.gateway.http.timeout_ms = timeout;
            }
        }

        // Report
        if let Ok(val) = env::var("SMS_DISPATCH_REPORT_DIR") {
            config.report.output_dir = val;
        }
        if let Ok(val) = env::var("SMS_DISPATCH_REPORT_PREFIX") {
            config.report.file_prefix = val;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayKind;
    use std::io::Write;

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\nkind = \"http\"\n\n[gateway.http]\nurl = \"http://localhost:9000/sms\"\n"
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.gateway.kind, GatewayKind::Http);
        assert_eq!(config.gateway.http.url, "http://localhost:9000/sms");
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch\nbatch_size = ").unwrap();

        let result = ConfigLoader::with_path(file.path()).load();
        assert!(matches!(result, Err(crate::ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_override() {
        env::set_var("SMS_DISPATCH_REPORT_PREFIX", "Campaign");
        let config = ConfigLoader::with_path("/nonexistent/sms-dispatch.toml").load().unwrap();
        env::remove_var("SMS_DISPATCH_REPORT_PREFIX");

        assert_eq!(config.report.file_prefix, "Campaign");
    }
}
