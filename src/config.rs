use crate::constants::*;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Factory RPC surface configuration (`[factory]`)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FactoryConfig {
    /// Address the factory RPC listener binds to (default 127.0.0.1:12010)
    pub listen: Option<String>,
}

impl FactoryConfig {
    pub fn listen_addr(&self) -> String {
        self.listen
            .clone()
            .unwrap_or_else(|| DEFAULT_FACTORY_LISTEN.to_string())
    }
}

/// Process-wide defaults for every secure endpoint (`[endpoints]`).
/// A creation request may override the handshake timeout and bind address per endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Host used when a creation request names no bind address (port is always ephemeral then)
    pub default_bind_host: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub bind_timeout_ms: Option<u64>,
    /// How long close waits for in-flight handshakes to unwind after aborting them
    pub close_timeout_ms: Option<u64>,
    /// Outcome records kept per endpoint; the oldest record is evicted when full
    pub outcome_log_capacity: Option<usize>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            default_bind_host: Some(DEFAULT_BIND_HOST.to_string()),
            handshake_timeout_ms: Some(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            bind_timeout_ms: Some(DEFAULT_BIND_TIMEOUT_MS),
            close_timeout_ms: Some(DEFAULT_CLOSE_TIMEOUT_MS),
            outcome_log_capacity: Some(DEFAULT_OUTCOME_LOG_CAPACITY),
        }
    }
}

impl EndpointConfig {
    pub fn default_bind_host(&self) -> &str {
        self.default_bind_host.as_deref().unwrap_or(DEFAULT_BIND_HOST)
    }

    /// The default host must be an IP literal; endpoints bind without name resolution
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.default_bind_host();
        host.parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| ConfigError::Invalid {
                field: "endpoints.default_bind_host",
                reason: format!("'{}' is not an IP address", host),
            })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(
            self.handshake_timeout_ms
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS)
                .max(1),
        )
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms.unwrap_or(DEFAULT_BIND_TIMEOUT_MS).max(1))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(
            self.close_timeout_ms
                .unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS)
                .max(1),
        )
    }

    pub fn outcome_log_capacity(&self) -> usize {
        self.outcome_log_capacity
            .unwrap_or(DEFAULT_OUTCOME_LOG_CAPACITY)
            .max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Path to JSON line event log (rotated). If unset, defaults to logs/tlsfactory.jsonl
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
    /// Minimum level printed on the console: trace | debug | info | warn | error
    pub console_min_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app_name: Option<String>,
    pub factory: Option<FactoryConfig>,
    pub endpoints: Option<EndpointConfig>,
    /// Logging / events configuration
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: None,
            factory: Some(FactoryConfig::default()),
            endpoints: Some(EndpointConfig::default()),
            logging: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg = toml::from_str::<Config>(content)?;
        if let Some(endpoints) = &cfg.endpoints {
            endpoints.validate()?;
        }
        Ok(cfg)
    }

    /// Endpoint defaults with every unset field resolved
    pub fn endpoint_settings(&self) -> EndpointConfig {
        self.endpoints.clone().unwrap_or_default()
    }

    pub fn factory_listen_addr(&self) -> String {
        self.factory
            .as_ref()
            .map(|f| f.listen_addr())
            .unwrap_or_else(|| DEFAULT_FACTORY_LISTEN.to_string())
    }

    pub fn app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME)
    }
}
