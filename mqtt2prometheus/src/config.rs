//! Configuration for the MQTT exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Staleness settings.
    #[serde(default)]
    pub staleness: StalenessConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host (default: "mqtt").
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port (default: 1883).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier; generated from the process id when unset.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Topic filter to subscribe to (default: every topic).
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Delay before retrying after a connection error (seconds).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_host() -> String {
    "mqtt".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_topic() -> String {
    "#".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

impl MqttConfig {
    /// The configured client id, or one derived from the process id.
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt2prometheus-{}", std::process::id()))
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            topic: default_topic(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9100").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Staleness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// How long a topic stays exported without updates (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How often the background sweep removes stale topics (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_timeout() -> u64 {
    150
}

fn default_sweep_interval() -> u64 {
    60
}

impl StalenessConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Values taken from the environment or command line.
///
/// Each set field replaces the corresponding configuration value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub listen: Option<String>,
    pub log_level: Option<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides and re-validate.
    pub fn apply_overrides(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if let Some(host) = overrides.mqtt_host {
            self.mqtt.host = host;
        }
        if let Some(port) = overrides.mqtt_port {
            self.mqtt.port = port;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.staleness.timeout_secs = timeout;
        }
        if let Some(listen) = overrides.listen {
            self.prometheus.listen = listen;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt host must not be empty".to_string(),
            ));
        }

        if self.mqtt.port == 0 {
            return Err(ConfigError::Validation("mqtt port must be > 0".to_string()));
        }

        if self.mqtt.topic.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt topic filter must not be empty".to_string(),
            ));
        }

        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Validation(
                "keep_alive_secs must be >= 5".to_string(),
            ));
        }

        if self.staleness.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // "/" is reserved for the redirect
        if self.prometheus.path == "/" {
            return Err(ConfigError::Validation(
                "Metrics path must not be /".to_string(),
            ));
        }

        Ok(())
    }
}
