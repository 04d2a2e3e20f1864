//! Configuration Module
//!
//! Provides TOML-based configuration for the simulator with support for:
//! - Source and target broker endpoints
//! - Relay policy (QoS override, retain stripping, in-flight bound, deadline)
//! - Health monitor thresholds
//! - Console report format
//! - Prometheus exporter
//! - Environment variable overrides (MQSIM__* prefix)
//!
//! A [`BridgeConfig`] is built once at startup and never mutated afterwards.

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::protocol::{ProtocolVersion, QoS};

pub use broker::{parse_broker_address, BrokerConfig, BrokerRole, DEFAULT_PORT};
pub use metrics::MetricsConfig;

mod broker;
mod metrics;


/// Upper bound for `relay.max_in_flight`
pub const MAX_IN_FLIGHT_LIMIT: usize = 1 << 20;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// MQTT protocol used on both links
    pub protocol: ProtocolVersion,
    /// Logging configuration
    pub log: LogConfig,
    /// Broker we subscribe on
    #[serde(default = "BrokerConfig::default_source")]
    pub source: BrokerConfig,
    /// Broker we republish into
    #[serde(default = "BrokerConfig::default_target")]
    pub target: BrokerConfig,
    /// Relay policy
    pub relay: RelayConfig,
    /// Health monitor policy
    pub health: HealthConfig,
    /// Console report configuration
    pub report: ReportConfig,
    /// Metrics exporter configuration
    pub metrics: MetricsConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::default(),
            log: LogConfig::default(),
            source: BrokerConfig::default_source(),
            target: BrokerConfig::default_target(),
            relay: RelayConfig::default(),
            health: HealthConfig::default(),
            report: ReportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Relay policy applied to every bridged message
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Topic filter subscribed on the source broker
    pub topic_filter: String,
    /// QoS for republished messages: -1 preserves the source QoS, 0-2 overrides it
    pub qos_override: i8,
    /// Clear the retain flag on republished messages
    pub strip_retain: bool,
    /// Maximum concurrent publishes in flight; messages beyond this are dropped
    pub max_in_flight: usize,
    /// Per-publish deadline (e.g., "100ms")
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Print a line for every relayed message
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic_filter: "#".to_string(),
            qos_override: -1,
            strip_retain: false,
            max_in_flight: 1000,
            timeout: Duration::from_millis(100),
            verbose: false,
        }
    }
}

impl RelayConfig {
    /// The explicit QoS override, or `None` to preserve the source QoS
    pub fn qos_override(&self) -> Option<QoS> {
        u8::try_from(self.qos_override).ok().and_then(QoS::from_u8)
    }
}

/// Health monitor thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Tick interval (e.g., "5s")
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Consecutive ticks without inbound traffic before the source is reconnected
    pub stall_ticks: u32,
    /// Errors within one tick that force a target reconnect
    pub error_burst: u64,
    /// Errors per dispatched message within one tick that force a target reconnect
    pub error_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stall_ticks: 3,
            error_burst: 100,
            error_ratio: 0.5,
        }
    }
}

/// Timestamp style for console lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// `YYYY-MM-DD HH:MM:SS` in local time
    #[default]
    Datetime,
    /// Seconds since the epoch
    Unix,
}

/// Console report configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Timestamp style for tick lines
    pub timestamp: TimestampFormat,
}

impl BridgeConfig {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQSIM__` prefix with double underscores for nesting:
    ///    - `MQSIM__TARGET__ADDRESS=tcp://10.0.0.2:1883` overrides `target.address`
    ///    - `MQSIM__RELAY__MAX_IN_FLIGHT=500` overrides `relay.max_in_flight`
    ///    - `MQSIM__RELAY__STRIP_RETAIN=true` overrides `relay.strip_retain`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("protocol", "v5")?
            .set_default("log.level", "info")?
            .set_default("source.address", broker::DEFAULT_SOURCE_ADDRESS)?
            .set_default("target.address", broker::DEFAULT_TARGET_ADDRESS)?
            .set_default("relay.topic_filter", "#")?
            .set_default("relay.qos_override", -1)?
            .set_default("relay.strip_retain", false)?
            .set_default("relay.max_in_flight", 1000)?
            .set_default("relay.timeout", "100ms")?
            .set_default("relay.verbose", false)?
            .set_default("health.interval", "5s")?
            .set_default("health.stall_ticks", 3)?
            .set_default("health.error_burst", 100)?
            .set_default("health.error_ratio", 0.5)?
            .set_default("report.timestamp", "datetime")?
            .set_default("metrics.enabled", false)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (MQSIM__RELAY__TIMEOUT, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQSIM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BridgeConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.parse_address()?;
        self.target.parse_address()?;

        for (role, broker) in [("source", &self.source), ("target", &self.target)] {
            if broker.connect_timeout.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "{}.connect_timeout must be greater than zero",
                    role
                )));
            }
            if broker.has_orphan_password() {
                warn!("{}.password is set without a username and will not be sent", role);
            }
        }

        let relay = &self.relay;
        if relay.topic_filter.is_empty() {
            return Err(ConfigError::Validation(
                "relay.topic_filter must not be empty".to_string(),
            ));
        }
        if !(-1..=2).contains(&relay.qos_override) {
            return Err(ConfigError::Validation(
                "relay.qos_override must be -1, 0, 1, or 2".to_string(),
            ));
        }
        if relay.max_in_flight == 0 || relay.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Validation(format!(
                "relay.max_in_flight must be between 1 and {}",
                MAX_IN_FLIGHT_LIMIT
            )));
        }
        if relay.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "relay.timeout must be greater than zero".to_string(),
            ));
        }

        let health = &self.health;
        if health.interval.is_zero() {
            return Err(ConfigError::Validation(
                "health.interval must be greater than zero".to_string(),
            ));
        }
        if health.stall_ticks == 0 {
            return Err(ConfigError::Validation(
                "health.stall_ticks must be at least 1".to_string(),
            ));
        }
        if !(health.error_ratio > 0.0 && health.error_ratio <= 1.0) {
            return Err(ConfigError::Validation(
                "health.error_ratio must be in (0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}
