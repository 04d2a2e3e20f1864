//! Broker Endpoint Configuration
//!
//! Address, credentials and connection parameters for one side of the bridge.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::ConfigError;

/// Default MQTT port used when an address omits one
pub const DEFAULT_PORT: u16 = 1883;

/// Which side of the bridge an endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerRole {
    /// Broker we subscribe on
    Source,
    /// Broker we republish into
    Target,
}

impl BrokerRole {
    /// Default client identifier prefix for this role
    pub fn default_client_prefix(self) -> &'static str {
        match self {
            BrokerRole::Source => "sim-source",
            BrokerRole::Target => "sim-target",
        }
    }
}

impl std::fmt::Display for BrokerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerRole::Source => write!(f, "source"),
            BrokerRole::Target => write!(f, "target"),
        }
    }
}

/// Configuration for one broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker URI (`tcp://host:port`, `mqtt://host:port` or `host[:port]`)
    pub address: String,

    /// Username for authentication. An empty string counts as unset.
    #[serde(default, deserialize_with = "non_empty")]
    pub username: Option<String>,

    /// Password for authentication. An empty string counts as unset.
    ///
    /// Only sent together with a username; the client library has no
    /// password-only login, so a password without a username is ignored
    /// (validation warns about it).
    #[serde(default, deserialize_with = "non_empty")]
    pub password: Option<String>,

    /// Client identifier prefix; a unique suffix is appended per connection
    #[serde(default)]
    pub client_id_prefix: Option<String>,

    /// Keep-alive interval
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Handshake timeout for connect and subscribe
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// `${VAR:-}` substitutes to an empty string; treat that as absent
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Default source broker address
pub(crate) const DEFAULT_SOURCE_ADDRESS: &str = "tcp://test.mosquitto.org:1883";
/// Default target broker address
pub(crate) const DEFAULT_TARGET_ADDRESS: &str = "tcp://localhost:1883";

impl BrokerConfig {
    /// Build an endpoint with default connection parameters
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            client_id_prefix: None,
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
        }
    }

    pub fn default_source() -> Self {
        Self::new(DEFAULT_SOURCE_ADDRESS)
    }

    pub fn default_target() -> Self {
        Self::new(DEFAULT_TARGET_ADDRESS)
    }

    /// Attach credentials, ignoring empty values
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// Username and password to send in CONNECT, if a username is set
    pub fn login(&self) -> Option<(String, String)> {
        let username = self.username.clone()?;
        Some((username, self.password.clone().unwrap_or_default()))
    }

    /// A password is configured but will never be sent
    pub fn has_orphan_password(&self) -> bool {
        self.username.is_none() && self.password.is_some()
    }

    /// Client identifier prefix for the given role
    pub fn client_prefix(&self, role: BrokerRole) -> &str {
        self.client_id_prefix
            .as_deref()
            .unwrap_or_else(|| role.default_client_prefix())
    }

    /// Split the configured URI into host and port
    pub fn parse_address(&self) -> Result<(String, u16), ConfigError> {
        parse_broker_address(&self.address)
    }
}

/// Parse a broker URI into host and port.
///
/// Accepts `tcp://` and `mqtt://` schemes or a bare `host[:port]`, with
/// bracketed IPv6 hosts. The port defaults to 1883.
pub fn parse_broker_address(address: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| {
        ConfigError::Validation(format!("invalid broker address '{}': {}", address, reason))
    };

    let rest = match address.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => rest,
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        },
        None => address,
    };

    // Drop any path component
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("bad port"))?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid("unexpected text after IPv6 literal")),
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_scheme() {
        let (host, port) = parse_broker_address("tcp://broker.example.com:8883").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);

        let (host, port) = parse_broker_address("mqtt://localhost").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_address_bare() {
        let (host, port) = parse_broker_address("10.0.0.5:1884").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 1884);

        let (host, port) = parse_broker_address("broker").unwrap();
        assert_eq!(host, "broker");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_address_ipv6() {
        let (host, port) = parse_broker_address("tcp://[::1]:1999").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 1999);

        let (host, port) = parse_broker_address("[fe80::1]").unwrap();
        assert_eq!(host, "fe80::1");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_broker_address("ssl://broker:8883").is_err());
        assert!(parse_broker_address("tcp://").is_err());
        assert!(parse_broker_address("tcp://broker:notaport").is_err());
        assert!(parse_broker_address(":1883").is_err());
        assert!(parse_broker_address("[::1").is_err());
    }

    #[test]
    fn test_client_prefix_defaults_per_role() {
        let config = BrokerConfig::default_source();
        assert_eq!(config.client_prefix(BrokerRole::Source), "sim-source");
        assert_eq!(config.client_prefix(BrokerRole::Target), "sim-target");

        let config = BrokerConfig {
            client_id_prefix: Some("edge".to_string()),
            ..BrokerConfig::default_target()
        };
        assert_eq!(config.client_prefix(BrokerRole::Target), "edge");
    }

    #[test]
    fn test_empty_credentials_are_dropped() {
        let config = BrokerConfig::default_target()
            .with_credentials(Some(String::new()), Some("secret".to_string()));
        assert_eq!(config.username, None);
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_login_requires_username() {
        let config = BrokerConfig::default_target()
            .with_credentials(Some("writer".to_string()), None);
        assert_eq!(
            config.login(),
            Some(("writer".to_string(), String::new()))
        );
        assert!(!config.has_orphan_password());

        let config = BrokerConfig::default_target()
            .with_credentials(None, Some("secret".to_string()));
        assert_eq!(config.login(), None);
        assert!(config.has_orphan_password());

        assert_eq!(BrokerConfig::default_target().login(), None);
    }

    #[test]
    fn test_empty_credentials_deserialize_as_unset() {
        let config: BrokerConfig =
            toml::from_str("address = \"broker\"\nusername = \"\"\npassword = \"\"").unwrap();
        assert_eq!(config.username, None);
        assert_eq!(config.password, None);

        let config: BrokerConfig =
            toml::from_str("address = \"broker\"\nusername = \"reader\"").unwrap();
        assert_eq!(config.username.as_deref(), Some("reader"));
        assert_eq!(config.password, None);
    }
}
