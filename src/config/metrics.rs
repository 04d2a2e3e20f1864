//! Metrics exporter configuration

use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;

/// Prometheus exporter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the HTTP exporter is started
    pub enabled: bool,
    /// HTTP bind address for the `/metrics` endpoint
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 9464)),
        }
    }
}
