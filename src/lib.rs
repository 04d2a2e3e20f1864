//! mqsim - live MQTT message bridge and traffic simulator
//!
//! Subscribes to a topic filter on a source broker and republishes every
//! matching message to a target broker, with bounded concurrent deliveries,
//! health-driven reconnects and a per-interval throughput report.

pub mod bridge;
pub mod config;
pub mod link;
pub mod metrics;
pub mod mqtt;
pub mod protocol;
pub mod report;

pub use bridge::{BridgeSession, SessionError, SessionState, SessionSummary};
pub use config::BridgeConfig;
pub use link::{BrokerLink, Connection, Connector, LinkState, RelayMessage};
pub use metrics::{Metrics, MetricsServer, MetricsWindow};
pub use protocol::{ProtocolVersion, QoS};
pub use report::Reporter;
