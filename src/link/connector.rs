//! Broker Connection Abstraction
//!
//! The bridge core never speaks the wire protocol itself. It drives a
//! [`Connector`] that produces [`Connection`]s; `crate::mqtt` provides the
//! v3.1.1 and v5.0 implementations, tests provide in-memory ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::{ConnectError, PublishError, SubscribeError};
use super::message::RelayMessage;
use crate::config::BrokerConfig;
use crate::protocol::QoS;

/// Callback for messages received from a source broker.
///
/// Invoked from the connection's I/O task, possibly back-to-back; it must not
/// block.
pub type MessageSink = Arc<dyn Fn(RelayMessage) + Send + Sync>;

/// Deadline for the TCP-level reachability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Factory for broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial the broker and complete the protocol handshake.
    ///
    /// When `sink` is given it is installed before this returns, so every
    /// message the broker sends after the handshake reaches it.
    async fn connect(
        &self,
        endpoint: &BrokerConfig,
        client_id: &str,
        sink: Option<MessageSink>,
    ) -> Result<Arc<dyn Connection>, ConnectError>;

    /// Best-effort reachability check ahead of the full handshake
    async fn probe(&self, endpoint: &BrokerConfig) -> Result<(), ConnectError> {
        probe_tcp(endpoint).await
    }
}

/// One live broker connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe and wait for the broker's acknowledgement
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscribeError>;

    /// Publish one message
    async fn publish(&self, message: RelayMessage) -> Result<(), PublishError>;

    /// Disconnect and release the underlying socket
    async fn close(&self);

    /// False once the connection's I/O has stopped
    fn is_alive(&self) -> bool;
}

/// Open and immediately close a TCP connection to the endpoint
pub async fn probe_tcp(endpoint: &BrokerConfig) -> Result<(), ConnectError> {
    let (host, port) = endpoint
        .parse_address()
        .map_err(|e| ConnectError::InvalidAddress(e.to_string()))?;

    let stream = timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| ConnectError::Unreachable(format!("{}:{}: {}", host, port, e)))?;
    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_tcp_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let endpoint = BrokerConfig::new(format!("tcp://{}", addr));
        assert_eq!(probe_tcp(&endpoint).await, Ok(()));
    }

    #[tokio::test]
    async fn test_probe_tcp_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = BrokerConfig::new(format!("tcp://{}", addr));
        assert!(matches!(
            probe_tcp(&endpoint).await,
            Err(ConnectError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_tcp_invalid_address() {
        let endpoint = BrokerConfig::new("ssl://broker:8883");
        assert!(matches!(
            probe_tcp(&endpoint).await,
            Err(ConnectError::InvalidAddress(_))
        ));
    }
}
