//! MQTT client connectors
//!
//! [`Connector`] implementations on top of `rumqttc`, one per protocol
//! version. Each connection runs a driver task that owns the client's event
//! loop: it forwards PUBLISH packets to the message sink and SUBACKs to the
//! pending subscribe call. The driver stops at the first network error; the
//! connection then reports itself dead and the health monitor decides when
//! to reconnect.

mod v3;
mod v5;

#[cfg(test)]
mod scripted;

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

pub use v3::V3Connector;
pub use v5::V5Connector;

use crate::config::BrokerConfig;
use crate::link::Connector;
use crate::protocol::ProtocolVersion;

/// Largest packet accepted or sent: the protocol maximum (256 MiB - 1).
/// Must be set explicitly; the client library's default is 10 KiB.
pub(crate) const MAX_PACKET_SIZE: u32 = 268_435_455;

/// How long `close` waits for the DISCONNECT to go out
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Connector for the given protocol version. `capacity` sizes the request
/// queue of each client; use the relay's in-flight limit.
pub fn connector_for(protocol: ProtocolVersion, capacity: usize) -> Arc<dyn Connector> {
    match protocol {
        ProtocolVersion::V3 => Arc::new(V3Connector::new(capacity)),
        ProtocolVersion::V5 => Arc::new(V5Connector::new(capacity)),
    }
}

/// Keep-alive below one second is rejected by the client library
pub(crate) fn keep_alive(endpoint: &BrokerConfig) -> Duration {
    endpoint.keep_alive.max(Duration::from_secs(1))
}

/// Send DISCONNECT, give the driver a moment to flush it, then stop the driver
pub(crate) async fn close_driver<F, E>(disconnect: F, driver: Option<JoinHandle<()>>)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match timeout(CLOSE_GRACE, disconnect).await {
        Ok(Err(e)) => debug!("mqtt: disconnect request failed: {}", e),
        Err(_) => debug!("mqtt: disconnect request timed out"),
        Ok(Ok(())) => {}
    }

    if let Some(mut driver) = driver {
        if timeout(CLOSE_GRACE, &mut driver).await.is_err() {
            driver.abort();
        }
    }
}
