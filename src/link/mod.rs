//! Broker Links
//!
//! A [`BrokerLink`] owns one logical connection to one broker, either the
//! source (subscribe side) or the target (publish side) of the bridge.
//!
//! # Reconnection
//!
//! Links never reconnect on their own. A reconnect is requested explicitly by
//! the session at startup or by the health monitor, and runs under a lock
//! scoped to that link only, so reconnecting the source never stalls deliveries
//! on the target and vice versa.
//!
//! The connection handle is never handed out. Callers go through methods that
//! fetch the current handle under the link's lock, so nobody can observe a
//! half-replaced connection. Each successful connect bumps the link's
//! generation.
//!
//! Resubscribing the source after a reconnect loses whatever the source broker
//! published while the link was down. That gap is accepted, not retried.

mod connector;
mod error;
mod message;

#[cfg(test)]
pub(crate) mod mock;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub use connector::{probe_tcp, Connection, Connector, MessageSink, PROBE_TIMEOUT};
pub use error::{ConnectError, LinkError, PublishError, SubscribeError};
pub use message::{MessageProperties, RelayMessage};

use crate::config::{BrokerConfig, BrokerRole};
use crate::protocol::QoS;

/// QoS requested for the source subscription
pub const SOURCE_SUBSCRIBE_QOS: QoS = QoS::ExactlyOnce;

/// Status of a broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection, nothing in progress
    Disconnected,
    /// Connect or reconnect in progress; no publish/subscribe is issued
    Connecting,
    /// Connected and operational
    Connected,
    /// Was connected, but the connection dropped or a reconnect failed
    Degraded,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Source-side subscription settings
struct Subscription {
    filter: String,
    sink: MessageSink,
}

/// One side of the bridge
pub struct BrokerLink {
    role: BrokerRole,
    endpoint: BrokerConfig,
    connector: Arc<dyn Connector>,
    /// Present on the source link only
    subscription: Option<Subscription>,
    state: RwLock<LinkState>,
    /// Current connection handle; only replaced while `reconnect` is held
    slot: RwLock<Option<Arc<dyn Connection>>>,
    /// Serializes connect/reconnect/close on this link
    reconnect: Mutex<()>,
    generation: AtomicU64,
    attempts: AtomicU64,
}

impl BrokerLink {
    /// Create the source link. `sink` receives every message from the filter.
    pub fn source(
        endpoint: BrokerConfig,
        connector: Arc<dyn Connector>,
        filter: impl Into<String>,
        sink: MessageSink,
    ) -> Self {
        Self::with_role(
            BrokerRole::Source,
            endpoint,
            connector,
            Some(Subscription {
                filter: filter.into(),
                sink,
            }),
        )
    }

    /// Create the target link
    pub fn target(endpoint: BrokerConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_role(BrokerRole::Target, endpoint, connector, None)
    }

    fn with_role(
        role: BrokerRole,
        endpoint: BrokerConfig,
        connector: Arc<dyn Connector>,
        subscription: Option<Subscription>,
    ) -> Self {
        Self {
            role,
            endpoint,
            connector,
            subscription,
            state: RwLock::new(LinkState::Disconnected),
            slot: RwLock::new(None),
            reconnect: Mutex::new(()),
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> BrokerRole {
        self.role
    }

    pub fn endpoint(&self) -> &BrokerConfig {
        &self.endpoint
    }

    /// Subscribed topic filter (source link only)
    pub fn filter(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.filter.as_str())
    }

    /// Current state. A connected link whose connection has died reports
    /// `Degraded` until it is reconnected.
    pub fn state(&self) -> LinkState {
        let state = *self.state.read();
        if state == LinkState::Connected {
            let alive = self
                .slot
                .read()
                .as_ref()
                .map(|conn| conn.is_alive())
                .unwrap_or(false);
            if !alive {
                return LinkState::Degraded;
            }
        }
        state
    }

    /// Number of successful connects so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of connect attempts so far, successful or not
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// TCP-level reachability check
    pub async fn probe(&self) -> Result<(), ConnectError> {
        self.connector.probe(&self.endpoint).await
    }

    /// Connect, replacing any previous connection.
    ///
    /// For the source link the configured filter is (re)subscribed before the
    /// link is reported `Connected`.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let _guard = self.reconnect.lock().await;

        let was_connected = self.generation() > 0;
        *self.state.write() = LinkState::Connecting;

        let previous = self.slot.write().take();
        if let Some(conn) = previous {
            debug!("{} link: closing previous connection", self.role);
            conn.close().await;
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let client_id = generate_client_id(self.endpoint.client_prefix(self.role));
        debug!(
            "{} link: connecting to {} as {}",
            self.role, self.endpoint.address, client_id
        );

        match self.establish(&client_id).await {
            Ok(conn) => {
                *self.slot.write() = Some(conn);
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                *self.state.write() = LinkState::Connected;
                info!(
                    "{} link: connected to {} (generation {})",
                    self.role, self.endpoint.address, generation
                );
                Ok(())
            }
            Err(e) => {
                *self.state.write() = if was_connected {
                    LinkState::Degraded
                } else {
                    LinkState::Disconnected
                };
                warn!("{} link: {}: {}", self.role, self.endpoint.address, e);
                Err(e)
            }
        }
    }

    /// Reconnect on behalf of the health monitor; same as [`connect`](Self::connect)
    pub async fn reconnect(&self) -> Result<(), LinkError> {
        info!("{} link: reconnecting to {}", self.role, self.endpoint.address);
        self.connect().await
    }

    async fn establish(&self, client_id: &str) -> Result<Arc<dyn Connection>, LinkError> {
        let deadline = self.endpoint.connect_timeout;
        let sink = self.subscription.as_ref().map(|s| s.sink.clone());

        let conn = timeout(
            deadline,
            self.connector.connect(&self.endpoint, client_id, sink),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;

        if let Some(subscription) = &self.subscription {
            let subscribed = timeout(
                deadline,
                conn.subscribe(&subscription.filter, SOURCE_SUBSCRIBE_QOS),
            )
            .await
            .unwrap_or(Err(SubscribeError::Timeout));

            if let Err(e) = subscribed {
                conn.close().await;
                return Err(e.into());
            }
        }

        Ok(conn)
    }

    fn current(&self) -> Option<Arc<dyn Connection>> {
        self.slot.read().clone()
    }

    /// Subscribe an additional filter on the live source connection
    pub async fn subscribe(&self, filter: &str) -> Result<(), SubscribeError> {
        if self.role != BrokerRole::Source {
            return Err(SubscribeError::Rejected(
                "subscribe is only valid on the source link".to_string(),
            ));
        }
        let conn = self.current().ok_or(SubscribeError::NotConnected)?;
        timeout(
            self.endpoint.connect_timeout,
            conn.subscribe(filter, SOURCE_SUBSCRIBE_QOS),
        )
        .await
        .unwrap_or(Err(SubscribeError::Timeout))
    }

    /// Publish one message, giving up after `deadline`
    pub async fn publish(
        &self,
        message: RelayMessage,
        deadline: Duration,
    ) -> Result<(), PublishError> {
        if self.role != BrokerRole::Target {
            return Err(PublishError::WrongRole);
        }
        let conn = self.current().ok_or(PublishError::NotConnected)?;
        timeout(deadline, conn.publish(message))
            .await
            .unwrap_or(Err(PublishError::Timeout))
    }

    /// Disconnect and forget the connection
    pub async fn close(&self) {
        let _guard = self.reconnect.lock().await;
        let previous = self.slot.write().take();
        if let Some(conn) = previous {
            conn.close().await;
            info!("{} link: disconnected from {}", self.role, self.endpoint.address);
        }
        *self.state.write() = LinkState::Disconnected;
    }
}

/// Unique client identifier: `<prefix>-<unix nanos>-<random>`
pub fn generate_client_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}-{}-{}", prefix, nanos, suffix)
}
