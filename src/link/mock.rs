//! In-memory brokers for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ConnectError, Connection, Connector, MessageSink, PublishError, RelayMessage, SubscribeError,
};
use crate::config::BrokerConfig;
use crate::protocol::QoS;

/// Ordered record of connector calls across every broker of one connector
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

/// A fake broker addressed by its name
pub(crate) struct MockBroker {
    pub name: String,
    log: EventLog,
    pub unreachable: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_publish: AtomicBool,
    pub hang_connect: AtomicBool,
    pub publish_delay: Mutex<Option<Duration>>,
    pub connects: AtomicU64,
    pub closes: AtomicU64,
    pub published: Mutex<Vec<RelayMessage>>,
    pub subscriptions: Mutex<Vec<(String, QoS)>>,
    active_publishes: AtomicUsize,
    pub peak_publishes: AtomicUsize,
    live: Mutex<Option<Arc<MockConnection>>>,
}

impl MockBroker {
    fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            unreachable: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            hang_connect: AtomicBool::new(false),
            publish_delay: Mutex::new(None),
            connects: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            active_publishes: AtomicUsize::new(0),
            peak_publishes: AtomicUsize::new(0),
            live: Mutex::new(None),
        }
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", event, self.name));
    }

    /// Deliver a message to the subscriber of the live connection, as the
    /// broker's I/O task would. Returns false when nobody is subscribed.
    pub fn inject(&self, message: RelayMessage) -> bool {
        let conn = self.live.lock().clone();
        match conn {
            Some(conn)
                if conn.alive.load(Ordering::SeqCst) && conn.subscribed.load(Ordering::SeqCst) =>
            {
                match &conn.sink {
                    Some(sink) => {
                        sink(message);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Simulate the broker dropping the live connection
    pub fn drop_connection(&self) {
        if let Some(conn) = self.live.lock().as_ref() {
            conn.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn published(&self) -> Vec<RelayMessage> {
        self.published.lock().clone()
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock() = Some(delay);
    }
}

/// Connector resolving endpoints to [`MockBroker`]s by address
pub(crate) struct MockConnector {
    brokers: HashMap<String, Arc<MockBroker>>,
    pub log: EventLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            brokers: HashMap::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a broker reachable at `address`
    pub fn add_broker(&mut self, address: &str) -> Arc<MockBroker> {
        let broker = Arc::new(MockBroker::new(address, self.log.clone()));
        self.brokers.insert(address.to_string(), broker.clone());
        broker
    }

    fn lookup(&self, endpoint: &BrokerConfig) -> Result<Arc<MockBroker>, ConnectError> {
        self.brokers
            .get(&endpoint.address)
            .cloned()
            .ok_or_else(|| ConnectError::Unreachable(endpoint.address.clone()))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        endpoint: &BrokerConfig,
        _client_id: &str,
        sink: Option<MessageSink>,
    ) -> Result<Arc<dyn Connection>, ConnectError> {
        let broker = self.lookup(endpoint)?;
        broker.record("connect");
        broker.connects.fetch_add(1, Ordering::SeqCst);

        if broker.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if broker.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectError::Rejected("not authorized".to_string()));
        }

        let conn = Arc::new(MockConnection {
            broker: broker.clone(),
            sink,
            alive: AtomicBool::new(true),
            subscribed: AtomicBool::new(false),
        });
        *broker.live.lock() = Some(conn.clone());
        Ok(conn)
    }

    async fn probe(&self, endpoint: &BrokerConfig) -> Result<(), ConnectError> {
        let broker = self.lookup(endpoint)?;
        broker.record("probe");
        if broker.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectError::Unreachable(format!(
                "{}: connection refused",
                broker.name
            )));
        }
        Ok(())
    }
}

/// Decrements the active publish count even when the publish is cancelled
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockConnection {
    broker: Arc<MockBroker>,
    sink: Option<MessageSink>,
    alive: AtomicBool,
    subscribed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscribeError> {
        self.broker.record("subscribe");
        if self.broker.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SubscribeError::Rejected("not authorized".to_string()));
        }
        self.broker
            .subscriptions
            .lock()
            .push((filter.to_string(), qos));
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, message: RelayMessage) -> Result<(), PublishError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(PublishError::ConnectionLost("closed".to_string()));
        }

        let active = self.broker.active_publishes.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.broker.active_publishes);
        self.broker
            .peak_publishes
            .fetch_max(active, Ordering::SeqCst);

        let delay = *self.broker.publish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.broker.fail_publish.load(Ordering::SeqCst) {
            return Err(PublishError::ConnectionLost("broker rejected".to_string()));
        }
        self.broker.published.lock().push(message);
        Ok(())
    }

    async fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.broker.record("close");
            self.broker.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
