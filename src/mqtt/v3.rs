//! MQTT v3.1.1 connector

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, Publish, SubAck,
    SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{close_driver, keep_alive, MAX_PACKET_SIZE};
use crate::config::BrokerConfig;
use crate::link::{
    ConnectError, Connection, Connector, MessageSink, PublishError, RelayMessage, SubscribeError,
};
use crate::protocol::QoS;

fn to_wire(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_wire(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn connect_error(error: ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Rejected(format!("{:?}", code)),
        ConnectionError::Io(e) => ConnectError::Unreachable(e.to_string()),
        other => ConnectError::ConnectionLost(other.to_string()),
    }
}

fn relay_message(publish: Publish) -> RelayMessage {
    RelayMessage::new(
        publish.topic,
        publish.payload,
        from_wire(publish.qos),
        publish.retain,
    )
}

fn suback_result(ack: SubAck) -> Result<(), SubscribeError> {
    match ack
        .return_codes
        .iter()
        .find(|code| !matches!(code, SubscribeReasonCode::Success(_)))
    {
        Some(code) => Err(SubscribeError::Rejected(format!("{:?}", code))),
        None => Ok(()),
    }
}

/// Connector speaking MQTT v3.1.1
pub struct V3Connector {
    /// Request queue depth between the client handle and its event loop
    capacity: usize,
}

impl V3Connector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for V3Connector {
    async fn connect(
        &self,
        endpoint: &BrokerConfig,
        client_id: &str,
        sink: Option<MessageSink>,
    ) -> Result<Arc<dyn Connection>, ConnectError> {
        let (host, port) = endpoint
            .parse_address()
            .map_err(|e| ConnectError::InvalidAddress(e.to_string()))?;

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive(endpoint));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE as usize, MAX_PACKET_SIZE as usize);
        if let Some((username, password)) = endpoint.login() {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, self.capacity);

        // Handshake; the caller bounds this with the connect timeout
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(e) => return Err(connect_error(e)),
            }
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (suback_tx, suback_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(eventloop, sink, suback_tx, alive.clone()));

        Ok(Arc::new(V3Connection {
            client,
            subacks: tokio::sync::Mutex::new(suback_rx),
            alive,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

/// Owns the event loop for the lifetime of one connection
async fn drive(
    mut eventloop: EventLoop,
    sink: Option<MessageSink>,
    subacks: mpsc::UnboundedSender<Result<(), SubscribeError>>,
    alive: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(sink) = &sink {
                    sink(relay_message(publish));
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let _ = subacks.send(suback_result(ack));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                debug!("mqtt v3: broker sent disconnect");
                break;
            }
            Ok(event) => trace!("mqtt v3: {:?}", event),
            Err(e) => {
                if alive.load(Ordering::Acquire) {
                    debug!("mqtt v3: connection lost: {}", e);
                }
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
}

struct V3Connection {
    client: AsyncClient,
    subacks: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), SubscribeError>>>,
    alive: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for V3Connection {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscribeError> {
        if !self.is_alive() {
            return Err(SubscribeError::NotConnected);
        }
        let mut subacks = self.subacks.lock().await;
        self.client
            .subscribe(filter, to_wire(qos))
            .await
            .map_err(|e| SubscribeError::ConnectionLost(e.to_string()))?;
        subacks.recv().await.unwrap_or_else(|| {
            Err(SubscribeError::ConnectionLost(
                "connection closed before SUBACK".to_string(),
            ))
        })
    }

    async fn publish(&self, message: RelayMessage) -> Result<(), PublishError> {
        if !self.is_alive() {
            return Err(PublishError::ConnectionLost("connection closed".to_string()));
        }
        self.client
            .publish_bytes(
                message.topic,
                to_wire(message.qos),
                message.retain,
                message.payload,
            )
            .await
            .map_err(|e| PublishError::ConnectionLost(e.to_string()))
    }

    async fn close(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let driver = self.driver.lock().take();
        close_driver(self.client.disconnect(), driver).await;
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use crate::mqtt::scripted::{self, ScriptedBroker, CONNECT, DISCONNECT, SUBSCRIBE};

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    #[test]
    fn test_qos_mapping() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_wire(to_wire(qos)), qos);
        }
    }

    #[test]
    fn test_relay_message_from_publish() {
        let mut publish = Publish::new("a/b", rumqttc::QoS::AtLeastOnce, "hi");
        publish.retain = true;

        let msg = relay_message(publish);
        assert_eq!(
            msg,
            RelayMessage::new("a/b", Bytes::from_static(b"hi"), QoS::AtLeastOnce, true)
        );
        assert!(msg.properties.is_none());
    }

    #[test]
    fn test_suback_failure_is_rejected() {
        let ok = SubAck::new(1, vec![SubscribeReasonCode::Success(rumqttc::QoS::ExactlyOnce)]);
        assert_eq!(suback_result(ok), Ok(()));

        let failed = SubAck::new(2, vec![SubscribeReasonCode::Failure]);
        assert!(matches!(
            suback_result(failed),
            Err(SubscribeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_invalid_address() {
        let connector = V3Connector::new(10);
        let result = connector
            .connect(&BrokerConfig::new("ws://broker"), "sim-target-1-1", None)
            .await;
        assert!(matches!(result, Err(ConnectError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_connection_relays_large_publish() {
        let broker = ScriptedBroker::bind().await;
        let endpoint = broker.endpoint();
        let payload = vec![7u8; 20 * 1024];

        let script = {
            let payload = payload.clone();
            tokio::spawn(async move {
                let mut stream = broker.accept().await;
                scripted::expect_packet(&mut stream, CONNECT).await;
                scripted::send(&mut stream, &CONNACK).await;

                let subscribe = scripted::expect_packet(&mut stream, SUBSCRIBE).await;
                let suback = scripted::encode(0x90, &[subscribe[0], subscribe[1], 0x02]);
                scripted::send(&mut stream, &suback).await;
                scripted::send(&mut stream, &scripted::publish("t/big", &payload, true, false))
                    .await;

                scripted::expect_packet(&mut stream, DISCONNECT).await;
            })
        };

        let (sink, received) = scripted::collecting_sink();
        let connection = V3Connector::new(10)
            .connect(&endpoint, "sim-source-1-1", Some(sink))
            .await
            .unwrap();
        connection.subscribe("t/#", QoS::ExactlyOnce).await.unwrap();

        assert!(scripted::eventually(|| received.lock().len() == 1).await);
        assert_eq!(
            received.lock()[0],
            RelayMessage::new("t/big", Bytes::from(payload), QoS::AtMostOnce, true)
        );
        assert!(connection.is_alive());

        // close sends DISCONNECT before stopping the driver
        connection.close().await;
        assert!(!connection.is_alive());
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_broker_hangup_marks_connection_dead() {
        let broker = ScriptedBroker::bind().await;
        let endpoint = broker.endpoint();

        tokio::spawn(async move {
            let mut stream = broker.accept().await;
            scripted::expect_packet(&mut stream, CONNECT).await;
            scripted::send(&mut stream, &CONNACK).await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let connection = V3Connector::new(10)
            .connect(&endpoint, "sim-target-1-1", None)
            .await
            .unwrap();

        assert!(scripted::eventually(|| !connection.is_alive()).await);
        let message = RelayMessage::new("t/1", Bytes::new(), QoS::AtMostOnce, false);
        assert!(matches!(
            connection.publish(message).await,
            Err(PublishError::ConnectionLost(_))
        ));
        assert_eq!(
            connection.subscribe("t/#", QoS::AtMostOnce).await,
            Err(SubscribeError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_connect_refused_by_broker() {
        let broker = ScriptedBroker::bind().await;
        let endpoint = broker.endpoint();

        tokio::spawn(async move {
            let mut stream = broker.accept().await;
            scripted::expect_packet(&mut stream, CONNECT).await;
            // Bad user name or password
            scripted::send(&mut stream, &[0x20, 0x02, 0x00, 0x04]).await;
        });

        let result = V3Connector::new(10)
            .connect(&endpoint, "sim-target-1-1", None)
            .await;
        assert!(matches!(result, Err(ConnectError::Rejected(_))));
    }
}
