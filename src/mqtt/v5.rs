//! MQTT v5.0 connector
//!
//! Same connection model as v3.1.1, plus the publish property bag. Topic
//! aliases and subscription identifiers belong to the source connection and
//! are not forwarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, PublishProperties, SubAck, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{close_driver, keep_alive, MAX_PACKET_SIZE};
use crate::config::BrokerConfig;
use crate::link::{
    ConnectError, Connection, Connector, MessageProperties, MessageSink, PublishError,
    RelayMessage, SubscribeError,
};
use crate::protocol::QoS;

fn to_wire(qos: QoS) -> WireQoS {
    match qos {
        QoS::AtMostOnce => WireQoS::AtMostOnce,
        QoS::AtLeastOnce => WireQoS::AtLeastOnce,
        QoS::ExactlyOnce => WireQoS::ExactlyOnce,
    }
}

fn from_wire(qos: WireQoS) -> QoS {
    match qos {
        WireQoS::AtMostOnce => QoS::AtMostOnce,
        WireQoS::AtLeastOnce => QoS::AtLeastOnce,
        WireQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn connect_error(error: ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Rejected(format!("{:?}", code)),
        ConnectionError::Io(e) => ConnectError::Unreachable(e.to_string()),
        other => ConnectError::ConnectionLost(other.to_string()),
    }
}

fn properties_from_wire(properties: PublishProperties) -> MessageProperties {
    MessageProperties {
        payload_format_indicator: properties.payload_format_indicator,
        message_expiry_interval: properties.message_expiry_interval,
        content_type: properties.content_type,
        response_topic: properties.response_topic,
        correlation_data: properties.correlation_data,
        user_properties: properties.user_properties,
    }
}

fn properties_to_wire(properties: MessageProperties) -> PublishProperties {
    PublishProperties {
        payload_format_indicator: properties.payload_format_indicator,
        message_expiry_interval: properties.message_expiry_interval,
        content_type: properties.content_type,
        response_topic: properties.response_topic,
        correlation_data: properties.correlation_data,
        user_properties: properties.user_properties,
        ..Default::default()
    }
}

fn relay_message(publish: Publish) -> RelayMessage {
    let topic = String::from_utf8_lossy(&publish.topic).into_owned();
    let message = RelayMessage::new(
        topic,
        publish.payload,
        from_wire(publish.qos),
        publish.retain,
    );
    match publish.properties {
        Some(properties) => message.with_properties(properties_from_wire(properties)),
        None => message,
    }
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

/// Connector speaking MQTT v5.0
pub struct V5Connector {
    /// Request queue depth between the client handle and its event loop
    capacity: usize,
}

impl V5Connector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for V5Connector {
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
        options.set_clean_start(true);
        options.set_max_packet_size(Some(MAX_PACKET_SIZE));
        if let Some((username, password)) = endpoint.login() {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, self.capacity);

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

        Ok(Arc::new(V5Connection {
            client,
            subacks: tokio::sync::Mutex::new(suback_rx),
            alive,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

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
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                debug!("mqtt v5: broker sent disconnect: {:?}", disconnect.reason_code);
                break;
            }
            Ok(event) => trace!("mqtt v5: {:?}", event),
            Err(e) => {
                if alive.load(Ordering::Acquire) {
                    debug!("mqtt v5: connection lost: {}", e);
                }
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
}

struct V5Connection {
    client: AsyncClient,
    subacks: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), SubscribeError>>>,
    alive: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for V5Connection {
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
        let qos = to_wire(message.qos);
        let result = match message.properties {
            Some(properties) => {
                self.client
                    .publish_with_properties(
                        message.topic,
                        qos,
                        message.retain,
                        message.payload,
                        properties_to_wire(properties),
                    )
                    .await
            }
            None => {
                self.client
                    .publish(message.topic, qos, message.retain, message.payload)
                    .await
            }
        };
        result.map_err(|e| PublishError::ConnectionLost(e.to_string()))
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
