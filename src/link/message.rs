//! Relay Message Types
//!
//! The value handed from the source link to the relay pipeline.

use bytes::Bytes;

use crate::protocol::QoS;

/// MQTT v5 publish properties carried across the bridge untouched.
///
/// The bridge never looks inside; per-connection properties (topic alias,
/// subscription identifiers) are not part of the bag because they have no
/// meaning on the target connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub user_properties: Vec<(String, String)>,
}

/// A message received on the source broker, on its way to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Topic name
    pub topic: String,
    /// Message payload
    pub payload: Bytes,
    /// Quality of Service level
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// v5 properties; always `None` on v3.1.1 links
    pub properties: Option<MessageProperties>,
}

impl RelayMessage {
    /// Create a message without properties
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            properties: None,
        }
    }

    /// Attach a property bag
    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}
