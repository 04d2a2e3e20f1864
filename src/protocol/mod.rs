//! MQTT protocol definitions shared by both client variants
//!
//! Only the pieces the bridge needs to reason about: protocol version and QoS.
//! The wire codec itself lives in the client library behind `crate::mqtt`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// MQTT Protocol Version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// MQTT v3.1.1 (protocol level 4)
    #[serde(alias = "3", alias = "v311")]
    V3,
    /// MQTT v5.0 (protocol level 5)
    #[default]
    #[serde(alias = "5")]
    V5,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3 => write!(f, "MQTT v3.1.1"),
            ProtocolVersion::V5 => write!(f, "MQTT v5"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "3" | "v3" | "311" | "v311" => Ok(ProtocolVersion::V3),
            "5" | "v5" => Ok(ProtocolVersion::V5),
            other => Err(format!(
                "unsupported MQTT version: {} (supported: 3, 5)",
                other
            )),
        }
    }
}

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}
