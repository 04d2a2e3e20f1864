//! Broker link error types

use std::fmt;

/// Failure to establish a broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Address could not be parsed
    InvalidAddress(String),
    /// DNS or TCP failure
    Unreachable(String),
    /// Broker refused the handshake (bad credentials, protocol mismatch)
    Rejected(String),
    /// Handshake did not complete within the deadline
    Timeout,
    /// Connection dropped during the handshake
    ConnectionLost(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InvalidAddress(msg) => write!(f, "invalid address: {}", msg),
            ConnectError::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            ConnectError::Rejected(msg) => write!(f, "connection rejected: {}", msg),
            ConnectError::Timeout => write!(f, "connect timed out"),
            ConnectError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Failure to subscribe on the source broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Broker returned a failure reason code
    Rejected(String),
    /// SUBACK not received within the deadline
    Timeout,
    /// Connection went away before the SUBACK
    ConnectionLost(String),
    /// Link has no live connection
    NotConnected,
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::Rejected(msg) => write!(f, "subscription rejected: {}", msg),
            SubscribeError::Timeout => write!(f, "subscribe timed out"),
            SubscribeError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            SubscribeError::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for SubscribeError {}

/// Failure to publish on the target broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Publish did not complete within the per-message deadline
    Timeout,
    /// Link has no live connection (or is reconnecting)
    NotConnected,
    /// Connection dropped underneath the publish
    ConnectionLost(String),
    /// Link is not a target link
    WrongRole,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Timeout => write!(f, "publish timed out"),
            PublishError::NotConnected => write!(f, "not connected"),
            PublishError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            PublishError::WrongRole => write!(f, "publish is only valid on the target link"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Error from a link (re)connect: either the connect or the resubscribe step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    Connect(ConnectError),
    Subscribe(SubscribeError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Connect(e) => write!(f, "failed to connect: {}", e),
            LinkError::Subscribe(e) => write!(f, "failed to subscribe: {}", e),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Connect(e) => Some(e),
            LinkError::Subscribe(e) => Some(e),
        }
    }
}

impl From<ConnectError> for LinkError {
    fn from(e: ConnectError) -> Self {
        LinkError::Connect(e)
    }
}

impl From<SubscribeError> for LinkError {
    fn from(e: SubscribeError) -> Self {
        LinkError::Subscribe(e)
    }
}
