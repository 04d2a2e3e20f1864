//! Scripted broker for connector tests
//!
//! A TCP listener that speaks just enough raw MQTT for one client: the test
//! reads whole packets and writes hand-built ones, in whatever order the
//! scenario needs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::BrokerConfig;
use crate::link::{MessageSink, RelayMessage};

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const SUBSCRIBE: u8 = 8;
pub const DISCONNECT: u8 = 14;

pub struct ScriptedBroker {
    listener: TcpListener,
    address: String,
}

impl ScriptedBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());
        Self { listener, address }
    }

    pub fn endpoint(&self) -> BrokerConfig {
        BrokerConfig::new(self.address.clone())
    }

    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = self.listener.accept().await.unwrap();
        stream
    }
}

/// Read one packet; returns the packet type and the bytes after the fixed header
pub async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let first = stream.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((first >> 4, body))
}

/// Read packets until one of `packet_type` arrives
pub async fn expect_packet(stream: &mut TcpStream, packet_type: u8) -> Vec<u8> {
    timeout(Duration::from_secs(2), async {
        loop {
            let (kind, body) = read_packet(stream).await.unwrap();
            if kind == packet_type {
                return body;
            }
        }
    })
    .await
    .unwrap()
}

/// Fixed header plus body
pub fn encode(first: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![first];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    packet
}

/// QoS 0 PUBLISH. `v5` adds the empty property block.
pub fn publish(topic: &str, payload: &[u8], retain: bool, v5: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + topic.len() + 3);
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if v5 {
        body.push(0);
    }
    body.extend_from_slice(payload);
    encode(0x30 | retain as u8, &body)
}

pub async fn send(stream: &mut TcpStream, packet: &[u8]) {
    stream.write_all(packet).await.unwrap();
}

/// Sink collecting every message the connection delivers
pub fn collecting_sink() -> (MessageSink, Arc<Mutex<Vec<RelayMessage>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let store = received.clone();
    let sink: MessageSink = Arc::new(move |message| store.lock().push(message));
    (sink, received)
}

/// Poll until `check` holds or two seconds pass
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
