//! Operator console output
//!
//! Everything the operator watches (the startup block, one line per health
//! tick, reconnect notices and the final summary) goes through a [`Reporter`]
//! to stdout. Diagnostics go through `tracing` instead.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{BrokerRole, TimestampFormat};
use crate::link::RelayMessage;
use crate::metrics::{MetricsTick, MetricsTotals};
use crate::protocol::ProtocolVersion;

enum Output {
    Stdout,
    Buffer(Arc<Mutex<Vec<String>>>),
}

/// Writes operator-facing lines
pub struct Reporter {
    timestamps: TimestampFormat,
    output: Output,
}

impl Reporter {
    /// Reporter printing to stdout
    pub fn stdout(timestamps: TimestampFormat) -> Self {
        Self {
            timestamps,
            output: Output::Stdout,
        }
    }

    /// Reporter collecting lines in memory instead of printing them
    pub fn buffered(timestamps: TimestampFormat) -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let reporter = Self {
            timestamps,
            output: Output::Buffer(lines.clone()),
        };
        (reporter, lines)
    }

    fn emit(&self, line: String) {
        match &self.output {
            Output::Stdout => println!("{}", line),
            Output::Buffer(lines) => lines.lock().push(line),
        }
    }

    pub fn header(&self, protocol: ProtocolVersion) {
        self.emit(format!("{} Traffic Simulator", protocol));
        self.emit(String::new());
    }

    pub fn probing(&self, role: BrokerRole, address: &str) {
        self.emit(format!("Connecting to {}: {}", role, address));
    }

    pub fn connected(&self, role: BrokerRole) {
        self.emit(format!("  ✓ Connected to {} broker", role));
    }

    pub fn subscribed(&self, filter: &str) {
        self.emit(format!("  ✓ Subscribed to: {}", filter));
    }

    pub fn bridging(&self) {
        self.emit(String::new());
        self.emit("Bridging traffic... (Ctrl+C to stop)".to_string());
        self.emit(String::new());
    }

    pub fn shutting_down(&self) {
        self.emit(String::new());
        self.emit("Shutting down...".to_string());
    }

    pub fn source_stalled(&self) {
        self.emit("! Source stall detected, reconnecting...".to_string());
    }

    pub fn target_erroring(&self, errors: u64) {
        self.emit(format!(
            "! High error rate ({} errors), reconnecting to target...",
            errors
        ));
    }

    pub fn reconnected(&self, role: BrokerRole) {
        self.emit(format!("✓ Reconnected to {} broker", role));
    }

    pub fn reconnect_failed(&self, role: BrokerRole, error: &dyn std::fmt::Display) {
        let role = match role {
            BrokerRole::Source => "Source",
            BrokerRole::Target => "Target",
        };
        self.emit(format!("! {} reconnect failed: {}", role, error));
    }

    /// Per-message line in verbose mode
    pub fn relayed(&self, message: &RelayMessage) {
        self.emit(format_relayed(message));
    }

    /// One metrics line per health tick
    pub fn tick(&self, tick: &MetricsTick, interval: Duration) {
        let timestamp = self.timestamp();
        self.emit(format_tick(&timestamp, tick, interval));
    }

    pub fn summary(&self, totals: &MetricsTotals) {
        self.emit(String::new());
        self.emit(format_summary(totals));
    }

    fn timestamp(&self) -> String {
        match self.timestamps {
            TimestampFormat::Unix => chrono::Utc::now().timestamp().to_string(),
            TimestampFormat::Datetime => chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        }
    }
}

pub fn format_relayed(message: &RelayMessage) -> String {
    format!(
        "→ [{}] QoS:{} Retain:{} Payload:{} bytes",
        message.topic,
        message.qos.as_u8(),
        message.retain,
        message.payload.len()
    )
}

/// `<ts> <dD>/<dR> (<pct>%)  |  total: <D>/<R> (<pct>%)  rate: <d>/<r> msg/s[  err: <dE>]`
pub fn format_tick(timestamp: &str, tick: &MetricsTick, interval: Duration) -> String {
    let seconds = interval.as_secs_f64();
    let rate = |count: u64| {
        if seconds > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    };

    let errors = if tick.delta.errors > 0 {
        format!("  err: {}", tick.delta.errors)
    } else {
        String::new()
    };

    format!(
        "{} {}/{} ({:.1}%)  |  total: {}/{} ({:.1}%)  rate: {:.1}/{:.1} msg/s{}",
        timestamp,
        tick.delta.delivered,
        tick.delta.received,
        tick.delta.delivered_pct(),
        tick.totals.delivered,
        tick.totals.received,
        tick.totals.delivered_pct(),
        rate(tick.delta.delivered),
        rate(tick.delta.received),
        errors
    )
}

pub fn format_summary(totals: &MetricsTotals) -> String {
    format!(
        "✓ Total: {} received, {} delivered",
        totals.received, totals.delivered
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use crate::protocol::QoS;

    fn tick(delta: (u64, u64, u64), totals: (u64, u64, u64)) -> MetricsTick {
        MetricsTick {
            delta: MetricsTotals {
                received: delta.0,
                delivered: delta.1,
                errors: delta.2,
            },
            totals: MetricsTotals {
                received: totals.0,
                delivered: totals.1,
                errors: totals.2,
            },
        }
    }

    #[test]
    fn test_format_tick() {
        let line = format_tick(
            "1700000000",
            &tick((50, 45, 0), (200, 190, 0)),
            Duration::from_secs(5),
        );
        assert_eq!(
            line,
            "1700000000 45/50 (90.0%)  |  total: 190/200 (95.0%)  rate: 9.0/10.0 msg/s"
        );
    }

    #[test]
    fn test_format_tick_with_errors() {
        let line = format_tick("ts", &tick((3, 3, 2), (3, 3, 2)), Duration::from_secs(2));
        assert_eq!(
            line,
            "ts 3/3 (100.0%)  |  total: 3/3 (100.0%)  rate: 1.5/1.5 msg/s  err: 2"
        );
    }

    #[test]
    fn test_format_tick_idle() {
        let line = format_tick("ts", &tick((0, 0, 0), (0, 0, 0)), Duration::from_secs(5));
        assert_eq!(
            line,
            "ts 0/0 (0.0%)  |  total: 0/0 (0.0%)  rate: 0.0/0.0 msg/s"
        );
    }

    #[test]
    fn test_format_relayed_and_summary() {
        let msg = RelayMessage::new("a/b", Bytes::from_static(b"hello"), QoS::AtLeastOnce, true);
        assert_eq!(
            format_relayed(&msg),
            "→ [a/b] QoS:1 Retain:true Payload:5 bytes"
        );

        let totals = MetricsTotals {
            received: 12,
            delivered: 10,
            errors: 1,
        };
        assert_eq!(format_summary(&totals), "✓ Total: 12 received, 10 delivered");
    }

    #[test]
    fn test_buffered_reporter_unix_timestamps() {
        let (reporter, lines) = Reporter::buffered(TimestampFormat::Unix);
        reporter.connected(BrokerRole::Target);
        reporter.reconnect_failed(BrokerRole::Source, &"connection refused");
        reporter.tick(&tick((1, 1, 0), (1, 1, 0)), Duration::from_secs(5));

        let lines = lines.lock().clone();
        assert_eq!(lines[0], "  ✓ Connected to target broker");
        assert_eq!(lines[1], "! Source reconnect failed: connection refused");
        let (timestamp, rest) = lines[2].split_once(' ').unwrap();
        assert!(timestamp.parse::<i64>().unwrap() > 1_600_000_000);
        assert!(rest.starts_with("1/1 (100.0%)"));
    }
}
