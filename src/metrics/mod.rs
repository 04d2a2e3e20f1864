//! Relay metrics
//!
//! [`MetricsWindow`] holds the counters the bridge itself runs on (the
//! progress line and the health monitor read it). [`Metrics`] optionally
//! mirrors them into a Prometheus registry, refreshed at scrape time from a
//! [`StatusSource`].

use prometheus::{IntGauge, IntGaugeVec, Opts, Registry};

mod server;
mod window;

pub use server::MetricsServer;
pub use window::{MetricsTick, MetricsTotals, MetricsWindow};

use crate::link::LinkState;

/// Point-in-time view of a running bridge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeStatus {
    pub totals: MetricsTotals,
    pub in_flight: usize,
    pub source: LinkState,
    pub target: LinkState,
}

impl BridgeStatus {
    /// Both links connected
    pub fn is_healthy(&self) -> bool {
        self.source == LinkState::Connected && self.target == LinkState::Connected
    }
}

/// Anything that can report a [`BridgeStatus`] on demand
pub trait StatusSource: Send + Sync {
    fn status(&self) -> BridgeStatus;
}

/// Prometheus gauges for the bridge
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Relay counters
    pub messages_received: IntGauge,
    pub messages_delivered: IntGauge,
    pub delivery_errors: IntGauge,
    pub in_flight: IntGauge,

    // Link status, 1 when connected
    pub link_connected: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_received = IntGauge::with_opts(Opts::new(
            "mqsim_messages_received_total",
            "Messages received from the source broker",
        ))?;
        let messages_delivered = IntGauge::with_opts(Opts::new(
            "mqsim_messages_delivered_total",
            "Messages dispatched for delivery to the target broker",
        ))?;
        let delivery_errors = IntGauge::with_opts(Opts::new(
            "mqsim_delivery_errors",
            "Failed target publishes since the last target reconnect",
        ))?;
        let in_flight = IntGauge::with_opts(Opts::new(
            "mqsim_in_flight",
            "Deliveries currently in progress",
        ))?;
        let link_connected = IntGaugeVec::new(
            Opts::new("mqsim_link_connected", "Broker link status by role"),
            &["link"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_delivered.clone()))?;
        registry.register(Box::new(delivery_errors.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(link_connected.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            messages_delivered,
            delivery_errors,
            in_flight,
            link_connected,
        })
    }

    /// Copy a status snapshot into the gauges
    pub fn observe(&self, status: &BridgeStatus) {
        self.messages_received.set(status.totals.received as i64);
        self.messages_delivered.set(status.totals.delivered as i64);
        self.delivery_errors.set(status.totals.errors as i64);
        self.in_flight.set(status.in_flight as i64);

        let connected = |state: LinkState| i64::from(state == LinkState::Connected);
        self.link_connected
            .with_label_values(&["source"])
            .set(connected(status.source));
        self.link_connected
            .with_label_values(&["target"])
            .set(connected(status.target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_observe_updates_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.observe(&BridgeStatus {
            totals: MetricsTotals {
                received: 10,
                delivered: 9,
                errors: 1,
            },
            in_flight: 3,
            source: LinkState::Connected,
            target: LinkState::Degraded,
        });

        assert_eq!(metrics.messages_received.get(), 10);
        assert_eq!(metrics.messages_delivered.get(), 9);
        assert_eq!(metrics.delivery_errors.get(), 1);
        assert_eq!(metrics.in_flight.get(), 3);
        assert_eq!(
            metrics.link_connected.with_label_values(&["source"]).get(),
            1
        );
        assert_eq!(
            metrics.link_connected.with_label_values(&["target"]).get(),
            0
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("mqsim_messages_received_total 10"));
        assert!(text.contains("mqsim_link_connected{link=\"target\"} 0"));
    }
}
