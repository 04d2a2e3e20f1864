//! Relay Pipeline
//!
//! Takes each message from the source link's receive callback, applies the
//! QoS/retain transform and hands it to a delivery task on the target link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::limiter::DispatchLimiter;
use crate::config::RelayConfig;
use crate::link::{BrokerLink, RelayMessage};
use crate::metrics::MetricsWindow;
use crate::protocol::QoS;
use crate::report::Reporter;

/// Per-message rewrite applied before republishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transform {
    /// Replace the source QoS; `None` preserves it
    pub qos_override: Option<QoS>,
    /// Clear the retain flag
    pub strip_retain: bool,
}

impl Transform {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            qos_override: config.qos_override(),
            strip_retain: config.strip_retain,
        }
    }

    pub fn apply(&self, mut message: RelayMessage) -> RelayMessage {
        if let Some(qos) = self.qos_override {
            message.qos = qos;
        }
        if self.strip_retain {
            message.retain = false;
        }
        message
    }
}

/// Source-to-target handoff
pub struct RelayPipeline {
    metrics: Arc<MetricsWindow>,
    limiter: Arc<DispatchLimiter>,
    target: Arc<BrokerLink>,
    reporter: Arc<Reporter>,
    shutting_down: Arc<AtomicBool>,
    transform: Transform,
    timeout: Duration,
    verbose: bool,
}

impl RelayPipeline {
    pub fn new(
        config: &RelayConfig,
        metrics: Arc<MetricsWindow>,
        limiter: Arc<DispatchLimiter>,
        target: Arc<BrokerLink>,
        reporter: Arc<Reporter>,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        Self {
            metrics,
            limiter,
            target,
            reporter,
            shutting_down,
            transform: Transform::from_config(config),
            timeout: config.timeout,
            verbose: config.verbose,
        }
    }

    /// Handle one message from the source. Never blocks; may be called
    /// concurrently. Must run inside a Tokio runtime.
    pub fn on_message(&self, message: RelayMessage) {
        self.metrics.record_received();

        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let Some(permit) = self.limiter.try_acquire() else {
            trace!("relay: all delivery slots busy, dropping {}", message.topic);
            return;
        };

        // Verbose output shows QoS and retain as received from the source
        if self.verbose {
            self.reporter.relayed(&message);
        }

        let message = self.transform.apply(message);
        self.metrics.record_delivered();

        let target = self.target.clone();
        let metrics = self.metrics.clone();
        let shutting_down = self.shutting_down.clone();
        let deadline = self.timeout;

        tokio::spawn(async move {
            let _permit = permit;

            // Lost the race with shutdown; not an error
            if shutting_down.load(Ordering::Acquire) {
                return;
            }

            let topic = message.topic.clone();
            if let Err(e) = target.publish(message, deadline).await {
                metrics.record_error();
                debug!("relay: publish to {} failed: {}", topic, e);
            }
        });
    }
}
