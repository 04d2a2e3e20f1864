//! Health Monitor
//!
//! Ticks on a fixed interval, classifies the last interval from the metrics
//! deltas and reconnects whichever link looks broken:
//!
//! - **stalled source**: nothing received for `stall_ticks` consecutive ticks
//!   after traffic has been seen at least once
//! - **erroring target**: more than `error_burst` failed publishes in one
//!   tick, or failures above `error_ratio` of what was dispatched

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{BrokerRole, HealthConfig};
use crate::link::BrokerLink;
use crate::metrics::{MetricsTick, MetricsWindow};
use crate::report::Reporter;

/// Thresholds for the health checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub stall_ticks: u32,
    pub error_burst: u64,
    pub error_ratio: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            stall_ticks: config.stall_ticks,
            error_burst: config.error_burst,
            error_ratio: config.error_ratio,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthVerdict {
    pub source_stalled: bool,
    pub target_erroring: bool,
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        !self.source_stalled && !self.target_erroring
    }
}

pub struct HealthMonitor {
    policy: HealthPolicy,
    interval: Duration,
    metrics: Arc<MetricsWindow>,
    source: Arc<BrokerLink>,
    target: Arc<BrokerLink>,
    reporter: Arc<Reporter>,
    /// Consecutive ticks with no inbound traffic
    stall_count: u32,
}

impl HealthMonitor {
    pub fn new(
        config: &HealthConfig,
        metrics: Arc<MetricsWindow>,
        source: Arc<BrokerLink>,
        target: Arc<BrokerLink>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            policy: HealthPolicy::from(config),
            interval: config.interval,
            metrics,
            source,
            target,
            reporter,
            stall_count: 0,
        }
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    /// Classify one tick. Advances the stall counter, and resets it once it
    /// reaches the threshold.
    pub fn assess(&mut self, tick: &MetricsTick) -> HealthVerdict {
        let mut verdict = HealthVerdict::default();

        if tick.delta.received == 0 && tick.totals.received > 0 {
            self.stall_count += 1;
            if self.stall_count >= self.policy.stall_ticks {
                verdict.source_stalled = true;
                self.stall_count = 0;
            }
        } else {
            self.stall_count = 0;
        }

        let errors = tick.delta.errors;
        let delivered = tick.delta.delivered;
        verdict.target_erroring = errors > self.policy.error_burst
            || (delivered > 0 && errors as f64 / delivered as f64 > self.policy.error_ratio);

        verdict
    }

    /// Run one health check: snapshot, assess, reconnect, report
    pub async fn tick(&mut self) -> HealthVerdict {
        let tick = self.metrics.tick();
        let verdict = self.assess(&tick);

        if verdict.source_stalled {
            self.reporter.source_stalled();
            warn!(
                "source stalled for {} ticks, reconnecting",
                self.policy.stall_ticks
            );
            match self.source.reconnect().await {
                Ok(()) => self.reporter.reconnected(BrokerRole::Source),
                Err(e) => {
                    warn!("source reconnect failed: {}", e);
                    self.reporter.reconnect_failed(BrokerRole::Source, &e);
                }
            }
        }

        if verdict.target_erroring {
            self.reporter.target_erroring(tick.delta.errors);
            warn!(
                "{} publish errors in the last tick, reconnecting target",
                tick.delta.errors
            );
            match self.target.reconnect().await {
                Ok(()) => {
                    self.metrics.reset_errors();
                    self.reporter.reconnected(BrokerRole::Target);
                }
                Err(e) => {
                    warn!("target reconnect failed: {}", e);
                    self.reporter.reconnect_failed(BrokerRole::Target, &e);
                }
            }
        }

        self.reporter.tick(&tick, self.interval);
        verdict
    }

    /// Tick until a shutdown signal arrives. A reconnect still in progress
    /// when the signal arrives is abandoned.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("health monitor started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.recv() => break,
            }
        }

        debug!("health monitor stopped");
    }
}
