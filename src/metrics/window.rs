//! Relay counters with per-tick deltas
//!
//! `delivered` counts messages handed to a delivery task, not messages the
//! target acknowledged. It is a dispatch counter; a publish that later fails
//! shows up in `errors` without being taken back out of `delivered`.

use parking_lot::Mutex;

/// Counter values, used both for lifetime totals and for per-tick deltas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsTotals {
    pub received: u64,
    pub delivered: u64,
    pub errors: u64,
}

impl MetricsTotals {
    /// Delivered as a percentage of received; 0 when nothing was received
    pub fn delivered_pct(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.delivered as f64 / self.received as f64 * 100.0
        }
    }

    fn since(&self, baseline: &MetricsTotals) -> MetricsTotals {
        MetricsTotals {
            received: self.received.saturating_sub(baseline.received),
            delivered: self.delivered.saturating_sub(baseline.delivered),
            errors: self.errors.saturating_sub(baseline.errors),
        }
    }
}

/// One tick's view: lifetime totals and the change since the previous tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsTick {
    pub totals: MetricsTotals,
    pub delta: MetricsTotals,
}

#[derive(Debug, Default)]
struct Counters {
    totals: MetricsTotals,
    baseline: MetricsTotals,
}

/// Shared counters for the relay pipeline, health monitor and reporter
#[derive(Debug, Default)]
pub struct MetricsWindow {
    inner: Mutex<Counters>,
}

impl MetricsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.inner.lock().totals.received += 1;
    }

    pub fn record_delivered(&self) {
        self.inner.lock().totals.delivered += 1;
    }

    pub fn record_error(&self) {
        self.inner.lock().totals.errors += 1;
    }

    /// Lifetime totals without touching the tick baseline
    pub fn totals(&self) -> MetricsTotals {
        self.inner.lock().totals
    }

    /// Snapshot totals, compute deltas and move the baseline, in one step
    pub fn tick(&self) -> MetricsTick {
        let mut counters = self.inner.lock();
        let totals = counters.totals;
        let delta = totals.since(&counters.baseline);
        counters.baseline = totals;
        MetricsTick { totals, delta }
    }

    /// Zero the lifetime error count (and its baseline) after a target
    /// reconnect, so stale errors do not re-trigger one.
    pub fn reset_errors(&self) {
        let mut counters = self.inner.lock();
        counters.totals.errors = 0;
        counters.baseline.errors = 0;
    }
}
