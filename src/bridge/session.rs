//! Bridge Session
//!
//! Owns both links, the relay pipeline and the health monitor, and drives
//! them through `Initializing -> Connected -> Bridging -> ShuttingDown ->
//! Stopped`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::health::HealthMonitor;
use super::limiter::DispatchLimiter;
use super::relay::RelayPipeline;
use crate::config::{BridgeConfig, BrokerRole};
use crate::link::{BrokerLink, ConnectError, Connector, LinkError, MessageSink};
use crate::metrics::{BridgeStatus, MetricsTotals, MetricsWindow, StatusSource};
use crate::report::Reporter;

/// Lifecycle of a [`BridgeSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Connected,
    Bridging,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Bridging => write!(f, "bridging"),
            SessionState::ShuttingDown => write!(f, "shutting down"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifetime totals reported after shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub totals: MetricsTotals,
    /// Deliveries still running when the drain deadline passed
    pub abandoned: usize,
}

/// Startup failures. Each names the broker and the step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// TCP reachability probe failed
    Unreachable {
        role: BrokerRole,
        address: String,
        error: ConnectError,
    },
    /// Connect or subscribe failed
    Connect {
        role: BrokerRole,
        address: String,
        error: LinkError,
    },
    /// Operation not valid in the current state
    InvalidState(SessionState),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Unreachable {
                role,
                address,
                error,
            } => write!(f, "{} broker not reachable ({}): {}", role, address, error),
            SessionError::Connect {
                role,
                address,
                error: LinkError::Subscribe(e),
            } => write!(f, "failed to subscribe on {} broker ({}): {}", role, address, e),
            SessionError::Connect {
                role,
                address,
                error,
            } => write!(f, "failed to connect to {} broker ({}): {}", role, address, error),
            SessionError::InvalidState(state) => {
                write!(f, "session cannot start while {}", state)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// One source, one target, one relay
pub struct BridgeSession {
    config: BridgeConfig,
    metrics: Arc<MetricsWindow>,
    limiter: Arc<DispatchLimiter>,
    source: Arc<BrokerLink>,
    target: Arc<BrokerLink>,
    reporter: Arc<Reporter>,
    shutting_down: Arc<AtomicBool>,
    state: RwLock<SessionState>,
    shutdown_tx: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeSession {
    /// Session reporting to stdout
    pub fn new(config: BridgeConfig, connector: Arc<dyn Connector>) -> Self {
        let reporter = Reporter::stdout(config.report.timestamp);
        Self::with_reporter(config, connector, reporter)
    }

    pub fn with_reporter(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        reporter: Reporter,
    ) -> Self {
        let metrics = Arc::new(MetricsWindow::new());
        let limiter = Arc::new(DispatchLimiter::new(config.relay.max_in_flight));
        let reporter = Arc::new(reporter);
        let shutting_down = Arc::new(AtomicBool::new(false));

        let target = Arc::new(BrokerLink::target(
            config.target.clone(),
            connector.clone(),
        ));

        let pipeline = Arc::new(RelayPipeline::new(
            &config.relay,
            metrics.clone(),
            limiter.clone(),
            target.clone(),
            reporter.clone(),
            shutting_down.clone(),
        ));
        let sink: MessageSink = Arc::new(move |message| pipeline.on_message(message));

        let source = Arc::new(BrokerLink::source(
            config.source.clone(),
            connector,
            config.relay.topic_filter.clone(),
            sink,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            metrics,
            limiter,
            source,
            target,
            reporter,
            shutting_down,
            state: RwLock::new(SessionState::Initializing),
            shutdown_tx,
            monitor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsWindow> {
        &self.metrics
    }

    pub fn source(&self) -> &Arc<BrokerLink> {
        &self.source
    }

    pub fn target(&self) -> &Arc<BrokerLink> {
        &self.target
    }

    /// Probe both brokers, connect the target, then connect and subscribe
    /// the source. On failure nothing is left connected.
    pub async fn start(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Initializing {
            return Err(SessionError::InvalidState(state));
        }

        self.reporter.header(self.config.protocol);

        for link in [&self.source, &self.target] {
            self.reporter.probing(link.role(), &link.endpoint().address);
            link.probe()
                .await
                .map_err(|error| SessionError::Unreachable {
                    role: link.role(),
                    address: link.endpoint().address.clone(),
                    error,
                })?;
        }

        self.target
            .connect()
            .await
            .map_err(|error| self.connect_error(&self.target, error))?;
        self.reporter.connected(BrokerRole::Target);

        if let Err(error) = self.source.connect().await {
            self.target.close().await;
            return Err(self.connect_error(&self.source, error));
        }
        self.reporter.connected(BrokerRole::Source);
        self.reporter.subscribed(&self.config.relay.topic_filter);

        *self.state.write() = SessionState::Connected;
        info!(
            "bridging {} -> {} (filter {})",
            self.config.source.address, self.config.target.address, self.config.relay.topic_filter
        );
        Ok(())
    }

    fn connect_error(&self, link: &BrokerLink, error: LinkError) -> SessionError {
        SessionError::Connect {
            role: link.role(),
            address: link.endpoint().address.clone(),
            error,
        }
    }

    /// Health monitor wired to this session's links and counters
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            &self.config.health,
            self.metrics.clone(),
            self.source.clone(),
            self.target.clone(),
            self.reporter.clone(),
        )
    }

    /// Start the health monitor. Requires a successful [`start`](Self::start).
    pub fn bridge(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(SessionError::InvalidState(state));
        }

        let monitor = self.health_monitor();
        let shutdown_rx = self.shutdown_tx.subscribe();
        *self.monitor.lock() = Some(tokio::spawn(monitor.run(shutdown_rx)));

        *self.state.write() = SessionState::Bridging;
        self.reporter.bridging();
        Ok(())
    }

    /// Start, bridge until `signal` resolves, then shut down
    pub async fn run_until<F>(&self, signal: F) -> Result<SessionSummary, SessionError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        self.bridge()?;
        signal.await;
        Ok(self.shutdown().await)
    }

    /// Stop accepting messages, stop the monitor, close the source, drain
    /// in-flight deliveries (bounded by the per-message timeout) and close
    /// the target.
    pub async fn shutdown(&self) -> SessionSummary {
        *self.state.write() = SessionState::ShuttingDown;
        self.reporter.shutting_down();

        self.shutting_down.store(true, Ordering::Release);
        self.limiter.close();

        let _ = self.shutdown_tx.send(());
        let monitor = self.monitor.lock().take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                warn!("health monitor ended abnormally: {}", e);
            }
        }

        self.source.close().await;

        let abandoned = if self.limiter.drain(self.config.relay.timeout).await {
            0
        } else {
            let left = self.limiter.in_flight();
            debug!("shutdown: {} deliveries still in flight", left);
            left
        };

        self.target.close().await;

        let totals = self.metrics.totals();
        self.reporter.summary(&totals);
        *self.state.write() = SessionState::Stopped;
        info!(
            "session stopped: {} received, {} delivered, {} errors",
            totals.received, totals.delivered, totals.errors
        );

        SessionSummary { totals, abandoned }
    }
}

impl StatusSource for BridgeSession {
    fn status(&self) -> BridgeStatus {
        BridgeStatus {
            totals: self.metrics.totals(),
            in_flight: self.limiter.in_flight(),
            source: self.source.state(),
            target: self.target.state(),
        }
    }
}
