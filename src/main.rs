//! mqsim - live MQTT message bridge / traffic simulator
//!
//! Usage:
//!   mqsim [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>         Configuration file path
//!   -v, --mqtt-version <3|5>    MQTT protocol version (default: 5)
//!       --source <URI>          Source broker (default: tcp://test.mosquitto.org:1883)
//!   -t, --topic <FILTER>        Topic filter to bridge (default: #)
//!   -b, --broker <URI>          Target broker (default: tcp://localhost:1883)
//!   -q, --qos <-1|0|1|2>        QoS override, -1 preserves the source QoS
//!       --no-retain             Clear the retain flag on republished messages
//!       --queue-size <N>        Maximum concurrent deliveries (default: 1000)
//!       --timeout <DURATION>    Per-message publish timeout (default: 100ms)
//!   -l, --log-level             Log level (error, warn, info, debug, trace)
//!   -h, --help                  Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqsim::bridge::BridgeSession;
use mqsim::config::{BridgeConfig, ConfigError, TimestampFormat};
use mqsim::metrics::{Metrics, MetricsServer};
use mqsim::mqtt;
use mqsim::protocol::ProtocolVersion;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// mqsim - bridge live traffic from one MQTT broker into another
#[derive(Parser, Debug)]
#[command(name = "mqsim")]
#[command(version)]
#[command(about = "Bridge live MQTT traffic from a source broker into a target broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT protocol version (3 or 5)
    #[arg(short = 'v', long = "mqtt-version")]
    mqtt_version: Option<ProtocolVersion>,

    /// Source broker URI
    #[arg(long)]
    source: Option<String>,

    /// Source broker username
    #[arg(long)]
    source_username: Option<String>,

    /// Source broker password
    #[arg(long)]
    source_password: Option<String>,

    /// Topic filter to subscribe on the source
    #[arg(short, long)]
    topic: Option<String>,

    /// Target broker URI
    #[arg(short, long)]
    broker: Option<String>,

    /// Target broker username
    #[arg(short, long)]
    username: Option<String>,

    /// Target broker password
    #[arg(short, long)]
    password: Option<String>,

    /// Print every relayed message
    #[arg(long)]
    verbose: bool,

    /// QoS for republished messages (-1 preserves the source QoS)
    #[arg(short, long, allow_negative_numbers = true)]
    qos: Option<i8>,

    /// Clear the retain flag on republished messages
    #[arg(long)]
    no_retain: bool,

    /// Maximum concurrent deliveries; messages beyond this are dropped
    #[arg(long)]
    queue_size: Option<usize>,

    /// Per-message publish timeout (e.g. 100ms, 1s)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Health check and report interval (e.g. 5s)
    #[arg(long, value_parser = humantime::parse_duration)]
    health_interval: Option<Duration>,

    /// Print unix timestamps instead of date/time
    #[arg(long)]
    unix_ts: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// Apply CLI flags on top of file/env configuration
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(version) = self.mqtt_version {
            config.protocol = version;
        }
        if let Some(source) = &self.source {
            config.source.address = source.clone();
        }
        if self.source_username.is_some() || self.source_password.is_some() {
            config.source = config.source.clone().with_credentials(
                self.source_username.clone().or(config.source.username.clone()),
                self.source_password.clone().or(config.source.password.clone()),
            );
        }
        if let Some(broker) = &self.broker {
            config.target.address = broker.clone();
        }
        if self.username.is_some() || self.password.is_some() {
            config.target = config.target.clone().with_credentials(
                self.username.clone().or(config.target.username.clone()),
                self.password.clone().or(config.target.password.clone()),
            );
        }
        if let Some(topic) = &self.topic {
            config.relay.topic_filter = topic.clone();
        }
        if let Some(qos) = self.qos {
            config.relay.qos_override = qos;
        }
        if self.no_retain {
            config.relay.strip_retain = true;
        }
        if self.verbose {
            config.relay.verbose = true;
        }
        if let Some(queue_size) = self.queue_size {
            config.relay.max_in_flight = queue_size;
        }
        if let Some(timeout) = self.timeout {
            config.relay.timeout = timeout;
        }
        if let Some(interval) = self.health_interval {
            config.health.interval = interval;
        }
        if self.unix_ts {
            config.report.timestamp = TimestampFormat::Unix;
        }
        if let Some(bind) = self.metrics_bind {
            config.metrics.enabled = true;
            config.metrics.bind = bind;
        }
    }

    fn load_config(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::from_env()?,
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (info).
    // Diagnostics go to stderr; stdout carries the traffic report.
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }
    info!("Starting mqsim ({})", config.protocol);
    info!("  Source: {}", config.source.address);
    info!("  Target: {}", config.target.address);
    info!("  Topic filter: {}", config.relay.topic_filter);
    info!(
        "  Max in flight: {}, timeout: {:?}",
        config.relay.max_in_flight, config.relay.timeout
    );

    let connector = mqtt::connector_for(config.protocol, config.relay.max_in_flight);
    let session = Arc::new(BridgeSession::new(config.clone(), connector));

    if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        info!("  Metrics: enabled (http://{})", config.metrics.bind);

        let metrics_server = MetricsServer::new(metrics, session.clone(), config.metrics.bind);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                error!("Metrics server error: {}", e);
            }
        });
    } else {
        info!("  Metrics: disabled");
    }

    match session.run_until(shutdown_signal()).await {
        Ok(summary) => {
            if summary.abandoned > 0 {
                info!(
                    "{} deliveries abandoned at shutdown",
                    summary.abandoned
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
