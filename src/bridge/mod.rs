//! Bridge Core
//!
//! Relays every message matching a topic filter on a source broker to a
//! target broker.
//!
//! ```text
//! source link --on_message--> RelayPipeline --try_acquire--> DispatchLimiter
//!                                  |                               |
//!                              transform                    delivery task
//!                                  |                               |
//!                            MetricsWindow <---- errors ---- target link
//!                                  ^
//!                            HealthMonitor --reconnect--> source / target
//! ```
//!
//! Delivery is best-effort: messages arriving while every delivery slot is
//! busy are dropped, failed publishes are counted and never retried.
//!
//! # Example Configuration
//!
//! ```toml
//! protocol = "v5"
//!
//! [source]
//! address = "tcp://test.mosquitto.org:1883"
//!
//! [target]
//! address = "tcp://localhost:1883"
//! username = "${MQSIM_TARGET_USER:-}"
//!
//! [relay]
//! topic_filter = "sensors/#"
//! qos_override = 1
//! strip_retain = true
//! max_in_flight = 500
//! timeout = "250ms"
//! ```

mod health;
mod limiter;
mod relay;
mod session;


pub use health::{HealthMonitor, HealthPolicy, HealthVerdict};
pub use limiter::DispatchLimiter;
pub use relay::{RelayPipeline, Transform};
pub use session::{BridgeSession, SessionError, SessionState, SessionSummary};
