//! A polling node for the V3 protocol.
//!
//! Wires an in-memory identity manager, hashcash effort, an in-memory content
//! store and a transport into a [`lcap_poller::PollManager`], and provides the
//! node-level concerns around it: TOML configuration, structured logging,
//! Prometheus metrics and graceful shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::PollerMetrics;
pub use node::LcapNode;
pub use shutdown::ShutdownController;
