//! Transport layer for the V3 polling protocol.
//!
//! The polling core only ever calls [`Transport::send`]; inbound messages are
//! pushed into the poll manager by whoever owns the receiving side. The
//! [`LoopbackNetwork`] connects any number of in-process peers over tokio
//! channels, which is enough to run complete polls in a single process.

pub mod error;
pub mod loopback;
pub mod transport;

pub use error::TransportError;
pub use loopback::{LoopbackNetwork, DEFAULT_INBOX_CAPACITY};
pub use transport::Transport;
