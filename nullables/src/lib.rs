//! Nullable collaborators for deterministic testing.
//!
//! Every service the polling layer consumes has a stand-in here that:
//! - Returns deterministic values
//! - Can be told to fail or reject on demand
//! - Records what it was asked to do, for assertions
//!
//! Usage: hand these to `PollServices` in place of the real implementations.

pub mod content;
pub mod effort;
pub mod hashing;
pub mod transport;

pub use content::NullContent;
pub use effort::{EffortCall, NullEffortService};
pub use hashing::NullHashService;
pub use transport::NullTransport;
