//! Peer identity and reputation store.
//!
//! The polling core reads and writes reputation only through the
//! [`IdentityManager`] trait. Reputation is per (peer, AU) and expressed as
//! the fraction of content the peer agreed with us on, in `[0.0, 1.0]`.
//! [`MemoryIdentityManager`] keeps everything in process memory.

pub mod error;
pub mod manager;
pub mod memory;

pub use error::IdentityError;
pub use manager::IdentityManager;
pub use memory::{AgreementRecord, MemoryIdentityManager};
