//! Collaborator seams the polling layer computes through.
//!
//! - [`EffortService`]: proofs of effort for invitations, acks and votes.
//! - [`HashService`]: content digests over a poll's URL range, plus an
//!   estimate of how long hashing will take.
//! - [`ContentSource`]: archival unit lookup and raw content for repairs.
//!
//! Every call may be slow and may fail; the polling layer runs them on the
//! blocking pool. [`HashcashEffort`], [`ContentHasher`] and [`MemoryContent`]
//! are reference implementations sufficient for in-process polls.

pub mod content;
pub mod error;
pub mod hashcash;
pub mod hashing;
pub mod service;

pub use content::{ContentSource, MemoryContent};
pub use error::{ContentError, EffortError, HashError};
pub use hashcash::HashcashEffort;
pub use hashing::{ContentHasher, HashService, HASH_ALGORITHM};
pub use service::EffortService;
