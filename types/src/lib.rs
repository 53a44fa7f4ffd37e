//! Fundamental types for the V3 polling protocol.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: peer identities, archival units, poll specifications, poll keys,
//! nonces and commitments, effort proofs, and timestamps.

pub mod au;
pub mod bytes;
pub mod effort;
pub mod error;
pub mod peer;
pub mod spec;
pub mod time;

pub use au::{AccessType, ArchivalUnit, AuId};
pub use bytes::{Digest, Nonce, PollKey, Secret, Verifier};
pub use effort::{EffortProof, VoteEvidence};
pub use error::TypesError;
pub use peer::PeerId;
pub use spec::{PollSpec, PollType, V3_PROTOCOL};
pub use time::Timestamp;
