//! Cryptographic helpers for the V3 polling protocol.
//!
//! - **Blake2b-256** for poll keys, verifiers and content digests
//! - **OS randomness** for poll challenges, voter nonces and secrets
//! - Verifier/secret commitment pairs (`verifier = Blake2b(secret)`)

pub mod commit;
pub mod hash;

pub use commit::{make_verifier, random_nonce, random_secret, verify_secret};
pub use hash::{blake2b_256, blake2b_256_multi, poll_key};
