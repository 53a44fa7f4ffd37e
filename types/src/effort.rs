//! Opaque proof-of-effort artifacts exchanged between poll participants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Digest;

/// A computational proof produced by an effort service.
///
/// The polling layer never inspects the bytes; only the effort service that
/// produced them can verify them.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffortProof(Vec<u8>);

impl EffortProof {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EffortProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffortProof({} bytes)", self.0.len())
    }
}

/// A voter's content digest wrapped with proof that the voter did the work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvidence {
    pub digest: Digest,
    pub proof: EffortProof,
}
