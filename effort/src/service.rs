//! Proof-of-effort seam.

use lcap_types::{Digest, EffortProof, Nonce, PollKey, VoteEvidence};

use crate::EffortError;

/// Generates and checks proofs of computational effort.
///
/// Verification answers `Ok(false)` for a proof that does not check out and
/// `Err` only when the check itself could not be carried out.
pub trait EffortService: Send + Sync {
    /// Prove effort bound to a poll and a participant nonce.
    fn generate_proof(&self, key: &PollKey, nonce: &Nonce) -> Result<EffortProof, EffortError>;

    fn verify_proof(
        &self,
        key: &PollKey,
        nonce: &Nonce,
        proof: &EffortProof,
    ) -> Result<bool, EffortError>;

    /// Wrap a content digest into vote evidence.
    fn generate_vote(&self, key: &PollKey, digest: &Digest) -> Result<VoteEvidence, EffortError>;

    fn verify_vote(&self, key: &PollKey, evidence: &VoteEvidence) -> Result<bool, EffortError>;
}

impl<T: EffortService + ?Sized> EffortService for std::sync::Arc<T> {
    fn generate_proof(&self, key: &PollKey, nonce: &Nonce) -> Result<EffortProof, EffortError> {
        (**self).generate_proof(key, nonce)
    }

    fn verify_proof(
        &self,
        key: &PollKey,
        nonce: &Nonce,
        proof: &EffortProof,
    ) -> Result<bool, EffortError> {
        (**self).verify_proof(key, nonce, proof)
    }

    fn generate_vote(&self, key: &PollKey, digest: &Digest) -> Result<VoteEvidence, EffortError> {
        (**self).generate_vote(key, digest)
    }

    fn verify_vote(&self, key: &PollKey, evidence: &VoteEvidence) -> Result<bool, EffortError> {
        (**self).verify_vote(key, evidence)
    }
}
