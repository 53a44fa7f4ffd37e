//! Hashcash-style proof of effort (multi-threaded CPU).
//!
//! A proof is an 8-byte little-endian counter `c` such that the first eight
//! bytes of `Blake2b(tag || key || subject || c)`, read as a little-endian
//! `u64`, are at least the configured difficulty.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use lcap_crypto::blake2b_256_multi;
use lcap_types::{Digest, EffortProof, Nonce, PollKey, VoteEvidence};

use crate::{EffortError, EffortService};

const PROOF_TAG: &[u8] = b"lcap-v3-poll-effort";
const VOTE_TAG: &[u8] = b"lcap-v3-vote-effort";

/// Batch size per thread before checking the found flag.
const BATCH_SIZE: u64 = 4096;

/// Proof-of-work effort service.
#[derive(Clone, Debug)]
pub struct HashcashEffort {
    difficulty: u64,
    max_attempts: u64,
}

impl HashcashEffort {
    /// `difficulty` 0 accepts any counter; `u64::MAX` is infeasible.
    pub fn new(difficulty: u64) -> Self {
        Self {
            difficulty,
            max_attempts: 1 << 32,
        }
    }

    /// Bound the search; generation fails with `Exhausted` past this many counters.
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    fn search(&self, tag: &[u8], key: &PollKey, subject: &[u8; 32]) -> Result<u64, EffortError> {
        if self.difficulty == 0 {
            return Ok(0);
        }

        let found = AtomicU64::new(u64::MAX);
        let num_threads = rayon::current_num_threads().max(1) as u64;
        let limit = self.max_attempts;

        (0..num_threads).into_par_iter().for_each(|thread_id| {
            let mut counter = thread_id;
            while counter < limit {
                if found.load(Ordering::Relaxed) != u64::MAX {
                    return;
                }
                let end = counter
                    .saturating_add(BATCH_SIZE * num_threads)
                    .min(limit);
                while counter < end {
                    if work_value(tag, key, subject, counter) >= self.difficulty {
                        found.fetch_min(counter, Ordering::Relaxed);
                        return;
                    }
                    counter = counter.saturating_add(num_threads);
                }
            }
        });

        match found.load(Ordering::Relaxed) {
            u64::MAX => Err(EffortError::Exhausted {
                attempts: self.max_attempts,
            }),
            counter => Ok(counter),
        }
    }

    fn check(&self, tag: &[u8], key: &PollKey, subject: &[u8; 32], proof: &EffortProof) -> bool {
        let Ok(bytes) = <[u8; 8]>::try_from(proof.as_bytes()) else {
            return false;
        };
        work_value(tag, key, subject, u64::from_le_bytes(bytes)) >= self.difficulty
    }
}

fn work_value(tag: &[u8], key: &PollKey, subject: &[u8; 32], counter: u64) -> u64 {
    let hash = blake2b_256_multi(&[tag, key.as_bytes(), subject, &counter.to_le_bytes()]);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(head)
}

impl EffortService for HashcashEffort {
    fn generate_proof(&self, key: &PollKey, nonce: &Nonce) -> Result<EffortProof, EffortError> {
        let counter = self.search(PROOF_TAG, key, nonce.as_bytes())?;
        Ok(EffortProof::new(counter.to_le_bytes().to_vec()))
    }

    fn verify_proof(
        &self,
        key: &PollKey,
        nonce: &Nonce,
        proof: &EffortProof,
    ) -> Result<bool, EffortError> {
        Ok(self.check(PROOF_TAG, key, nonce.as_bytes(), proof))
    }

    fn generate_vote(&self, key: &PollKey, digest: &Digest) -> Result<VoteEvidence, EffortError> {
        let counter = self.search(VOTE_TAG, key, digest.as_bytes())?;
        Ok(VoteEvidence {
            digest: *digest,
            proof: EffortProof::new(counter.to_le_bytes().to_vec()),
        })
    }

    fn verify_vote(&self, key: &PollKey, evidence: &VoteEvidence) -> Result<bool, EffortError> {
        Ok(self.check(VOTE_TAG, key, evidence.digest.as_bytes(), &evidence.proof))
    }
}
