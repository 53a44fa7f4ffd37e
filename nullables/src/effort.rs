//! Nullable effort service: instant proofs that verify unless told not to.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use lcap_effort::{EffortError, EffortService};
use lcap_types::{Digest, EffortProof, Nonce, PollKey, VoteEvidence};

/// The four effort operations, for scripting failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffortCall {
    GenerateProof,
    VerifyProof,
    GenerateVote,
    VerifyVote,
}

#[derive(Default)]
struct State {
    failing: HashSet<EffortCall>,
    rejecting: HashSet<EffortCall>,
    calls: HashMap<EffortCall, usize>,
}

/// An effort service whose results are scripted by the test.
#[derive(Default)]
pub struct NullEffortService {
    state: Mutex<State>,
}

impl NullEffortService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every future `call` return an error.
    pub fn fail_on(&self, call: EffortCall) {
        self.state().failing.insert(call);
    }

    /// Make every future verification `call` return `false`.
    pub fn reject_on(&self, call: EffortCall) {
        self.state().rejecting.insert(call);
    }

    /// How many times `call` has been made.
    pub fn calls(&self, call: EffortCall) -> usize {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    /// Clear scripted behavior and call counts.
    pub fn reset(&self) {
        *self.state() = State::default();
    }

    fn enter(&self, call: EffortCall) -> Result<bool, EffortError> {
        let mut state = self.state();
        *state.calls.entry(call).or_default() += 1;
        if state.failing.contains(&call) {
            return Err(EffortError::Computation(format!("{call:?} scripted to fail")));
        }
        Ok(!state.rejecting.contains(&call))
    }
}

impl EffortService for NullEffortService {
    fn generate_proof(&self, _key: &PollKey, nonce: &Nonce) -> Result<EffortProof, EffortError> {
        self.enter(EffortCall::GenerateProof)?;
        Ok(EffortProof::new(nonce.as_bytes().to_vec()))
    }

    fn verify_proof(
        &self,
        _key: &PollKey,
        _nonce: &Nonce,
        _proof: &EffortProof,
    ) -> Result<bool, EffortError> {
        self.enter(EffortCall::VerifyProof)
    }

    fn generate_vote(&self, _key: &PollKey, digest: &Digest) -> Result<VoteEvidence, EffortError> {
        self.enter(EffortCall::GenerateVote)?;
        Ok(VoteEvidence {
            digest: *digest,
            proof: EffortProof::new(digest.as_bytes().to_vec()),
        })
    }

    fn verify_vote(&self, _key: &PollKey, _evidence: &VoteEvidence) -> Result<bool, EffortError> {
        self.enter(EffortCall::VerifyVote)
    }
}
