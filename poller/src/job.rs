//! Effort and hashing work that runs off the dispatch path.
//!
//! A poll hands out a [`Job`] tagged with an operation id; the manager runs it
//! on the blocking pool and feeds the [`JobOutput`] back as an event. The id
//! lets a poll discard results that no longer match what it is waiting for.

use lcap_effort::HashError;
use lcap_types::{ArchivalUnit, Digest, EffortProof, Nonce, PeerId, PollKey, PollSpec, VoteEvidence};

use crate::services::PollEnv;
use crate::PollError;

pub(crate) type OpId = u64;

#[derive(Clone, Debug)]
pub(crate) enum Job {
    /// Check a peer's proof over our nonce.
    VerifyProof { nonce: Nonce, proof: EffortProof },
    /// Prove effort over `nonce`.
    GenerateProof { nonce: Nonce },
    /// Verify a voter's ack proof and answer it with our own.
    AnswerAck {
        voter_nonce: Nonce,
        proof: EffortProof,
    },
    /// Hash our copy and wrap the digest into vote evidence.
    GenerateVote {
        poller_nonce: Nonce,
        voter_nonce: Nonce,
    },
    /// Verify a vote and compare its digest against our copy.
    CheckVote {
        poller_nonce: Nonce,
        voter_nonce: Nonce,
        evidence: VoteEvidence,
    },
    /// Decide whether to serve `url` to `requester` and load it.
    PrepareRepair { requester: PeerId, url: String },
    /// Store repaired content received from a voter.
    ApplyRepair { url: String, content: Vec<u8> },
}

#[derive(Clone, Debug)]
pub(crate) enum JobOutput {
    Verified(bool),
    Proof(EffortProof),
    /// `None` if the voter's proof did not verify.
    AckAnswered(Option<EffortProof>),
    Evidence(VoteEvidence),
    VoteChecked {
        valid: bool,
        agrees: bool,
        digest: Digest,
    },
    Repair {
        url: String,
        content: Option<Vec<u8>>,
    },
    RepairApplied,
}

fn computation(e: impl std::fmt::Display) -> PollError {
    PollError::EffortComputation(e.to_string())
}

fn hashing(e: HashError) -> PollError {
    PollError::EffortComputation(format!("hashing: {e}"))
}

impl Job {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Job::VerifyProof { .. } => "verify_proof",
            Job::GenerateProof { .. } => "generate_proof",
            Job::AnswerAck { .. } => "answer_ack",
            Job::GenerateVote { .. } => "generate_vote",
            Job::CheckVote { .. } => "check_vote",
            Job::PrepareRepair { .. } => "prepare_repair",
            Job::ApplyRepair { .. } => "apply_repair",
        }
    }

    /// Run to completion on the calling thread. Blocking.
    pub(crate) fn run(
        self,
        env: &PollEnv,
        key: &PollKey,
        spec: &PollSpec,
        au: &ArchivalUnit,
    ) -> Result<JobOutput, PollError> {
        let effort = &env.services.effort;
        match self {
            Job::VerifyProof { nonce, proof } => effort
                .verify_proof(key, &nonce, &proof)
                .map(JobOutput::Verified)
                .map_err(computation),
            Job::GenerateProof { nonce } => effort
                .generate_proof(key, &nonce)
                .map(JobOutput::Proof)
                .map_err(computation),
            Job::AnswerAck { voter_nonce, proof } => {
                if !effort
                    .verify_proof(key, &voter_nonce, &proof)
                    .map_err(computation)?
                {
                    return Ok(JobOutput::AckAnswered(None));
                }
                let answer = effort
                    .generate_proof(key, &voter_nonce)
                    .map_err(computation)?;
                Ok(JobOutput::AckAnswered(Some(answer)))
            }
            Job::GenerateVote {
                poller_nonce,
                voter_nonce,
            } => {
                let digest = env
                    .services
                    .hasher
                    .hash_content(spec, &poller_nonce, &voter_nonce)
                    .map_err(hashing)?;
                effort
                    .generate_vote(key, &digest)
                    .map(JobOutput::Evidence)
                    .map_err(computation)
            }
            Job::CheckVote {
                poller_nonce,
                voter_nonce,
                evidence,
            } => {
                let valid = effort.verify_vote(key, &evidence).map_err(computation)?;
                if !valid {
                    return Ok(JobOutput::VoteChecked {
                        valid,
                        agrees: false,
                        digest: evidence.digest,
                    });
                }
                let ours = env
                    .services
                    .hasher
                    .hash_content(spec, &poller_nonce, &voter_nonce)
                    .map_err(hashing)?;
                Ok(JobOutput::VoteChecked {
                    valid,
                    agrees: ours == evidence.digest,
                    digest: evidence.digest,
                })
            }
            Job::PrepareRepair { requester, url } => {
                let content = if env.repair_policy.serve_repair(&requester, au, &url) {
                    match env.services.content.content(&au.id, &url) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            tracing::warn!(poll = %key, url, error = %e, "repair content unavailable");
                            None
                        }
                    }
                } else {
                    None
                };
                Ok(JobOutput::Repair { url, content })
            }
            Job::ApplyRepair { url, content } => {
                env.services
                    .content
                    .store_repair(&au.id, &url, content)
                    .map_err(|e| PollError::RepairFailed(format!("{url}: {e}")))?;
                tracing::info!(poll = %key, url, "repair stored");
                Ok(JobOutput::RepairApplied)
            }
        }
    }
}
