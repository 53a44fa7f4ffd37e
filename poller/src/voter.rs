//! Voter role: answer one poller's invitation with an ack, a vote, any
//! requested repairs, and finally accept its evaluation receipt.

use lcap_crypto::{random_nonce, verify_secret};
use lcap_messages::{LcapMessage, MessageBody};
use lcap_types::{AuId, Nonce, PeerId, Verifier};
use rand::seq::SliceRandom;

use crate::job::{Job, JobOutput, OpId};
use crate::poll::{PollCommon, PollEvent, PollState};
use crate::services::PollEnv;
use crate::state::{VoterEvent, VoterState};
use crate::PollError;

pub(crate) struct VoterMachine {
    state: VoterState,
    poller: PeerId,
    poller_nonce: Nonce,
    verifier: Verifier,
    voter_nonce: Nonce,
    pending: Option<OpId>,
}

impl VoterMachine {
    pub(crate) fn new(poller: PeerId, poller_nonce: Nonce, verifier: Verifier) -> Self {
        Self {
            state: VoterState::Initializing,
            poller,
            poller_nonce,
            verifier,
            voter_nonce: Nonce::ZERO,
            pending: None,
        }
    }

    pub(crate) fn state(&self) -> VoterState {
        self.state
    }

    pub(crate) fn handle(&mut self, common: &mut PollCommon, env: &PollEnv, event: PollEvent) {
        match event {
            PollEvent::Message(message) => self.on_message(common, env, message),
            PollEvent::JobDone { op, result } => self.on_job(common, env, op, result),
            PollEvent::Deadline => {
                tracing::info!(poll = %common.key, state = %self.state, "voter deadline expired");
                common.finish();
            }
            PollEvent::Solicit(_) | PollEvent::VoteDeadline => {
                tracing::debug!(poll = %common.key, "poller-only event ignored by voter");
            }
            PollEvent::Abort => common.finish(),
        }
    }

    pub(crate) fn finalize(&mut self, common: &mut PollCommon) {
        self.state = VoterState::Finalizing;
        self.pending = None;
        common.record(PollState::Voter(self.state));
    }

    /// Take one edge of the transition table, or fail the poll.
    fn advance(&mut self, common: &mut PollCommon, event: VoterEvent) -> bool {
        match self.state.next(event) {
            Some(next) => {
                tracing::debug!(poll = %common.key, from = %self.state, to = %next, "voter transition");
                self.state = next;
                common.record(PollState::Voter(next));
                true
            }
            None => {
                common.fail(PollError::order(self.state, event));
                false
            }
        }
    }

    fn on_message(&mut self, common: &mut PollCommon, env: &PollEnv, message: LcapMessage) {
        if message.sender() != &self.poller {
            tracing::debug!(
                poll = %common.key,
                sender = %message.sender(),
                opcode = %message.opcode(),
                "ignoring message from a peer other than the poller"
            );
            return;
        }
        let event = match &message.body {
            MessageBody::Poll { .. } => VoterEvent::PollReceived,
            MessageBody::PollProof { .. } => VoterEvent::PollProofReceived,
            MessageBody::RepairReq { .. } => VoterEvent::RepairReqReceived,
            MessageBody::EvaluationReceipt { .. } => VoterEvent::ReceiptReceived,
            other => {
                common.fail(PollError::order(self.state, other.opcode()));
                return;
            }
        };
        if !self.advance(common, event) {
            return;
        }

        match message.body {
            MessageBody::Poll {
                poller_nonce,
                effort_proof,
                ..
            } => {
                if poller_nonce != self.poller_nonce {
                    common.fail(PollError::EffortVerification(
                        "invitation nonce does not match the poll challenge".into(),
                    ));
                    return;
                }
                self.pending = Some(common.run(Job::VerifyProof {
                    nonce: poller_nonce,
                    proof: effort_proof,
                }));
            }
            MessageBody::PollProof { effort_proof } => {
                self.pending = Some(common.run(Job::VerifyProof {
                    nonce: self.voter_nonce,
                    proof: effort_proof,
                }));
            }
            MessageBody::RepairReq { url } => {
                self.pending = Some(common.run(Job::PrepareRepair {
                    requester: self.poller.clone(),
                    url,
                }));
            }
            MessageBody::EvaluationReceipt {
                secret,
                agreement_hint,
            } => {
                if !verify_secret(&secret, &self.verifier) {
                    common.fail(PollError::EffortVerification(
                        "receipt secret does not open the poll verifier".into(),
                    ));
                    return;
                }
                let agreement = if agreement_hint.is_nan() {
                    0.0
                } else {
                    agreement_hint.clamp(0.0, 1.0)
                };
                if let Err(e) = env.services.identity.record_agreement_hint(
                    &self.poller,
                    &common.au.id,
                    agreement,
                ) {
                    tracing::warn!(poll = %common.key, error = %e, "failed to record agreement hint");
                }
                tracing::info!(poll = %common.key, poller = %self.poller, agreement, "evaluation receipt processed");
                if self.advance(common, VoterEvent::ReceiptProcessed) {
                    common.finish();
                }
            }
            _ => {}
        }
    }

    /// Peers to suggest for the outer circle: ones that agreed with us on
    /// this AU before, other than the poller and ourselves.
    fn nominees(&self, env: &PollEnv, au: &AuId) -> Vec<PeerId> {
        let config = env.config();
        let candidates: Vec<PeerId> = env
            .services
            .identity
            .agreeing_peers(au)
            .into_iter()
            .filter(|p| p != &self.poller && p != env.local_peer())
            .collect();
        if candidates.len() < config.min_nomination_size {
            return Vec::new();
        }
        candidates
            .choose_multiple(&mut rand::thread_rng(), config.max_nomination_size)
            .cloned()
            .collect()
    }

    fn on_job(
        &mut self,
        common: &mut PollCommon,
        env: &PollEnv,
        op: OpId,
        result: Result<JobOutput, PollError>,
    ) {
        if self.pending != Some(op) {
            tracing::debug!(poll = %common.key, op, "discarding stale job result");
            return;
        }
        self.pending = None;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                common.fail(e);
                return;
            }
        };

        match (self.state, output) {
            (VoterState::VerifyingPollEffort, JobOutput::Verified(true)) => {
                if self.advance(common, VoterEvent::PollEffortVerified) {
                    self.voter_nonce = random_nonce();
                    self.pending = Some(common.run(Job::GenerateProof {
                        nonce: self.voter_nonce,
                    }));
                }
            }
            (VoterState::VerifyingPollEffort, JobOutput::Verified(false)) => {
                common.fail(PollError::EffortVerification(
                    "poller's invitation proof rejected".into(),
                ));
            }
            (VoterState::ProvingPollAck, JobOutput::Proof(effort_proof)) => {
                if self.advance(common, VoterEvent::PollAckProved) {
                    common.send(
                        self.poller.clone(),
                        MessageBody::PollAck {
                            voter_nonce: self.voter_nonce,
                            effort_proof,
                            nak: None,
                        },
                    );
                }
            }
            (VoterState::VerifyingPollProof, JobOutput::Verified(true)) => {
                if self.advance(common, VoterEvent::PollProofVerified) {
                    self.pending = Some(common.run(Job::GenerateVote {
                        poller_nonce: self.poller_nonce,
                        voter_nonce: self.voter_nonce,
                    }));
                }
            }
            (VoterState::VerifyingPollProof, JobOutput::Verified(false)) => {
                common.fail(PollError::EffortVerification("poller's proof rejected".into()));
            }
            (VoterState::GeneratingVote, JobOutput::Evidence(evidence)) => {
                if self.advance(common, VoterEvent::VoteGenerated) {
                    let nominees = self.nominees(env, &common.au.id);
                    tracing::debug!(poll = %common.key, nominees = nominees.len(), "casting vote");
                    common.send(
                        self.poller.clone(),
                        MessageBody::Vote {
                            voter_nonce: self.voter_nonce,
                            evidence,
                            nominees,
                        },
                    );
                }
            }
            (VoterState::SendingRepair, JobOutput::Repair { url, content }) => {
                if content.is_none() {
                    tracing::info!(poll = %common.key, url, "declining repair request");
                }
                if self.advance(common, VoterEvent::RepairSent) {
                    common.send(self.poller.clone(), MessageBody::RepairRep { url, content });
                }
            }
            (state, output) => {
                common.fail(PollError::order(state, format!("{output:?}")));
            }
        }
    }
}
