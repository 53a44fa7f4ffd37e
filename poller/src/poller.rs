//! Poller role: invite voters, check their votes against our own copy,
//! tally, request a repair if we lost, and send every voter its receipt.
//!
//! Each invited peer advances through [`PollerState`] on its own. A peer
//! that misbehaves or declines is dropped without affecting the others;
//! a failure computing over our own content fails the whole poll.
//!
//! Peers named in the call form the inner circle. Their votes nominate
//! further peers, and once a quorum of them has nominated, a share of each
//! nomination list is invited as the outer circle. At the vote deadline
//! every peer that has not voted is dropped and the poll is evaluated on
//! the votes it has.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use lcap_messages::{LcapMessage, MessageBody, PollNak};
use lcap_types::{EffortProof, Nonce, PeerId, Secret, Verifier};
use rand::seq::SliceRandom;

use crate::job::{Job, JobOutput, OpId};
use crate::poll::{PollCommon, PollEvent};
use crate::services::PollEnv;
use crate::state::{PollerEvent, PollerState};
use crate::{PollError, TallyResult, Vote};

/// Why a participant stopped taking part.
#[derive(Clone, Debug, PartialEq)]
pub enum DropReason {
    /// The peer answered the invitation with a NAK.
    Declined(PollNak),
    /// The peer sent something invalid or out of order.
    Failed(PollError),
    /// The vote deadline passed before the peer voted.
    NoVote,
    /// The peer's vote nominated nobody and empty nominations are refused.
    NoNominations,
}

/// Progress of one invited peer.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantStatus {
    pub peer: PeerId,
    pub state: PollerState,
    /// Invited on another voter's nomination.
    pub outer_circle: bool,
    /// Whether its vote matched our copy, once checked.
    pub agrees: Option<bool>,
    pub dropped: Option<DropReason>,
}

#[derive(Debug)]
struct Participant {
    state: PollerState,
    outer_circle: bool,
    voter_nonce: Nonce,
    agrees: Option<bool>,
    /// Peers nominated with the vote, until drawn into the outer circle.
    nominees: Option<Vec<PeerId>>,
    nominations_drawn: bool,
    dropped: Option<DropReason>,
}

impl Participant {
    fn new(outer_circle: bool) -> Self {
        Self {
            state: PollerState::Initializing,
            outer_circle,
            voter_nonce: Nonce::ZERO,
            agrees: None,
            nominees: None,
            nominations_drawn: false,
            dropped: None,
        }
    }

    fn is_live(&self) -> bool {
        self.dropped.is_none()
    }

    fn has_voted(&self) -> bool {
        self.state >= PollerState::SendingRepairReq
    }
}

pub(crate) struct PollerMachine {
    poller_nonce: Nonce,
    verifier: Verifier,
    secret: Secret,
    duration: Duration,
    hash_algorithm: String,
    poll_proof: Option<EffortProof>,
    proof_op: Option<OpId>,
    participants: BTreeMap<PeerId, Participant>,
    jobs: HashMap<OpId, PeerId>,
    result: Option<TallyResult>,
    repairer: Option<PeerId>,
    votes_closed: bool,
    deadline_hit: bool,
}

impl PollerMachine {
    pub(crate) fn new(
        poller_nonce: Nonce,
        verifier: Verifier,
        secret: Secret,
        duration: Duration,
        hash_algorithm: String,
    ) -> Self {
        Self {
            poller_nonce,
            verifier,
            secret,
            duration,
            hash_algorithm,
            poll_proof: None,
            proof_op: None,
            participants: BTreeMap::new(),
            jobs: HashMap::new(),
            result: None,
            repairer: None,
            votes_closed: false,
            deadline_hit: false,
        }
    }

    /// The least-advanced state over live participants.
    pub(crate) fn state(&self, closed: bool) -> PollerState {
        if closed {
            return PollerState::Finalizing;
        }
        self.participants
            .values()
            .filter(|p| p.is_live())
            .map(|p| p.state)
            .min()
            .unwrap_or(PollerState::Initializing)
    }

    pub(crate) fn participants(&self) -> Vec<ParticipantStatus> {
        self.participants
            .iter()
            .map(|(peer, p)| ParticipantStatus {
                peer: peer.clone(),
                state: p.state,
                outer_circle: p.outer_circle,
                agrees: p.agrees,
                dropped: p.dropped.clone(),
            })
            .collect()
    }

    pub(crate) fn handle(&mut self, common: &mut PollCommon, env: &PollEnv, event: PollEvent) {
        match event {
            PollEvent::Solicit(peers) => self.solicit(common, env, peers),
            PollEvent::Message(message) => self.on_message(common, env, message),
            PollEvent::VoteDeadline => self.close_voting(common),
            PollEvent::JobDone { op, result } => self.on_job(common, env, op, result),
            PollEvent::Deadline => {
                tracing::info!(
                    poll = %common.key,
                    votes = common.tally.vote_count(),
                    "poller deadline expired"
                );
                self.deadline_hit = true;
                common.finish();
            }
            PollEvent::Abort => common.finish(),
        }
        if !common.closed {
            self.check_progress(common);
        }
    }

    /// Record every counted voter's agreement once the poll has a verdict.
    pub(crate) fn finalize(&mut self, common: &mut PollCommon, env: &PollEnv) {
        if common.error.is_some() || !(self.result.is_some() || self.deadline_hit) {
            return;
        }
        let identity = &env.services.identity;
        for tallied in common.tally.votes() {
            let vote = &tallied.vote;
            let recorded = if vote.agree {
                identity.signal_agreed(&vote.voter, &common.au.id)
            } else {
                identity.signal_disagreed(&vote.voter, &common.au.id)
            };
            if let Err(e) = recorded {
                tracing::warn!(poll = %common.key, voter = %vote.voter, error = %e, "failed to record agreement");
            }
        }
    }

    fn solicit(&mut self, common: &mut PollCommon, env: &PollEnv, peers: Vec<PeerId>) {
        if self.result.is_some() || self.votes_closed {
            tracing::warn!(poll = %common.key, "voting closed, not soliciting");
            return;
        }
        for peer in peers {
            self.add_participant(common, env, peer, false);
        }
        if self.poll_proof.is_none() && self.proof_op.is_none() && !self.participants.is_empty() {
            self.proof_op = Some(common.run(Job::GenerateProof {
                nonce: self.poller_nonce,
            }));
        }
    }

    fn add_participant(&mut self, common: &mut PollCommon, env: &PollEnv, peer: PeerId, outer: bool) {
        if &peer == env.local_peer() || self.participants.contains_key(&peer) {
            return;
        }
        self.participants.insert(peer.clone(), Participant::new(outer));
        if self.poll_proof.is_some() {
            self.invite(common, &peer);
        }
    }

    fn invite(&mut self, common: &mut PollCommon, peer: &PeerId) {
        let Some(proof) = self.poll_proof.clone() else {
            return;
        };
        if !self.advance(common, peer, PollerEvent::PollProofReady) {
            return;
        }
        common.send(
            peer.clone(),
            MessageBody::Poll {
                spec: common.spec.clone(),
                duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
                poller_nonce: self.poller_nonce,
                verifier: self.verifier,
                effort_proof: proof,
                hash_algorithm: self.hash_algorithm.clone(),
            },
        );
        self.advance(common, peer, PollerEvent::PollSent);
    }

    /// Move one participant along the table, dropping it on a bad edge.
    fn advance(&mut self, common: &PollCommon, peer: &PeerId, event: PollerEvent) -> bool {
        let Some(participant) = self.participants.get_mut(peer) else {
            return false;
        };
        match participant.state.next(event) {
            Some(next) => {
                tracing::debug!(poll = %common.key, peer = %peer, from = %participant.state, to = %next, "participant transition");
                participant.state = next;
                true
            }
            None => {
                let error = PollError::order(participant.state, event);
                self.drop_participant(common, peer, DropReason::Failed(error));
                false
            }
        }
    }

    fn drop_participant(&mut self, common: &PollCommon, peer: &PeerId, reason: DropReason) {
        if let Some(participant) = self.participants.get_mut(peer) {
            tracing::info!(poll = %common.key, peer = %peer, reason = ?reason, "participant dropped");
            participant.dropped = Some(reason);
        }
        self.jobs.retain(|_, p| p != peer);
        if self.repairer.as_ref() == Some(peer) {
            self.repairer = None;
        }
    }

    fn on_message(&mut self, common: &mut PollCommon, env: &PollEnv, message: LcapMessage) {
        let peer = message.sender().clone();
        let live = self.participants.get(&peer).map(Participant::is_live);
        if live != Some(true) {
            tracing::debug!(
                poll = %common.key,
                sender = %peer,
                opcode = %message.opcode(),
                "ignoring message from a peer not taking part"
            );
            return;
        }

        match message.body {
            MessageBody::PollAck {
                nak: Some(reason), ..
            } => {
                self.drop_participant(common, &peer, DropReason::Declined(reason));
            }
            MessageBody::PollAck {
                voter_nonce,
                effort_proof,
                nak: None,
            } => {
                if !self.advance(common, &peer, PollerEvent::PollAckReceived) {
                    return;
                }
                if let Some(participant) = self.participants.get_mut(&peer) {
                    participant.voter_nonce = voter_nonce;
                }
                let op = common.run(Job::AnswerAck {
                    voter_nonce,
                    proof: effort_proof,
                });
                self.jobs.insert(op, peer);
            }
            MessageBody::Vote {
                voter_nonce,
                evidence,
                nominees,
            } => {
                if !self.advance(common, &peer, PollerEvent::VoteReceived) {
                    return;
                }
                if !self.record_nominations(common, env, &peer, nominees) {
                    return;
                }
                let expected = self
                    .participants
                    .get(&peer)
                    .map(|p| p.voter_nonce)
                    .unwrap_or(Nonce::ZERO);
                if voter_nonce != expected {
                    let error = PollError::EffortVerification("vote nonce does not match ack".into());
                    self.drop_participant(common, &peer, DropReason::Failed(error));
                    return;
                }
                let op = common.run(Job::CheckVote {
                    poller_nonce: self.poller_nonce,
                    voter_nonce,
                    evidence,
                });
                self.jobs.insert(op, peer);
            }
            MessageBody::RepairRep { url, content } => {
                let awaiting = self.repairer.as_ref() == Some(&peer)
                    && !self.jobs.values().any(|p| p == &peer);
                if !awaiting {
                    let state = self.participants.get(&peer).map(|p| p.state);
                    let error = PollError::ProtocolOrder {
                        state: format!("{state:?}"),
                        event: "RepairRep".into(),
                    };
                    self.drop_participant(common, &peer, DropReason::Failed(error));
                    return;
                }
                match content {
                    Some(content) => {
                        tracing::info!(poll = %common.key, peer = %peer, url, bytes = content.len(), "repair received");
                        let op = common.run(Job::ApplyRepair { url, content });
                        self.jobs.insert(op, peer);
                    }
                    None => {
                        tracing::info!(poll = %common.key, peer = %peer, url, "repair declined by voter");
                        self.repairer = None;
                        self.complete_repair(common, &peer);
                    }
                }
            }
            other => {
                let state = self.participants.get(&peer).map(|p| p.state);
                let error = PollError::ProtocolOrder {
                    state: format!("{state:?}"),
                    event: other.opcode().to_string(),
                };
                self.drop_participant(common, &peer, DropReason::Failed(error));
            }
        }
    }

    fn on_job(
        &mut self,
        common: &mut PollCommon,
        env: &PollEnv,
        op: OpId,
        result: Result<JobOutput, PollError>,
    ) {
        if self.proof_op == Some(op) {
            self.proof_op = None;
            match result {
                Ok(JobOutput::Proof(proof)) => {
                    self.poll_proof = Some(proof);
                    let waiting: Vec<PeerId> = self
                        .participants
                        .iter()
                        .filter(|(_, p)| p.is_live() && p.state == PollerState::Initializing)
                        .map(|(peer, _)| peer.clone())
                        .collect();
                    for peer in waiting {
                        self.invite(common, &peer);
                    }
                }
                Ok(other) => common.fail(PollError::order("Initializing", format!("{other:?}"))),
                Err(e) => common.fail(e),
            }
            return;
        }

        let Some(peer) = self.jobs.remove(&op) else {
            tracing::debug!(poll = %common.key, op, "discarding stale job result");
            return;
        };
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                common.fail(e);
                return;
            }
        };

        match output {
            JobOutput::AckAnswered(Some(effort_proof)) => {
                common.send(peer.clone(), MessageBody::PollProof { effort_proof });
                self.advance(common, &peer, PollerEvent::PollProofSent);
            }
            JobOutput::AckAnswered(None) => {
                let error = PollError::EffortVerification("ack proof rejected".into());
                self.drop_participant(common, &peer, DropReason::Failed(error));
            }
            JobOutput::VoteChecked { valid: false, .. } => {
                let error = PollError::EffortVerification("vote evidence rejected".into());
                self.drop_participant(common, &peer, DropReason::Failed(error));
            }
            JobOutput::VoteChecked {
                valid: true,
                agrees,
                digest,
            } => {
                let voter_nonce = match self.participants.get_mut(&peer) {
                    Some(participant) => {
                        participant.agrees = Some(agrees);
                        participant.voter_nonce
                    }
                    None => return,
                };
                let reputation = env.effective_reputation(&peer, &common.au.id);
                common.tally.add_vote(
                    Vote {
                        voter: peer.clone(),
                        digest,
                        agree: agrees,
                        nonce: voter_nonce,
                    },
                    reputation,
                );
                tracing::debug!(poll = %common.key, voter = %peer, agrees, reputation, "vote tallied");
            }
            JobOutput::RepairApplied => {
                self.repairer = None;
                self.complete_repair(common, &peer);
            }
            other => common.fail(PollError::order(
                format!("participant {peer}"),
                format!("{other:?}"),
            )),
        }
    }

    fn complete_repair(&mut self, common: &mut PollCommon, peer: &PeerId) {
        if self.advance(common, peer, PollerEvent::RepairReceived) {
            self.send_receipt(common, peer);
        }
    }

    fn send_receipt(&mut self, common: &mut PollCommon, peer: &PeerId) {
        let agrees = self
            .participants
            .get(peer)
            .and_then(|p| p.agrees)
            .unwrap_or(false);
        common.send(
            peer.clone(),
            MessageBody::EvaluationReceipt {
                secret: self.secret,
                agreement_hint: if agrees { 1.0 } else { 0.0 },
            },
        );
        self.advance(common, peer, PollerEvent::ReceiptSent);
    }

    /// Keep a voter's nominations, and invite the outer circle once a quorum
    /// of the inner circle has nominated. Returns false if the voter was
    /// dropped for nominating nobody.
    fn record_nominations(
        &mut self,
        common: &mut PollCommon,
        env: &PollEnv,
        peer: &PeerId,
        mut nominees: Vec<PeerId>,
    ) -> bool {
        let Some(participant) = self.participants.get_mut(peer) else {
            return false;
        };
        if participant.outer_circle {
            if !nominees.is_empty() {
                tracing::debug!(poll = %common.key, peer = %peer, "ignoring outer-circle nominations");
            }
            return true;
        }
        nominees.retain(|n| n != peer);
        nominees.sort();
        nominees.dedup();
        if nominees.is_empty() && env.config().drop_empty_nominators {
            self.drop_participant(common, peer, DropReason::NoNominations);
            return false;
        }
        tracing::debug!(poll = %common.key, peer = %peer, nominees = nominees.len(), "nominations received");
        participant.nominees = Some(nominees);

        let nominators = self
            .participants
            .values()
            .filter(|p| p.is_live() && (p.nominees.is_some() || p.nominations_drawn))
            .count();
        if nominators >= common.tally.quorum() {
            self.poll_outer_circle(common, env);
        }
        true
    }

    /// Draw up to an even share of the outer-circle target from each inner
    /// voter's nominations not yet drawn from.
    fn poll_outer_circle(&mut self, common: &mut PollCommon, env: &PollEnv) {
        if self.votes_closed || self.result.is_some() {
            return;
        }
        let target = env.config().target_outer_circle;
        let inner = self.participants.values().filter(|p| !p.outer_circle).count();
        let share = target.div_ceil(inner.max(1));

        let lists: Vec<Vec<PeerId>> = self
            .participants
            .values_mut()
            .filter(|p| p.is_live() && p.nominees.is_some())
            .filter_map(|p| {
                p.nominations_drawn = true;
                p.nominees.take()
            })
            .collect();

        let mut chosen: Vec<PeerId> = Vec::new();
        let mut rng = rand::thread_rng();
        for nominees in lists {
            let eligible: Vec<PeerId> = nominees
                .into_iter()
                .filter(|n| {
                    n != env.local_peer()
                        && !self.participants.contains_key(n)
                        && !chosen.contains(n)
                })
                .collect();
            let drawn: Vec<PeerId> = eligible.choose_multiple(&mut rng, share).cloned().collect();
            chosen.extend(drawn);
        }
        if chosen.is_empty() {
            return;
        }
        tracing::info!(poll = %common.key, peers = chosen.len(), "inviting outer circle");
        for peer in chosen {
            self.add_participant(common, env, peer, true);
        }
    }

    /// Stop waiting for votes: drop everyone who has not voted so the poll
    /// can be evaluated on the votes already in.
    fn close_voting(&mut self, common: &mut PollCommon) {
        if self.votes_closed || self.result.is_some() {
            return;
        }
        self.votes_closed = true;
        let silent: Vec<PeerId> = self
            .participants
            .iter()
            .filter(|(_, p)| p.is_live() && !p.has_voted())
            .map(|(peer, _)| peer.clone())
            .collect();
        tracing::info!(
            poll = %common.key,
            silent = silent.len(),
            votes = common.tally.vote_count(),
            "vote deadline reached"
        );
        for peer in silent {
            self.drop_participant(common, &peer, DropReason::NoVote);
        }
    }

    /// Evaluate once every live participant has a checked vote, and close
    /// once every live participant has its receipt.
    fn check_progress(&mut self, common: &mut PollCommon) {
        if self.participants.is_empty() {
            return;
        }
        if self.result.is_none() {
            let all_voted = self
                .participants
                .iter()
                .filter(|(_, p)| p.is_live())
                .all(|(peer, p)| {
                    p.state == PollerState::SendingRepairReq
                        && p.agrees.is_some()
                        && !self.jobs.values().any(|j| j == peer)
                });
            if all_voted {
                self.evaluate(common);
            }
        }
        if self.result.is_some() {
            let done = self
                .participants
                .values()
                .filter(|p| p.is_live())
                .all(|p| p.state.is_terminal());
            if done {
                common.finish();
            }
        }
    }

    fn evaluate(&mut self, common: &mut PollCommon) {
        let result = common.tally.result();
        self.result = Some(result);
        tracing::info!(
            poll = %common.key,
            ?result,
            votes = common.tally.vote_count(),
            agreement = common.tally.weighted_agreement(),
            "poll evaluated"
        );

        if result == TallyResult::Lost {
            let repairer = common
                .tally
                .disagreeing_voters()
                .find(|voter| self.participants.get(*voter).is_some_and(Participant::is_live))
                .cloned();
            if let Some(repairer) = repairer {
                tracing::info!(poll = %common.key, peer = %repairer, url = %common.spec.url, "requesting repair");
                common.send(
                    repairer.clone(),
                    MessageBody::RepairReq {
                        url: common.spec.url.clone(),
                    },
                );
                self.repairer = Some(repairer);
            }
        }

        let receiving: Vec<PeerId> = self
            .participants
            .iter()
            .filter(|(peer, p)| p.is_live() && self.repairer.as_ref() != Some(*peer))
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in receiving {
            if self.advance(common, &peer, PollerEvent::Evaluated) {
                self.send_receipt(common, &peer);
            }
        }
    }
}
