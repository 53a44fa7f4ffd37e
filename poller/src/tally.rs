//! Vote accumulation for one poll.

use serde::{Deserialize, Serialize};

use lcap_types::{Digest, Nonce, PeerId};

/// How a voter's reputation scales its vote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementWeighting {
    /// Weight equals reputation, clamped to `[0, 1]`.
    #[default]
    Linear,
    /// Every vote weighs 1 regardless of reputation.
    Uniform,
}

impl AgreementWeighting {
    pub fn weight(&self, reputation: f64) -> f64 {
        match self {
            AgreementWeighting::Linear if reputation.is_nan() => 0.0,
            AgreementWeighting::Linear => reputation.clamp(0.0, 1.0),
            AgreementWeighting::Uniform => 1.0,
        }
    }
}

/// One peer's assertion about the content under audit.
#[derive(Clone, Debug, PartialEq)]
pub struct Vote {
    pub voter: PeerId,
    pub digest: Digest,
    /// Whether the voter's digest matched ours.
    pub agree: bool,
    pub nonce: Nonce,
}

/// A vote together with the weight it was counted at.
#[derive(Clone, Debug, PartialEq)]
pub struct TalliedVote {
    pub vote: Vote,
    pub weight: f64,
}

/// The result of offering a vote to the tally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteResult {
    /// First vote from this voter.
    Accepted,
    /// The voter already voted; the tally is unchanged.
    Ignored,
}

/// Outcome of a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TallyResult {
    /// Weighted agreement reached the vote margin.
    Won,
    /// Weighted disagreement reached the vote margin; our copy needs repair.
    Lost,
    /// Enough votes but neither side reached the margin.
    Inconclusive,
    /// Fewer votes than the quorum.
    NoQuorum,
}

/// Ordered, idempotent vote list with reputation-weighted sums.
#[derive(Clone, Debug)]
pub struct PollTally {
    votes: Vec<TalliedVote>,
    agree_weight: f64,
    disagree_weight: f64,
    weighting: AgreementWeighting,
    quorum: usize,
    vote_margin: f64,
}

impl PollTally {
    pub fn new(weighting: AgreementWeighting, quorum: usize, vote_margin: f64) -> Self {
        Self {
            votes: Vec::new(),
            agree_weight: 0.0,
            disagree_weight: 0.0,
            weighting,
            quorum,
            vote_margin,
        }
    }

    /// Count a vote at the weight the voter's reputation earns it.
    ///
    /// A second vote from the same voter is ignored.
    pub fn add_vote(&mut self, vote: Vote, reputation: f64) -> VoteResult {
        if self.has_voted(&vote.voter) {
            return VoteResult::Ignored;
        }
        let weight = self.weighting.weight(reputation);
        if vote.agree {
            self.agree_weight += weight;
        } else {
            self.disagree_weight += weight;
        }
        self.votes.push(TalliedVote { vote, weight });
        VoteResult::Accepted
    }

    pub fn has_voted(&self, voter: &PeerId) -> bool {
        self.votes.iter().any(|v| &v.vote.voter == voter)
    }

    /// Votes in arrival order.
    pub fn votes(&self) -> &[TalliedVote] {
        &self.votes
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn agree_weight(&self) -> f64 {
        self.agree_weight
    }

    pub fn disagree_weight(&self) -> f64 {
        self.disagree_weight
    }

    /// Agreeing share of the total weight, 0 when nothing has been counted.
    pub fn weighted_agreement(&self) -> f64 {
        let total = self.agree_weight + self.disagree_weight;
        if total > 0.0 {
            self.agree_weight / total
        } else {
            0.0
        }
    }

    pub fn agreeing_voters(&self) -> impl Iterator<Item = &PeerId> {
        self.votes.iter().filter(|v| v.vote.agree).map(|v| &v.vote.voter)
    }

    pub fn disagreeing_voters(&self) -> impl Iterator<Item = &PeerId> {
        self.votes.iter().filter(|v| !v.vote.agree).map(|v| &v.vote.voter)
    }

    pub fn result(&self) -> TallyResult {
        if self.votes.len() < self.quorum {
            return TallyResult::NoQuorum;
        }
        let total = self.agree_weight + self.disagree_weight;
        if total <= 0.0 {
            return TallyResult::Inconclusive;
        }
        if self.agree_weight / total >= self.vote_margin {
            TallyResult::Won
        } else if self.disagree_weight / total >= self.vote_margin {
            TallyResult::Lost
        } else {
            TallyResult::Inconclusive
        }
    }
}
