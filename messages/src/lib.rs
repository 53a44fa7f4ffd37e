//! Protocol messages exchanged between a poller and its voters.
//!
//! Every message carries a [`MessageHeader`] naming the poll it belongs to
//! and the sending peer, followed by a typed [`MessageBody`]. How messages are
//! encoded on the wire is the transport's business; the types derive serde
//! so any encoding can be plugged in.

use serde::{Deserialize, Serialize};
use std::fmt;

use lcap_types::{
    EffortProof, Nonce, PeerId, PollKey, PollSpec, Secret, Timestamp, Verifier, VoteEvidence,
    V3_PROTOCOL,
};

/// Header present on every protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub poll_key: PollKey,
    pub sender: PeerId,
    pub protocol_version: u32,
    pub sent_at: Timestamp,
}

/// Message kinds, numbered as on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Poll = 10,
    PollAck = 11,
    PollProof = 12,
    Vote = 15,
    RepairReq = 16,
    RepairRep = 17,
    EvaluationReceipt = 18,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a voter declined a poll invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollNak {
    /// A conflicting poll is already running here.
    Conflict,
    /// The voter is already serving its maximum number of polls.
    TooManyVoters,
    /// The voter does not hold the archival unit.
    NoSuchAu,
    /// The protocol version is not spoken here.
    UnsupportedVersion,
    /// The requested hash algorithm is not available.
    UnsupportedHashAlgorithm,
    /// The content cannot be hashed before the poll ends.
    Unschedulable,
}

/// Typed message payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Invitation to vote, carrying everything a voter needs to join.
    Poll {
        spec: PollSpec,
        duration_ms: u64,
        poller_nonce: Nonce,
        verifier: Verifier,
        effort_proof: EffortProof,
        hash_algorithm: String,
    },
    /// Acceptance (with proof of effort) or refusal of an invitation.
    PollAck {
        voter_nonce: Nonce,
        effort_proof: EffortProof,
        nak: Option<PollNak>,
    },
    /// The poller's proof of effort answering the voter's nonce.
    PollProof { effort_proof: EffortProof },
    /// The voter's hashed content with proof of effort, plus the peers it
    /// nominates for the poll's outer circle.
    Vote {
        voter_nonce: Nonce,
        evidence: VoteEvidence,
        #[serde(default)]
        nominees: Vec<PeerId>,
    },
    /// Request for the voter's copy of a URL.
    RepairReq { url: String },
    /// Repair content, or `None` if the voter declines to serve it.
    RepairRep {
        url: String,
        content: Option<Vec<u8>>,
    },
    /// Closes a voter's participation: reveals the poll secret and tells the
    /// voter how well it agreed.
    EvaluationReceipt { secret: Secret, agreement_hint: f64 },
}

impl MessageBody {
    pub fn opcode(&self) -> Opcode {
        match self {
            MessageBody::Poll { .. } => Opcode::Poll,
            MessageBody::PollAck { .. } => Opcode::PollAck,
            MessageBody::PollProof { .. } => Opcode::PollProof,
            MessageBody::Vote { .. } => Opcode::Vote,
            MessageBody::RepairReq { .. } => Opcode::RepairReq,
            MessageBody::RepairRep { .. } => Opcode::RepairRep,
            MessageBody::EvaluationReceipt { .. } => Opcode::EvaluationReceipt,
        }
    }

    /// A refusal to join the poll.
    pub fn nak(reason: PollNak) -> Self {
        MessageBody::PollAck {
            voter_nonce: Nonce::ZERO,
            effort_proof: EffortProof::default(),
            nak: Some(reason),
        }
    }
}

/// A complete protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LcapMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl LcapMessage {
    /// Build a V3 message stamped with the current time.
    pub fn new(poll_key: PollKey, sender: PeerId, body: MessageBody) -> Self {
        Self {
            header: MessageHeader {
                poll_key,
                sender,
                protocol_version: V3_PROTOCOL,
                sent_at: Timestamp::now(),
            },
            body,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.body.opcode()
    }

    pub fn poll_key(&self) -> &PollKey {
        &self.header.poll_key
    }

    pub fn sender(&self) -> &PeerId {
        &self.header.sender
    }
}

impl fmt::Display for LcapMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} for poll {:?}",
            self.opcode(),
            self.header.sender,
            self.header.poll_key
        )
    }
}
