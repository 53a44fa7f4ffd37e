use thiserror::Error;

use lcap_effort::HashError;
use lcap_messages::PollNak;
use lcap_types::PollKey;

/// Why a poll ended in the error state.
///
/// These are recorded on the poll and never returned from the registry:
/// the poll finalizes and callers query [`crate::Poll::error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("unexpected {event} in state {state}")]
    ProtocolOrder { state: String, event: String },

    #[error("effort verification failed: {0}")]
    EffortVerification(String),

    #[error("effort computation failed: {0}")]
    EffortComputation(String),

    #[error("repair could not be stored: {0}")]
    RepairFailed(String),
}

/// Coarse classification of a [`PollError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollErrorKind {
    ProtocolOrder,
    EffortVerification,
    EffortComputation,
    Repair,
}

impl PollError {
    pub fn order(state: impl std::fmt::Display, event: impl std::fmt::Display) -> Self {
        PollError::ProtocolOrder {
            state: state.to_string(),
            event: event.to_string(),
        }
    }

    pub fn kind(&self) -> PollErrorKind {
        match self {
            PollError::ProtocolOrder { .. } => PollErrorKind::ProtocolOrder,
            PollError::EffortVerification(_) => PollErrorKind::EffortVerification,
            PollError::EffortComputation(_) => PollErrorKind::EffortComputation,
            PollError::RepairFailed(_) => PollErrorKind::Repair,
        }
    }
}

/// Errors returned synchronously by the poll registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("conflicts with active poll {existing}")]
    Conflict { existing: PollKey },

    #[error("poll {0} already exists")]
    DuplicateKey(PollKey),

    #[error("message claims poll {claimed} but its contents derive {derived}")]
    KeyMismatch { claimed: PollKey, derived: PollKey },

    #[error("protocol version {0} not supported")]
    UnsupportedVersion(u32),

    #[error("hash algorithm {0} not supported")]
    UnsupportedHashAlgorithm(String),

    #[error("archival unit {0} not held here")]
    NoSuchAu(String),

    #[error("already serving {0} voter polls")]
    TooManyVoters(usize),

    #[error("cannot hash in {budget_ms}ms (estimate {estimate_ms}ms)")]
    Unschedulable { estimate_ms: u64, budget_ms: u64 },

    #[error("hash estimate failed: {0}")]
    Hash(#[from] HashError),

    #[error("no secret stored for the poll verifier")]
    UnknownVerifier,

    #[error("no active poll {0}")]
    UnknownPoll(PollKey),

    #[error("poll {0} is closed")]
    PollClosed(PollKey),

    #[error("poll {0} is not a poller")]
    NotAPoller(PollKey),

    #[error("poll manager requires a tokio runtime")]
    NoRuntime,
}

impl ManagerError {
    /// The refusal to send a poller whose invitation failed with this error.
    pub fn nak(&self) -> Option<PollNak> {
        match self {
            ManagerError::Conflict { .. } => Some(PollNak::Conflict),
            ManagerError::TooManyVoters(_) => Some(PollNak::TooManyVoters),
            ManagerError::NoSuchAu(_) => Some(PollNak::NoSuchAu),
            ManagerError::UnsupportedVersion(_) => Some(PollNak::UnsupportedVersion),
            ManagerError::UnsupportedHashAlgorithm(_) => Some(PollNak::UnsupportedHashAlgorithm),
            ManagerError::Unschedulable { .. } | ManagerError::Hash(_) => {
                Some(PollNak::Unschedulable)
            }
            _ => None,
        }
    }
}

/// Rejected reputation transfer mappings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferMapError {
    #[error("malformed transfer entry {0:?}, expected \"source,destination\"")]
    Malformed(String),

    #[error("invalid peer identity {0:?} in transfer map")]
    InvalidPeer(String),

    #[error("peer {0} inherits reputation from more than one source")]
    MultipleSources(String),

    #[error("peer {0} transfers reputation to more than one destination")]
    MultipleDestinations(String),

    #[error("reputation transfer cycle through {0}")]
    Cycle(String),

    #[error("transfer chain from {peer} exceeds {max} hops")]
    ChainTooLong { peer: String, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid poller config: {0}")]
    Invalid(String),

    #[error("invalid reputation transfer map: {0}")]
    TransferMap(#[from] TransferMapError),
}
