//! The V3 polling protocol.
//!
//! Peers audit each other's copies of preserved content by running polls: a
//! poller invites voters, each voter proves effort and returns a digest of
//! its copy, and the poller tallies the reputation-weighted agreement. A
//! poller that loses a poll requests a repair from a disagreeing voter.
//!
//! ## Module overview
//!
//! - [`manager`]: Poll registry, conflict detection, message routing, suspend/resume.
//! - [`factory`]: Poll duration and construction of the role-correct poll.
//! - [`poll`]: The shared poll handle and its serialized event processing.
//! - [`voter`] / [`poller`]: Role state machines.
//! - [`state`]: State enums and transition tables.
//! - [`tally`]: Vote accumulation and weighted agreement.
//! - [`repair_policy`]: Whether to serve repair content to a peer.
//! - [`reputation_transfers`]: Reputation inherited across peer identities.
//! - [`verifier`]: Verifier/secret commitment pairs.
//! - [`config`]: Protocol parameters with a live-reloadable handle.
//! - [`error`]: Error types.

pub mod config;
pub mod error;
pub mod factory;
mod job;
pub mod manager;
pub mod poll;
pub mod poller;
pub mod repair_policy;
pub mod reputation_transfers;
pub mod services;
pub mod state;
pub mod tally;
mod timer;
pub mod verifier;
pub mod voter;

pub use config::{ConfigHandle, PollerConfig};
pub use error::{ConfigError, ManagerError, PollError, PollErrorKind, TransferMapError};
pub use factory::PollFactory;
pub use manager::{PollManager, PollRequest};
pub use poll::{Poll, PollState, PollStatus, Role};
pub use poller::{DropReason, ParticipantStatus};
pub use repair_policy::{RepairDecision, RepairPolicy};
pub use reputation_transfers::{ReputationTransfers, TransferMap, MAX_TRANSFER_CHAIN};
pub use services::PollServices;
pub use state::{PollerState, VoterState};
pub use tally::{AgreementWeighting, PollTally, TalliedVote, TallyResult, Vote, VoteResult};
pub use verifier::VerifierStore;
