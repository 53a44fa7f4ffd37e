//! Poll states and their transition tables.
//!
//! Each role advances only along the edges listed here. A (state, event)
//! pair missing from a table is a protocol-order violation.

use std::fmt;

/// States of a voter poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoterState {
    Initializing,
    VerifyingPollEffort,
    ProvingPollAck,
    WaitingPollProof,
    VerifyingPollProof,
    GeneratingVote,
    WaitingRepairReq,
    SendingRepair,
    ProcessReceipt,
    /// Terminal.
    Finalizing,
}

/// Inputs that move a voter poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoterEvent {
    PollReceived,
    PollEffortVerified,
    PollAckProved,
    PollProofReceived,
    PollProofVerified,
    VoteGenerated,
    RepairReqReceived,
    RepairSent,
    ReceiptReceived,
    ReceiptProcessed,
}

impl VoterState {
    pub fn next(self, event: VoterEvent) -> Option<VoterState> {
        use VoterEvent as E;
        use VoterState as S;
        match (self, event) {
            (S::Initializing, E::PollReceived) => Some(S::VerifyingPollEffort),
            (S::VerifyingPollEffort, E::PollEffortVerified) => Some(S::ProvingPollAck),
            (S::ProvingPollAck, E::PollAckProved) => Some(S::WaitingPollProof),
            (S::WaitingPollProof, E::PollProofReceived) => Some(S::VerifyingPollProof),
            (S::VerifyingPollProof, E::PollProofVerified) => Some(S::GeneratingVote),
            (S::GeneratingVote, E::VoteGenerated) => Some(S::WaitingRepairReq),
            (S::WaitingRepairReq, E::RepairReqReceived) => Some(S::SendingRepair),
            (S::SendingRepair, E::RepairSent) => Some(S::WaitingRepairReq),
            (S::WaitingRepairReq, E::ReceiptReceived) => Some(S::ProcessReceipt),
            (S::ProcessReceipt, E::ReceiptProcessed) => Some(S::Finalizing),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == VoterState::Finalizing
    }
}

/// Per-participant states of a poller poll.
///
/// Ordered by progress; a poller reports its least-advanced participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PollerState {
    Initializing,
    SendingPoll,
    WaitingPollAck,
    SendingPollProof,
    WaitingVote,
    SendingRepairReq,
    SendingReceipt,
    /// Terminal.
    Finalizing,
}

/// Inputs that move one poller participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollerEvent {
    PollProofReady,
    PollSent,
    PollAckReceived,
    PollProofSent,
    VoteReceived,
    Evaluated,
    RepairReceived,
    ReceiptSent,
}

impl PollerState {
    pub fn next(self, event: PollerEvent) -> Option<PollerState> {
        use PollerEvent as E;
        use PollerState as S;
        match (self, event) {
            (S::Initializing, E::PollProofReady) => Some(S::SendingPoll),
            (S::SendingPoll, E::PollSent) => Some(S::WaitingPollAck),
            (S::WaitingPollAck, E::PollAckReceived) => Some(S::SendingPollProof),
            (S::SendingPollProof, E::PollProofSent) => Some(S::WaitingVote),
            (S::WaitingVote, E::VoteReceived) => Some(S::SendingRepairReq),
            (S::SendingRepairReq, E::Evaluated) => Some(S::SendingReceipt),
            (S::SendingRepairReq, E::RepairReceived) => Some(S::SendingReceipt),
            (S::SendingReceipt, E::ReceiptSent) => Some(S::Finalizing),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PollerState::Finalizing
    }
}

macro_rules! display_as_debug {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        })*
    };
}

display_as_debug!(VoterState, VoterEvent, PollerState, PollerEvent);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voter_happy_path_reaches_finalizing() {
        use VoterEvent::*;
        let mut state = VoterState::Initializing;
        for event in [
            PollReceived,
            PollEffortVerified,
            PollAckProved,
            PollProofReceived,
            PollProofVerified,
            VoteGenerated,
            RepairReqReceived,
            RepairSent,
            ReceiptReceived,
            ReceiptProcessed,
        ] {
            state = state.next(event).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn voter_rejects_out_of_order_events() {
        assert_eq!(VoterState::Initializing.next(VoterEvent::PollProofReceived), None);
        assert_eq!(VoterState::WaitingPollProof.next(VoterEvent::PollReceived), None);
        assert_eq!(VoterState::GeneratingVote.next(VoterEvent::ReceiptReceived), None);
        assert_eq!(VoterState::Finalizing.next(VoterEvent::PollReceived), None);
    }

    #[test]
    fn repair_loops_back_to_waiting() {
        let state = VoterState::WaitingRepairReq
            .next(VoterEvent::RepairReqReceived)
            .and_then(|s| s.next(VoterEvent::RepairSent));
        assert_eq!(state, Some(VoterState::WaitingRepairReq));
    }

    #[test]
    fn poller_participant_path() {
        use PollerEvent::*;
        let mut state = PollerState::Initializing;
        for event in [
            PollProofReady,
            PollSent,
            PollAckReceived,
            PollProofSent,
            VoteReceived,
            Evaluated,
            ReceiptSent,
        ] {
            state = state.next(event).unwrap();
        }
        assert!(state.is_terminal());
        assert_eq!(PollerState::WaitingPollAck.next(VoteReceived), None);
    }

    #[test]
    fn poller_states_order_by_progress() {
        assert!(PollerState::WaitingPollAck < PollerState::WaitingVote);
        assert!(PollerState::SendingReceipt < PollerState::Finalizing);
    }
}
