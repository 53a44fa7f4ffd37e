//! The shared poll handle and its serialized event processing.
//!
//! Every input to a poll (a protocol message, a finished effort job, a
//! solicitation, the deadline) is applied under the poll's own lock. The
//! role machine never performs I/O itself: it queues [`Action`]s that the
//! manager carries out once the lock is released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

use lcap_messages::{LcapMessage, MessageBody};
use lcap_types::{ArchivalUnit, PeerId, PollKey, PollSpec};

use crate::job::{Job, JobOutput, OpId};
use crate::poller::{ParticipantStatus, PollerMachine};
use crate::services::PollEnv;
use crate::state::{PollerState, VoterState};
use crate::timer::Deadline;
use crate::voter::VoterMachine;
use crate::{PollError, PollErrorKind, PollTally};

/// Which side of the protocol this node plays in a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Poller,
    Voter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Poller => f.write_str("poller"),
            Role::Voter => f.write_str("voter"),
        }
    }
}

/// Poll-level state, tagged by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollState {
    Voter(VoterState),
    Poller(PollerState),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        match self {
            PollState::Voter(s) => s.is_terminal(),
            PollState::Poller(s) => s.is_terminal(),
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Voter(s) => write!(f, "voter:{s}"),
            PollState::Poller(s) => write!(f, "poller:{s}"),
        }
    }
}

/// Snapshot published to subscribers after every change.
#[derive(Clone, Debug, PartialEq)]
pub struct PollStatus {
    pub state: PollState,
    pub closed: bool,
    pub suspended: bool,
    pub error: Option<PollErrorKind>,
}

pub(crate) enum PollEvent {
    Message(LcapMessage),
    Solicit(Vec<PeerId>),
    JobDone {
        op: OpId,
        result: Result<JobOutput, PollError>,
    },
    /// The poller stops waiting for votes.
    VoteDeadline,
    Deadline,
    /// Close without error, discarding whatever is in flight.
    Abort,
}

impl PollEvent {
    fn name(&self) -> &'static str {
        match self {
            PollEvent::Message(_) => "message",
            PollEvent::Solicit(_) => "solicit",
            PollEvent::JobDone { .. } => "job_done",
            PollEvent::VoteDeadline => "vote_deadline",
            PollEvent::Deadline => "deadline",
            PollEvent::Abort => "abort",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Action {
    Send { to: PeerId, body: MessageBody },
    Run { op: OpId, job: Job },
}

/// State shared by both roles.
pub(crate) struct PollCommon {
    pub(crate) key: PollKey,
    pub(crate) spec: PollSpec,
    pub(crate) au: ArchivalUnit,
    pub(crate) tally: PollTally,
    pub(crate) error: Option<PollError>,
    pub(crate) closed: bool,
    next_op: OpId,
    outbox: Vec<Action>,
    history: Vec<PollState>,
}

impl PollCommon {
    pub(crate) fn new(key: PollKey, spec: PollSpec, au: ArchivalUnit, tally: PollTally) -> Self {
        Self {
            key,
            spec,
            au,
            tally,
            error: None,
            closed: false,
            next_op: 0,
            outbox: Vec::new(),
            history: Vec::new(),
        }
    }

    pub(crate) fn send(&mut self, to: PeerId, body: MessageBody) {
        self.outbox.push(Action::Send { to, body });
    }

    /// Queue a job and return the id its result will come back under.
    pub(crate) fn run(&mut self, job: Job) -> OpId {
        self.next_op += 1;
        let op = self.next_op;
        self.outbox.push(Action::Run { op, job });
        op
    }

    /// Close the poll in the error state. The first error sticks.
    pub(crate) fn fail(&mut self, error: PollError) {
        tracing::warn!(poll = %self.key, error = %error, "poll failed");
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.closed = true;
    }

    pub(crate) fn finish(&mut self) {
        self.closed = true;
    }

    /// Append to the transition history, skipping repeats.
    pub(crate) fn record(&mut self, state: PollState) {
        if self.history.last() != Some(&state) {
            tracing::trace!(poll = %self.key, %state, "poll state");
            self.history.push(state);
        }
    }
}

pub(crate) enum RoleMachine {
    Voter(VoterMachine),
    Poller(PollerMachine),
}

impl RoleMachine {
    fn state(&self, closed: bool) -> PollState {
        match self {
            RoleMachine::Voter(m) => PollState::Voter(m.state()),
            RoleMachine::Poller(m) => PollState::Poller(m.state(closed)),
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub(crate) actions: Vec<Action>,
    /// The poll closed while handling this event.
    pub(crate) closed: bool,
}

pub(crate) struct PollCore {
    common: PollCommon,
    machine: RoleMachine,
    deadline: Deadline,
    vote_deadline: Option<Deadline>,
    suspended: bool,
    deferred: VecDeque<PollEvent>,
}

impl PollCore {
    fn apply(&mut self, env: &PollEnv, event: PollEvent) -> Applied {
        if self.common.closed {
            tracing::debug!(poll = %self.common.key, event = event.name(), "event for closed poll ignored");
            return Applied::default();
        }
        if self.suspended && !matches!(event, PollEvent::Abort) {
            tracing::debug!(poll = %self.common.key, event = event.name(), "event deferred while suspended");
            self.deferred.push_back(event);
            return Applied::default();
        }
        if matches!(event, PollEvent::VoteDeadline) {
            self.vote_deadline = None;
        }

        match (&mut self.machine, event) {
            (_, PollEvent::Abort) => self.common.finish(),
            (RoleMachine::Voter(m), event) => m.handle(&mut self.common, env, event),
            (RoleMachine::Poller(m), event) => m.handle(&mut self.common, env, event),
        }

        let state = self.machine.state(self.common.closed);
        self.common.record(state);

        let mut actions = std::mem::take(&mut self.common.outbox);
        let closed = self.common.closed;
        if closed {
            match &mut self.machine {
                RoleMachine::Voter(m) => m.finalize(&mut self.common),
                RoleMachine::Poller(m) => m.finalize(&mut self.common, env),
            }
            self.common.record(self.machine.state(true));
            self.deadline.cancel();
            self.vote_deadline = None;
            self.deferred.clear();
            actions.retain(|a| matches!(a, Action::Send { .. }));
            tracing::info!(
                poll = %self.common.key,
                error = ?self.common.error,
                votes = self.common.tally.vote_count(),
                "poll closed"
            );
        }
        Applied { actions, closed }
    }

    fn status(&self) -> PollStatus {
        PollStatus {
            state: self.machine.state(self.common.closed),
            closed: self.common.closed,
            suspended: self.suspended,
            error: self.common.error.as_ref().map(PollError::kind),
        }
    }
}

struct PollShared {
    key: PollKey,
    role: Role,
    spec: PollSpec,
    au: ArchivalUnit,
    core: Mutex<PollCore>,
    status: watch::Sender<PollStatus>,
}

/// Handle to one poll. Cheap to clone.
#[derive(Clone)]
pub struct Poll {
    shared: Arc<PollShared>,
}

impl Poll {
    /// `vote_deadline`, if any, fires a [`PollEvent::VoteDeadline`] that
    /// far into the poll.
    pub(crate) fn new(
        common: PollCommon,
        machine: RoleMachine,
        deadline: Duration,
        vote_deadline: Option<Duration>,
    ) -> Self {
        let role = match machine {
            RoleMachine::Voter(_) => Role::Voter,
            RoleMachine::Poller(_) => Role::Poller,
        };
        let mut core = PollCore {
            common,
            machine,
            deadline: Deadline::new(deadline),
            vote_deadline: vote_deadline.map(Deadline::new),
            suspended: false,
            deferred: VecDeque::new(),
        };
        let initial = core.machine.state(false);
        core.common.record(initial);
        let (status, _) = watch::channel(core.status());
        Self {
            shared: Arc::new(PollShared {
                key: core.common.key,
                role,
                spec: core.common.spec.clone(),
                au: core.common.au.clone(),
                core: Mutex::new(core),
                status,
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, PollCore> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> PollKey {
        self.shared.key
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn spec(&self) -> &PollSpec {
        &self.shared.spec
    }

    pub fn archival_unit(&self) -> &ArchivalUnit {
        &self.shared.au
    }

    pub fn state(&self) -> PollState {
        self.status().state
    }

    pub fn status(&self) -> PollStatus {
        self.core().status()
    }

    pub fn is_error_state(&self) -> bool {
        self.core().common.error.is_some()
    }

    pub fn error(&self) -> Option<PollError> {
        self.core().common.error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.core().common.closed
    }

    pub fn is_suspended(&self) -> bool {
        self.core().suspended
    }

    /// A copy of the tally as it stands.
    pub fn tally(&self) -> PollTally {
        self.core().common.tally.clone()
    }

    /// Every poll-level state this poll has passed through, in order.
    pub fn transitions(&self) -> Vec<PollState> {
        self.core().common.history.clone()
    }

    /// Per-voter progress of a poller poll. Empty for voter polls.
    pub fn participants(&self) -> Vec<ParticipantStatus> {
        match &self.core().machine {
            RoleMachine::Poller(m) => m.participants(),
            RoleMachine::Voter(_) => Vec::new(),
        }
    }

    pub fn deadline_remaining(&self) -> Duration {
        self.core().deadline.remaining()
    }

    /// Time left for votes to arrive. `None` for voter polls and once the
    /// vote deadline has passed.
    pub fn vote_deadline_remaining(&self) -> Option<Duration> {
        self.core().vote_deadline.as_ref().map(Deadline::remaining)
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the published status satisfies `predicate`.
    pub async fn wait_until(&self, mut predicate: impl FnMut(&PollStatus) -> bool) -> PollStatus {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let result = rx.wait_for(|status| predicate(status)).await.map(|s| s.clone());
        result.unwrap_or_else(|_| self.status())
    }

    /// Wait for the poll to close.
    pub async fn closed(&self) -> PollStatus {
        self.wait_until(|status| status.closed).await
    }

    pub(crate) fn apply(&self, env: &PollEnv, event: PollEvent) -> Applied {
        self.core().apply(env, event)
    }

    /// Push the current status to subscribers if it changed.
    pub(crate) fn publish(&self) {
        let status = self.status();
        self.shared.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Schedule `fire` with [`PollEvent::Deadline`] and, while votes are
    /// still awaited, [`PollEvent::VoteDeadline`].
    pub(crate) fn arm_deadlines<F>(&self, runtime: &Handle, fire: F)
    where
        F: Fn(PollEvent) + Clone + Send + 'static,
    {
        let mut core = self.core();
        if core.common.closed || core.suspended {
            return;
        }
        if let Some(vote_deadline) = core.vote_deadline.as_mut() {
            let fire = fire.clone();
            vote_deadline.arm(runtime, move || fire(PollEvent::VoteDeadline));
        }
        core.deadline.arm(runtime, move || fire(PollEvent::Deadline));
    }

    /// Freeze the deadline. Returns false if the poll is closed.
    pub(crate) fn suspend(&self) -> bool {
        let mut core = self.core();
        if core.common.closed {
            return false;
        }
        core.deadline.pause();
        if let Some(vote_deadline) = core.vote_deadline.as_mut() {
            vote_deadline.pause();
        }
        core.suspended = true;
        true
    }

    /// Thaw the deadline and hand back the events deferred meanwhile.
    pub(crate) fn resume(&self) -> Option<Vec<PollEvent>> {
        let mut core = self.core();
        if core.common.closed || !core.suspended {
            return None;
        }
        core.suspended = false;
        core.deadline.resume();
        if let Some(vote_deadline) = core.vote_deadline.as_mut() {
            vote_deadline.resume();
        }
        Some(core.deferred.drain(..).collect())
    }
}

impl fmt::Debug for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poll")
            .field("key", &self.shared.key)
            .field("role", &self.shared.role)
            .field("spec", &self.shared.spec)
            .finish_non_exhaustive()
    }
}
