//! Poll registry: creation with conflict detection, message routing,
//! verifier/secret pairs, and suspend/resume.
//!
//! # Locking
//!
//! The registry lock and a poll's own lock are never held together. An event
//! is applied under the poll lock; if the poll closed it is then moved to the
//! recent map under the registry lock; only then are its messages sent, its
//! jobs spawned and its status published.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use lcap_crypto::{poll_key, random_nonce};
use lcap_messages::{LcapMessage, MessageBody, PollNak};
use lcap_types::{Nonce, PeerId, PollKey, PollSpec, Secret, Verifier, V3_PROTOCOL};

use crate::job::{Job, OpId};
use crate::poll::{Action, PollEvent};
use crate::services::PollEnv;
use crate::{ManagerError, Poll, PollError, PollFactory, PollServices, Role, VerifierStore};

/// Everything needed to create a poll in either role.
#[derive(Clone, Debug, PartialEq)]
pub struct PollRequest {
    pub spec: PollSpec,
    pub duration: Duration,
    /// The poller's nonce; together with the poll spec it derives the poll key.
    pub challenge: Nonce,
    pub verifier: Verifier,
    /// The peer that called the poll. The local peer makes this a poller.
    pub originator: PeerId,
    pub hash_algorithm: String,
}

#[derive(Default)]
struct Registry {
    current: HashMap<PollKey, Poll>,
    recent: HashMap<PollKey, (Poll, Instant)>,
}

impl Registry {
    fn purge_recent(&mut self, now: Instant) {
        self.recent.retain(|_, (_, expires)| *expires > now);
    }

    fn voter_count(&self) -> usize {
        self.current
            .values()
            .filter(|p| p.role() == Role::Voter)
            .count()
    }
}

struct ManagerInner {
    env: PollEnv,
    factory: PollFactory,
    registry: Mutex<Registry>,
    verifiers: VerifierStore,
    runtime: Handle,
}

/// The poll registry. Cheap to clone; every clone shares the same polls.
#[derive(Clone)]
pub struct PollManager {
    inner: Arc<ManagerInner>,
}

impl PollManager {
    /// Must be called from within a tokio runtime, which will run the
    /// manager's timers and effort jobs.
    pub fn new(services: PollServices) -> Result<Self, ManagerError> {
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        let factory = PollFactory::new(&services);
        Ok(Self {
            inner: Arc::new(ManagerInner {
                env: PollEnv::new(services),
                factory,
                registry: Mutex::new(Registry::default()),
                verifiers: VerifierStore::new(),
                runtime,
            }),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_peer(&self) -> &PeerId {
        self.inner.env.local_peer()
    }

    pub fn factory(&self) -> &PollFactory {
        &self.inner.factory
    }

    /// Create and register a poll. The role follows from the originator.
    ///
    /// Fails without touching the registry if the key is taken (active or
    /// recently closed) or the poll spec conflicts with an active poll.
    pub fn make_poll(&self, request: PollRequest) -> Result<Poll, ManagerError> {
        let role = if &request.originator == self.local_peer() {
            Role::Poller
        } else {
            Role::Voter
        };
        let key = poll_key(&request.challenge, &request.spec);
        let poll = self
            .inner
            .factory
            .create(key, &request, role, &self.inner.verifiers)?;
        let config = self.inner.env.config();

        {
            let mut registry = self.registry();
            registry.purge_recent(Instant::now());
            if registry.current.contains_key(&key) || registry.recent.contains_key(&key) {
                return Err(ManagerError::DuplicateKey(key));
            }
            if let Some(existing) = registry
                .current
                .values()
                .find(|p| p.spec().conflicts_with(&request.spec))
            {
                tracing::info!(poll = %key, existing = %existing.key(), spec = %request.spec, "poll conflicts");
                return Err(ManagerError::Conflict {
                    existing: existing.key(),
                });
            }
            if role == Role::Voter && registry.voter_count() >= config.max_simultaneous_voters {
                return Err(ManagerError::TooManyVoters(config.max_simultaneous_voters));
            }
            registry.current.insert(key, poll.clone());
        }

        self.arm_deadline(&poll);
        poll.publish();
        tracing::info!(poll = %key, %role, spec = %request.spec, originator = %request.originator, "poll registered");
        Ok(poll)
    }

    /// Start a poll from this node and invite `peers` to vote in it.
    pub fn call_poll(&self, spec: PollSpec, peers: Vec<PeerId>) -> Result<Poll, ManagerError> {
        let config = self.inner.env.config();
        let duration = self.inner.factory.calculate_duration(&spec)?;
        let verifier = self.make_verifier(duration + config.receipt_padding());
        let poll = self.make_poll(PollRequest {
            spec,
            duration,
            challenge: random_nonce(),
            verifier,
            originator: self.local_peer().clone(),
            hash_algorithm: config.hash_algorithm.clone(),
        })?;
        self.solicit_votes_from(&poll.key(), peers)?;
        Ok(poll)
    }

    /// Invite more peers into a poll this node is calling.
    pub fn solicit_votes_from(&self, key: &PollKey, peers: Vec<PeerId>) -> Result<(), ManagerError> {
        let poll = self.require_active(key)?;
        if poll.role() != Role::Poller {
            return Err(ManagerError::NotAPoller(*key));
        }
        self.dispatch(&poll, PollEvent::Solicit(peers));
        Ok(())
    }

    pub fn find_poll(&self, key: &PollKey) -> Option<Poll> {
        self.registry().current.get(key).cloned()
    }

    /// Remove a poll outright, closing it if it was still running.
    pub fn remove_poll(&self, key: &PollKey) -> Option<Poll> {
        let removed = {
            let mut registry = self.registry();
            registry
                .current
                .remove(key)
                .or_else(|| registry.recent.remove(key).map(|(poll, _)| poll))
        };
        if let Some(poll) = &removed {
            let applied = poll.apply(&self.inner.env, PollEvent::Abort);
            self.perform(poll, applied.actions);
            poll.publish();
            tracing::info!(poll = %key, "poll removed");
        }
        removed
    }

    pub fn is_poll_active(&self, key: &PollKey) -> bool {
        self.find_poll(key).is_some_and(|p| !p.is_closed())
    }

    pub fn is_poll_closed(&self, key: &PollKey) -> bool {
        let registry = self.registry();
        if let Some((_, expires)) = registry.recent.get(key) {
            return *expires > Instant::now();
        }
        registry.current.get(key).is_some_and(Poll::is_closed)
    }

    pub fn is_poll_suspended(&self, key: &PollKey) -> bool {
        self.find_poll(key).is_some_and(|p| p.is_suspended())
    }

    /// Freeze a poll's deadline. Events that arrive meanwhile are held.
    pub fn suspend_poll(&self, key: &PollKey) -> Result<(), ManagerError> {
        let poll = self.require_active(key)?;
        if poll.suspend() {
            tracing::info!(poll = %key, remaining = ?poll.deadline_remaining(), "poll suspended");
            poll.publish();
        }
        Ok(())
    }

    /// Restart a suspended poll's deadline and replay held events.
    pub fn resume_poll(&self, key: &PollKey) -> Result<(), ManagerError> {
        let poll = self.require_active(key)?;
        let Some(deferred) = poll.resume() else {
            return Ok(());
        };
        tracing::info!(poll = %key, deferred = deferred.len(), "poll resumed");
        self.arm_deadline(&poll);
        poll.publish();
        for event in deferred {
            self.dispatch(&poll, event);
        }
        Ok(())
    }

    /// Route an inbound protocol message.
    ///
    /// Messages for an active poll go to it. A fresh invitation creates a
    /// voter; if we cannot take part, the poller is sent a NAK.
    pub fn handle_incoming_message(&self, message: LcapMessage) -> Result<(), ManagerError> {
        let key = *message.poll_key();
        let sender = message.sender().clone();
        let opcode = message.opcode();

        if message.header.protocol_version != V3_PROTOCOL {
            let error = ManagerError::UnsupportedVersion(message.header.protocol_version);
            if matches!(message.body, MessageBody::Poll { .. }) {
                self.send_nak(&key, &sender, PollNak::UnsupportedVersion);
            }
            tracing::debug!(poll = %key, sender = %sender, %opcode, error = %error, "message rejected");
            return Err(error);
        }

        if let Some(poll) = self.find_poll(&key) {
            self.dispatch(&poll, PollEvent::Message(message));
            return Ok(());
        }
        if self.is_poll_closed(&key) {
            tracing::debug!(poll = %key, sender = %sender, %opcode, "message for closed poll dropped");
            return Ok(());
        }

        let MessageBody::Poll {
            spec,
            duration_ms,
            poller_nonce,
            verifier,
            hash_algorithm,
            ..
        } = &message.body
        else {
            tracing::debug!(poll = %key, sender = %sender, %opcode, "message for unknown poll dropped");
            return Err(ManagerError::UnknownPoll(key));
        };
        if &sender == self.local_peer() {
            tracing::debug!(poll = %key, "ignoring our own invitation");
            return Ok(());
        }
        let derived = poll_key(poller_nonce, spec);
        if derived != key {
            tracing::warn!(poll = %key, %derived, sender = %sender, "invitation key mismatch");
            return Err(ManagerError::KeyMismatch {
                claimed: key,
                derived,
            });
        }

        let request = PollRequest {
            spec: spec.clone(),
            duration: Duration::from_millis(*duration_ms),
            challenge: *poller_nonce,
            verifier: *verifier,
            originator: sender.clone(),
            hash_algorithm: hash_algorithm.clone(),
        };
        match self.make_poll(request) {
            Ok(poll) => {
                self.dispatch(&poll, PollEvent::Message(message));
                Ok(())
            }
            Err(ManagerError::DuplicateKey(_)) => {
                // Lost a race with another copy of the invitation.
                if let Some(poll) = self.find_poll(&key) {
                    self.dispatch(&poll, PollEvent::Message(message));
                }
                Ok(())
            }
            Err(e) => {
                tracing::info!(poll = %key, poller = %sender, error = %e, "declining invitation");
                if let Some(reason) = e.nak() {
                    self.send_nak(&key, &sender, reason);
                }
                Err(e)
            }
        }
    }

    /// Store a fresh secret for `lifetime` and return its verifier.
    pub fn make_verifier(&self, lifetime: Duration) -> Verifier {
        self.inner.verifiers.make_verifier(lifetime)
    }

    pub fn get_secret(&self, verifier: &Verifier) -> Option<Secret> {
        self.inner.verifiers.get_secret(verifier)
    }

    pub fn active_poll_count(&self) -> usize {
        self.registry().current.len()
    }

    pub fn active_pollers(&self) -> usize {
        self.registry()
            .current
            .values()
            .filter(|p| p.role() == Role::Poller)
            .count()
    }

    pub fn active_voters(&self) -> usize {
        self.registry().voter_count()
    }

    /// Every active poll.
    pub fn polls(&self) -> Vec<Poll> {
        self.registry().current.values().cloned().collect()
    }

    /// Close every active poll.
    pub fn shutdown(&self) {
        let keys: Vec<PollKey> = self.registry().current.keys().copied().collect();
        tracing::info!(polls = keys.len(), "closing all polls");
        for key in keys {
            if let Some(poll) = self.find_poll(&key) {
                self.dispatch(&poll, PollEvent::Abort);
            }
        }
    }

    fn require_active(&self, key: &PollKey) -> Result<Poll, ManagerError> {
        match self.find_poll(key) {
            Some(poll) if !poll.is_closed() => Ok(poll),
            Some(_) => Err(ManagerError::PollClosed(*key)),
            None if self.is_poll_closed(key) => Err(ManagerError::PollClosed(*key)),
            None => Err(ManagerError::UnknownPoll(*key)),
        }
    }

    fn send_nak(&self, key: &PollKey, to: &PeerId, reason: PollNak) {
        let message = LcapMessage::new(*key, self.local_peer().clone(), MessageBody::nak(reason));
        if let Err(e) = self.inner.env.services.transport.send(to, message) {
            tracing::warn!(poll = %key, peer = %to, error = %e, "failed to send nak");
        }
    }

    /// Apply one event and carry out what it produced.
    fn dispatch(&self, poll: &Poll, event: PollEvent) {
        let applied = poll.apply(&self.inner.env, event);
        if applied.closed {
            self.retire(poll);
        }
        self.perform(poll, applied.actions);
        poll.publish();
    }

    fn dispatch_to_key(&self, key: &PollKey, event: PollEvent) {
        match self.find_poll(key) {
            Some(poll) => self.dispatch(&poll, event),
            None => tracing::debug!(poll = %key, "event for retired poll dropped"),
        }
    }

    fn retire(&self, poll: &Poll) {
        let key = poll.key();
        let expires = Instant::now() + self.inner.env.config().recent_poll_expiration();
        let mut registry = self.registry();
        if registry.current.remove(&key).is_some() {
            registry.recent.insert(key, (poll.clone(), expires));
        }
    }

    fn perform(&self, poll: &Poll, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, body } => {
                    let message = LcapMessage::new(poll.key(), self.local_peer().clone(), body);
                    let opcode = message.opcode();
                    match self.inner.env.services.transport.send(&to, message) {
                        Ok(()) => tracing::debug!(poll = %poll.key(), peer = %to, %opcode, "sent"),
                        Err(e) => {
                            tracing::warn!(poll = %poll.key(), peer = %to, %opcode, error = %e, "send failed")
                        }
                    }
                }
                Action::Run { op, job } => self.spawn_job(poll, op, job),
            }
        }
    }

    fn spawn_job(&self, poll: &Poll, op: OpId, job: Job) {
        let manager = self.clone();
        let poll = poll.clone();
        self.inner.runtime.spawn(async move {
            let name = job.name();
            let env = manager.inner.env.clone();
            let (key, spec, au) = (poll.key(), poll.spec().clone(), poll.archival_unit().clone());
            let result = tokio::task::spawn_blocking(move || job.run(&env, &key, &spec, &au))
                .await
                .unwrap_or_else(|e| {
                    Err(PollError::EffortComputation(format!("{name} did not complete: {e}")))
                });
            tracing::trace!(poll = %poll.key(), op, job = name, ok = result.is_ok(), "job finished");
            manager.dispatch(&poll, PollEvent::JobDone { op, result });
        });
    }

    fn arm_deadline(&self, poll: &Poll) {
        let inner = Arc::downgrade(&self.inner);
        let key = poll.key();
        poll.arm_deadlines(&self.inner.runtime, move |event| {
            if let Some(inner) = inner.upgrade() {
                PollManager { inner }.dispatch_to_key(&key, event);
            }
        });
    }
}
