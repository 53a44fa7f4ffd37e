//! Poll duration and construction of the role-correct poll.

use std::sync::Arc;
use std::time::Duration;

use lcap_effort::{ContentSource, HashService};
use lcap_types::{ArchivalUnit, PollKey, PollSpec, V3_PROTOCOL};

use crate::manager::PollRequest;
use crate::poll::{Poll, PollCommon, RoleMachine};
use crate::poller::PollerMachine;
use crate::voter::VoterMachine;
use crate::{ConfigHandle, ManagerError, PollServices, PollTally, Role, VerifierStore};

pub struct PollFactory {
    config: ConfigHandle,
    hasher: Arc<dyn HashService>,
    content: Arc<dyn ContentSource>,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl PollFactory {
    pub fn new(services: &PollServices) -> Self {
        Self {
            config: services.config.clone(),
            hasher: Arc::clone(&services.hasher),
            content: Arc::clone(&services.content),
        }
    }

    /// How long a poll over `spec` should run.
    ///
    /// Voters get `vote_duration_multiplier` hash times plus padding to vote
    /// and the poller gets `tally_duration_multiplier` hash times plus padding
    /// to tally, clamped to the configured bounds.
    pub fn calculate_duration(&self, spec: &PollSpec) -> Result<Duration, ManagerError> {
        let config = self.config.snapshot();
        let hash = self.hasher.estimate_hash_duration(spec)?;
        let max = config.max_poll_duration();
        if hash > max {
            return Err(ManagerError::Unschedulable {
                estimate_ms: millis(hash),
                budget_ms: millis(max),
            });
        }
        let vote = hash.saturating_mul(config.vote_duration_multiplier) + config.vote_duration_padding();
        let tally =
            hash.saturating_mul(config.tally_duration_multiplier) + config.tally_duration_padding();
        Ok((vote + tally).clamp(config.min_poll_duration(), max))
    }

    /// How far into a poll of `duration` over `spec` the poller stops
    /// waiting for votes.
    ///
    /// The poll is split between voting and tallying in the same proportion
    /// as [`calculate_duration`](Self::calculate_duration) adds them up, so a
    /// clamped poll scales both shares alike.
    pub fn calculate_vote_deadline(
        &self,
        spec: &PollSpec,
        duration: Duration,
    ) -> Result<Duration, ManagerError> {
        let config = self.config.snapshot();
        let hash = self.hasher.estimate_hash_duration(spec)?;
        let vote = hash.saturating_mul(config.vote_duration_multiplier) + config.vote_duration_padding();
        let tally =
            hash.saturating_mul(config.tally_duration_multiplier) + config.tally_duration_padding();
        let total = vote.as_millis() + tally.as_millis();
        if total == 0 {
            return Ok(duration);
        }
        let share = duration.as_millis().saturating_mul(vote.as_millis()) / total;
        Ok(Duration::from_millis(u64::try_from(share).unwrap_or(u64::MAX)))
    }

    /// Check that this node can take part in `request`, returning the AU.
    pub fn check_request(&self, request: &PollRequest) -> Result<ArchivalUnit, ManagerError> {
        let config = self.config.snapshot();
        if request.spec.protocol_version != V3_PROTOCOL {
            return Err(ManagerError::UnsupportedVersion(request.spec.protocol_version));
        }
        if !self.hasher.supports_algorithm(&request.hash_algorithm) {
            return Err(ManagerError::UnsupportedHashAlgorithm(
                request.hash_algorithm.clone(),
            ));
        }
        let au = self
            .content
            .find_au(&request.spec.au_id)
            .ok_or_else(|| ManagerError::NoSuchAu(request.spec.au_id.to_string()))?;
        let max = config.max_poll_duration();
        if request.duration > max {
            return Err(ManagerError::Unschedulable {
                estimate_ms: millis(request.duration),
                budget_ms: millis(max),
            });
        }
        let estimate = self.hasher.estimate_hash_duration(&request.spec)?;
        if estimate > request.duration {
            return Err(ManagerError::Unschedulable {
                estimate_ms: millis(estimate),
                budget_ms: millis(request.duration),
            });
        }
        Ok(au)
    }

    /// Build the poll for `request` in `role`. Nothing is registered here.
    pub(crate) fn create(
        &self,
        key: PollKey,
        request: &PollRequest,
        role: Role,
        verifiers: &VerifierStore,
    ) -> Result<Poll, ManagerError> {
        let au = self.check_request(request)?;
        let config = self.config.snapshot();
        let tally = PollTally::new(
            config.agreement_weighting,
            config.quorum,
            config.vote_margin,
        );
        let common = PollCommon::new(key, request.spec.clone(), au, tally);

        let poll = match role {
            Role::Voter => Poll::new(
                common,
                RoleMachine::Voter(VoterMachine::new(
                    request.originator.clone(),
                    request.challenge,
                    request.verifier,
                )),
                request.duration + config.receipt_padding(),
                None,
            ),
            Role::Poller => {
                let secret = verifiers
                    .get_secret(&request.verifier)
                    .ok_or(ManagerError::UnknownVerifier)?;
                let vote_deadline = self.calculate_vote_deadline(&request.spec, request.duration)?;
                Poll::new(
                    common,
                    RoleMachine::Poller(PollerMachine::new(
                        request.challenge,
                        request.verifier,
                        secret,
                        request.duration,
                        request.hash_algorithm.clone(),
                    )),
                    request.duration,
                    Some(vote_deadline),
                )
            }
        };
        tracing::debug!(poll = %key, %role, duration = ?request.duration, "poll created");
        Ok(poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_effort::MemoryContent;
    use lcap_identity::MemoryIdentityManager;
    use lcap_nullables::{NullEffortService, NullHashService, NullTransport};
    use lcap_types::{AccessType, AuId, Nonce, PeerId, Verifier};

    use crate::PollerConfig;

    const MIN: Duration = Duration::from_secs(60);

    fn factory(estimate: Duration) -> PollFactory {
        let content = MemoryContent::new();
        content.add_au(ArchivalUnit::new(au_id(), AccessType::Subscription));
        let config = PollerConfig {
            min_poll_duration_ms: 60_000,
            max_poll_duration_ms: 3_600_000,
            vote_duration_multiplier: 2,
            tally_duration_multiplier: 3,
            vote_duration_padding_ms: 1_000,
            tally_duration_padding_ms: 2_000,
            ..PollerConfig::default()
        };
        let services = PollServices {
            identity: Arc::new(MemoryIdentityManager::new(PeerId::parse("me").unwrap())),
            effort: Arc::new(NullEffortService::new()),
            hasher: Arc::new(NullHashService::new(estimate)),
            content: Arc::new(content),
            transport: Arc::new(NullTransport::new()),
            config: ConfigHandle::new(config).unwrap(),
        };
        PollFactory::new(&services)
    }

    fn au_id() -> AuId {
        AuId::new("au").unwrap()
    }

    fn request(duration: Duration) -> PollRequest {
        PollRequest {
            spec: PollSpec::content(au_id(), "http://x/"),
            duration,
            challenge: Nonce::new([1; 32]),
            verifier: Verifier::new([2; 32]),
            originator: PeerId::parse("poller").unwrap(),
            hash_algorithm: lcap_effort::HASH_ALGORITHM.into(),
        }
    }

    #[test]
    fn duration_combines_vote_and_tally_time() {
        let f = factory(Duration::from_secs(100));
        // 2 * 100s + 1s + 3 * 100s + 2s
        assert_eq!(
            f.calculate_duration(&request(MIN).spec).unwrap(),
            Duration::from_secs(503)
        );
    }

    #[test]
    fn duration_clamped_to_bounds() {
        let f = factory(Duration::from_millis(1));
        assert_eq!(f.calculate_duration(&request(MIN).spec).unwrap(), MIN);

        let f = factory(Duration::from_secs(1_000));
        assert_eq!(
            f.calculate_duration(&request(MIN).spec).unwrap(),
            Duration::from_secs(3_600)
        );
    }

    #[test]
    fn vote_deadline_leaves_room_to_tally() {
        let f = factory(Duration::from_secs(100));
        let spec = request(MIN).spec;
        // 2 * 100s + 1s of the 503s poll is for voting.
        assert_eq!(
            f.calculate_vote_deadline(&spec, Duration::from_secs(503)).unwrap(),
            Duration::from_secs(201)
        );
        assert_eq!(
            f.calculate_vote_deadline(&spec, MIN).unwrap(),
            Duration::from_millis(60_000 * 201_000 / 503_000)
        );
    }

    #[test]
    fn hash_longer_than_max_is_unschedulable() {
        let f = factory(Duration::from_secs(7_200));
        assert!(matches!(
            f.calculate_duration(&request(MIN).spec),
            Err(ManagerError::Unschedulable { .. })
        ));
    }

    #[test]
    fn request_checks() {
        let f = factory(Duration::from_secs(10));
        assert!(f.check_request(&request(MIN)).is_ok());

        let mut r = request(MIN);
        r.spec.protocol_version = 2;
        assert_eq!(f.check_request(&r), Err(ManagerError::UnsupportedVersion(2)));

        let mut r = request(MIN);
        r.hash_algorithm = "MD5".into();
        assert!(matches!(
            f.check_request(&r),
            Err(ManagerError::UnsupportedHashAlgorithm(_))
        ));

        let mut r = request(MIN);
        r.spec = PollSpec::content(AuId::new("other").unwrap(), "http://x/");
        assert!(matches!(f.check_request(&r), Err(ManagerError::NoSuchAu(_))));

        assert!(matches!(
            f.check_request(&request(Duration::from_secs(5))),
            Err(ManagerError::Unschedulable { .. })
        ));
    }

    #[test]
    fn poller_needs_a_stored_secret() {
        let f = factory(Duration::from_secs(10));
        let store = VerifierStore::new();
        let key = PollKey::new([9; 32]);
        assert!(matches!(
            f.create(key, &request(MIN), Role::Poller, &store),
            Err(ManagerError::UnknownVerifier)
        ));
    }
}
