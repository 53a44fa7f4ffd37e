mod common;

use std::time::Duration;

use common::*;
use lcap_crypto::random_nonce;
use lcap_effort::HASH_ALGORITHM;
use lcap_messages::{MessageBody, PollNak};
use lcap_poller::{ManagerError, PollRequest, PollState, PollerConfig, PollerState, VoterState};
use lcap_types::{PollKey, PollSpec, PollType, Verifier};

fn voter_request(spec: PollSpec, duration: Duration) -> PollRequest {
    PollRequest {
        spec,
        duration,
        challenge: random_nonce(),
        verifier: Verifier::new([3; 32]),
        originator: peer("poller"),
        hash_algorithm: HASH_ALGORITHM.into(),
    }
}

#[tokio::test]
async fn same_key_is_rejected() {
    let h = harness();
    let request = voter_request(spec(), HOUR);
    let poll = h.manager.make_poll(request.clone()).unwrap();
    assert_eq!(
        h.manager.make_poll(request).unwrap_err(),
        ManagerError::DuplicateKey(poll.key())
    );
    assert_eq!(h.manager.active_poll_count(), 1);
}

#[tokio::test]
async fn same_type_same_range_conflicts() {
    let h = harness();
    let first = h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();

    // Trailing slash is ignored when comparing roots.
    let same_root = PollSpec::content(au_id(), "http://example.org/journal");
    assert_eq!(
        h.manager.make_poll(voter_request(same_root, HOUR)).unwrap_err(),
        ManagerError::Conflict {
            existing: first.key()
        }
    );
    assert_eq!(h.manager.active_poll_count(), 1);
}

#[tokio::test]
async fn non_conflicting_polls_coexist() {
    let h = harness();
    h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();

    let other_type = spec().with_type(PollType::Name);
    h.manager.make_poll(voter_request(other_type, HOUR)).unwrap();

    let other_root = PollSpec::content(au_id(), "http://example.org/other/");
    h.manager.make_poll(voter_request(other_root, HOUR)).unwrap();

    assert_eq!(h.manager.active_poll_count(), 3);
    assert_eq!(h.manager.active_voters(), 3);
    assert_eq!(h.manager.active_pollers(), 0);
}

#[tokio::test]
async fn disjoint_subranges_do_not_conflict() {
    let h = harness();
    let low = spec().with_range(Some("a".into()), Some("m".into()));
    let high = spec().with_range(Some("n".into()), Some("z".into()));
    h.manager.make_poll(voter_request(low, HOUR)).unwrap();
    h.manager.make_poll(voter_request(high, HOUR)).unwrap();

    let overlapping = spec().with_range(Some("k".into()), Some("p".into()));
    assert!(matches!(
        h.manager.make_poll(voter_request(overlapping, HOUR)),
        Err(ManagerError::Conflict { .. })
    ));
}

#[tokio::test]
async fn local_originator_makes_a_poller() {
    let h = harness();
    let mut request = voter_request(spec(), HOUR);
    request.originator = h.manager.local_peer().clone();
    request.verifier = h.manager.make_verifier(HOUR);
    let poll = h.manager.make_poll(request).unwrap();
    assert_eq!(poll.role(), lcap_poller::Role::Poller);
    assert_eq!(poll.state(), PollState::Poller(PollerState::Initializing));
    assert!(h.manager.is_poll_active(&poll.key()));
}

#[tokio::test]
async fn poller_without_stored_secret_is_rejected() {
    let h = harness();
    let mut request = voter_request(spec(), HOUR);
    request.originator = h.manager.local_peer().clone();
    assert_eq!(
        h.manager.make_poll(request).unwrap_err(),
        ManagerError::UnknownVerifier
    );
}

#[tokio::test]
async fn verifier_opens_with_its_secret() {
    let h = harness();
    let verifier = h.manager.make_verifier(HOUR);
    let secret = h.manager.get_secret(&verifier).unwrap();
    assert!(lcap_crypto::verify_secret(&secret, &verifier));
    assert_eq!(h.manager.get_secret(&Verifier::new([0; 32])), None);
}

#[tokio::test]
async fn invitation_we_cannot_serve_is_naked() {
    let h = harness();
    let unknown_au = PollSpec::content(lcap_types::AuId::new("elsewhere").unwrap(), "http://x/");
    let inv = invitation(&unknown_au, &peer("poller"), HOUR);
    assert!(matches!(
        h.manager.handle_incoming_message(inv.message),
        Err(ManagerError::NoSuchAu(_))
    ));
    let (to, nak) = h.transport.pop_sent().unwrap();
    assert_eq!(to, peer("poller"));
    assert_eq!(nak.poll_key(), &inv.key);
    assert!(matches!(
        nak.body,
        MessageBody::PollAck {
            nak: Some(PollNak::NoSuchAu),
            ..
        }
    ));
    assert_eq!(h.manager.active_poll_count(), 0);
}

#[tokio::test]
async fn conflicting_invitation_is_naked() {
    let h = harness();
    h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();
    let inv = invitation(&spec(), &peer("other-poller"), HOUR);
    assert!(h.manager.handle_incoming_message(inv.message).is_err());
    let (_, nak) = h.transport.pop_sent().unwrap();
    assert_eq!(nak.body, MessageBody::nak(PollNak::Conflict));
}

#[tokio::test]
async fn voter_cap_is_enforced() {
    let h = harness_with(PollerConfig {
        max_simultaneous_voters: 1,
        ..PollerConfig::default()
    });
    h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();
    let other = PollSpec::content(au_id(), "http://example.org/other/");
    let inv = invitation(&other, &peer("poller"), HOUR);
    assert_eq!(
        h.manager.handle_incoming_message(inv.message).unwrap_err(),
        ManagerError::TooManyVoters(1)
    );
    let (_, nak) = h.transport.pop_sent().unwrap();
    assert_eq!(nak.body, MessageBody::nak(PollNak::TooManyVoters));
}

#[tokio::test]
async fn unsupported_algorithm_and_version_are_naked() {
    let h = harness();
    let mut inv = invitation(&spec(), &peer("poller"), HOUR);
    if let MessageBody::Poll { hash_algorithm, .. } = &mut inv.message.body {
        *hash_algorithm = "MD5".into();
    }
    assert!(matches!(
        h.manager.handle_incoming_message(inv.message),
        Err(ManagerError::UnsupportedHashAlgorithm(_))
    ));
    let (_, nak) = h.transport.pop_sent().unwrap();
    assert_eq!(nak.body, MessageBody::nak(PollNak::UnsupportedHashAlgorithm));

    let mut inv = invitation(&spec(), &peer("poller"), HOUR);
    inv.message.header.protocol_version = 2;
    assert_eq!(
        h.manager.handle_incoming_message(inv.message).unwrap_err(),
        ManagerError::UnsupportedVersion(2)
    );
    let (_, nak) = h.transport.pop_sent().unwrap();
    assert_eq!(nak.body, MessageBody::nak(PollNak::UnsupportedVersion));
}

#[tokio::test]
async fn forged_key_is_rejected_without_reply() {
    let h = harness();
    let mut inv = invitation(&spec(), &peer("poller"), HOUR);
    inv.message.header.poll_key = PollKey::new([0x11; 32]);
    assert!(matches!(
        h.manager.handle_incoming_message(inv.message),
        Err(ManagerError::KeyMismatch { .. })
    ));
    assert!(h.transport.sent_is_empty());
    assert_eq!(h.manager.active_poll_count(), 0);
}

#[tokio::test]
async fn unknown_poll_message_is_dropped() {
    let h = harness();
    let key = PollKey::new([0x22; 32]);
    let vote_request = message(
        key,
        &peer("poller"),
        MessageBody::RepairReq {
            url: "http://x/".into(),
        },
    );
    assert_eq!(
        h.manager.handle_incoming_message(vote_request).unwrap_err(),
        ManagerError::UnknownPoll(key)
    );
    assert!(h.transport.sent_is_empty());
}

#[tokio::test(start_paused = true)]
async fn voter_without_invitation_expires_quietly() {
    let h = harness();
    let poll = h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();
    let padding = h.config.snapshot().receipt_padding();

    tokio::time::sleep(HOUR).await;
    assert!(h.manager.is_poll_active(&poll.key()));

    tokio::time::sleep(padding + Duration::from_secs(1)).await;
    let status = poll.status();
    assert!(status.closed);
    assert_eq!(status.error, None);
    assert_eq!(status.state, PollState::Voter(VoterState::Finalizing));
    assert!(poll.tally().is_empty());
    assert!(!h.manager.is_poll_active(&poll.key()));
    assert!(h.manager.is_poll_closed(&poll.key()));
}

#[tokio::test(start_paused = true)]
async fn closed_key_cannot_be_reused_until_expiry() {
    let h = harness();
    let request = voter_request(spec(), HOUR);
    let poll = h.manager.make_poll(request.clone()).unwrap();
    h.manager.remove_poll(&poll.key());
    assert!(poll.is_closed());

    let poll = h.manager.make_poll(request.clone()).unwrap();
    tokio::time::sleep(HOUR * 2).await;
    assert!(poll.is_closed());
    assert_eq!(
        h.manager.make_poll(request.clone()).unwrap_err(),
        ManagerError::DuplicateKey(poll.key())
    );

    tokio::time::sleep(h.config.snapshot().recent_poll_expiration()).await;
    assert!(!h.manager.is_poll_closed(&poll.key()));
    assert!(h.manager.make_poll(request).is_ok());
}

#[tokio::test(start_paused = true)]
async fn suspend_freezes_the_deadline() {
    let h = harness();
    let poll = h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();
    let total = HOUR + h.config.snapshot().receipt_padding();

    tokio::time::sleep(HOUR / 2).await;
    h.manager.suspend_poll(&poll.key()).unwrap();
    assert!(h.manager.is_poll_suspended(&poll.key()));
    assert!(poll.status().suspended);

    tokio::time::sleep(HOUR * 24).await;
    assert!(!poll.is_closed());
    assert_eq!(poll.deadline_remaining(), total - HOUR / 2);

    h.manager.resume_poll(&poll.key()).unwrap();
    assert!(!h.manager.is_poll_suspended(&poll.key()));
    tokio::time::sleep(total - HOUR / 2 - Duration::from_secs(1)).await;
    assert!(!poll.is_closed());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(poll.is_closed());
    assert!(!poll.is_error_state());
}

#[tokio::test]
async fn messages_during_suspension_are_replayed_on_resume() {
    let h = harness();
    let inv = invitation(&spec(), &peer("poller"), HOUR);
    let request = PollRequest {
        spec: spec(),
        duration: HOUR,
        challenge: inv.poller_nonce,
        verifier: inv.verifier,
        originator: inv.poller.clone(),
        hash_algorithm: HASH_ALGORITHM.into(),
    };
    let poll = h.manager.make_poll(request).unwrap();
    assert_eq!(poll.key(), inv.key);

    h.manager.suspend_poll(&inv.key).unwrap();
    h.manager.handle_incoming_message(inv.message).unwrap();
    tokio::task::yield_now().await;
    assert_eq!(poll.state(), PollState::Voter(VoterState::Initializing));
    assert!(h.transport.sent_is_empty());

    h.manager.resume_poll(&inv.key).unwrap();
    let (_, ack) = h.transport.next_sent().await;
    assert!(matches!(ack.body, MessageBody::PollAck { nak: None, .. }));
}

#[tokio::test]
async fn suspend_unknown_or_closed_poll_fails() {
    let h = harness();
    let key = PollKey::new([5; 32]);
    assert_eq!(
        h.manager.suspend_poll(&key).unwrap_err(),
        ManagerError::UnknownPoll(key)
    );

    let poll = h.manager.make_poll(voter_request(spec(), HOUR)).unwrap();
    h.manager.shutdown();
    assert!(poll.is_closed());
    assert_eq!(
        h.manager.resume_poll(&poll.key()).unwrap_err(),
        ManagerError::PollClosed(poll.key())
    );
    assert_eq!(h.manager.active_poll_count(), 0);
}

#[test]
fn manager_outside_runtime_fails() {
    let services = lcap_poller::PollServices {
        identity: std::sync::Arc::new(lcap_identity::MemoryIdentityManager::new(peer("me"))),
        effort: std::sync::Arc::new(lcap_nullables::NullEffortService::new()),
        hasher: std::sync::Arc::new(lcap_nullables::NullHashService::default()),
        content: std::sync::Arc::new(lcap_nullables::NullContent::new()),
        transport: std::sync::Arc::new(lcap_nullables::NullTransport::new()),
        config: lcap_poller::ConfigHandle::default(),
    };
    assert!(matches!(
        lcap_poller::PollManager::new(services),
        Err(ManagerError::NoRuntime)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conflicting_polls_admit_exactly_one() {
    const CALLERS: usize = 64;
    let h = harness();
    let start = std::sync::Arc::new(std::sync::Barrier::new(CALLERS));

    let mut calls = Vec::with_capacity(CALLERS);
    for i in 0..CALLERS {
        let manager = h.manager.clone();
        let start = start.clone();
        // Alternate spellings of the same root.
        let root = if i % 2 == 0 {
            "http://example.org/journal/"
        } else {
            "http://example.org/journal"
        };
        let request = voter_request(PollSpec::content(au_id(), root), HOUR);
        calls.push(tokio::task::spawn_blocking(move || {
            start.wait();
            manager.make_poll(request)
        }));
    }

    let mut admitted = Vec::new();
    let mut refused = Vec::new();
    for call in calls {
        match call.await.unwrap() {
            Ok(poll) => admitted.push(poll),
            Err(e) => refused.push(e),
        }
    }
    assert_eq!(admitted.len(), 1);
    let winner = admitted[0].key();
    assert_eq!(refused.len(), CALLERS - 1);
    assert!(refused
        .iter()
        .all(|e| *e == ManagerError::Conflict { existing: winner }));
    assert_eq!(h.manager.active_poll_count(), 1);
    assert_eq!(h.manager.active_voters(), 1);
}
