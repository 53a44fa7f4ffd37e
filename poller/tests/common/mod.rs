#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lcap_crypto::{make_verifier, poll_key, random_nonce, random_secret};
use lcap_effort::HASH_ALGORITHM;
use lcap_identity::MemoryIdentityManager;
use lcap_messages::{LcapMessage, MessageBody};
use lcap_nullables::{NullContent, NullEffortService, NullHashService, NullTransport};
use lcap_poller::{ConfigHandle, PollManager, PollServices, PollerConfig};
use lcap_types::{
    AccessType, ArchivalUnit, AuId, EffortProof, Nonce, PeerId, PollKey, PollSpec, Secret,
    Verifier,
};

pub const HOUR: Duration = Duration::from_secs(3_600);

pub fn peer(name: &str) -> PeerId {
    PeerId::parse(name).unwrap()
}

pub fn au_id() -> AuId {
    AuId::new("org.example.au.1").unwrap()
}

pub fn spec() -> PollSpec {
    PollSpec::content(au_id(), "http://example.org/journal/")
}

/// One node wired to null collaborators.
pub struct Harness {
    pub manager: PollManager,
    pub transport: Arc<NullTransport>,
    pub effort: Arc<NullEffortService>,
    pub hasher: Arc<NullHashService>,
    pub identity: Arc<MemoryIdentityManager>,
    pub content: Arc<NullContent>,
    pub config: ConfigHandle,
}

pub fn harness() -> Harness {
    harness_with(PollerConfig::default())
}

/// Must be called from within a tokio runtime.
pub fn harness_with(config: PollerConfig) -> Harness {
    let transport = Arc::new(NullTransport::new());
    let effort = Arc::new(NullEffortService::new());
    let hasher = Arc::new(NullHashService::default());
    let identity = Arc::new(MemoryIdentityManager::new(peer("local")));
    let content = Arc::new(
        NullContent::new().with_au(ArchivalUnit::new(au_id(), AccessType::Subscription)),
    );
    let config = ConfigHandle::new(config).unwrap();
    let manager = PollManager::new(PollServices {
        identity: identity.clone(),
        effort: effort.clone(),
        hasher: hasher.clone(),
        content: content.clone(),
        transport: transport.clone(),
        config: config.clone(),
    })
    .unwrap();
    Harness {
        manager,
        transport,
        effort,
        hasher,
        identity,
        content,
        config,
    }
}

/// An invitation from a remote poller, with the secret behind its verifier.
pub struct Invitation {
    pub key: PollKey,
    pub poller: PeerId,
    pub poller_nonce: Nonce,
    pub verifier: Verifier,
    pub secret: Secret,
    pub message: LcapMessage,
}

pub fn invitation(spec: &PollSpec, poller: &PeerId, duration: Duration) -> Invitation {
    let poller_nonce = random_nonce();
    let secret = random_secret();
    let verifier = make_verifier(&secret);
    let key = poll_key(&poller_nonce, spec);
    let message = LcapMessage::new(
        key,
        poller.clone(),
        MessageBody::Poll {
            spec: spec.clone(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap(),
            poller_nonce,
            verifier,
            effort_proof: EffortProof::new(vec![1, 2, 3]),
            hash_algorithm: HASH_ALGORITHM.into(),
        },
    );
    Invitation {
        key,
        poller: poller.clone(),
        poller_nonce,
        verifier,
        secret,
        message,
    }
}

pub fn message(key: PollKey, from: &PeerId, body: MessageBody) -> LcapMessage {
    LcapMessage::new(key, from.clone(), body)
}
