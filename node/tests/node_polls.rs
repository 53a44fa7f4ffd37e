use std::time::Duration;

use lcap_effort::ContentSource;
use lcap_identity::IdentityManager;
use lcap_network::LoopbackNetwork;
use lcap_node::{LcapNode, NodeConfig};
use lcap_poller::{PollerConfig, TallyResult};
use lcap_types::{AccessType, ArchivalUnit, AuId, PeerId, PollSpec};

const WAIT: Duration = Duration::from_secs(30);
const ROOT: &str = "http://example.org/journal/";

fn au_id() -> AuId {
    AuId::new("org.example.au.1").unwrap()
}

fn spec() -> PollSpec {
    PollSpec::content(au_id(), ROOT)
}

fn start_node(net: &LoopbackNetwork, name: &str, front_page: &[u8]) -> LcapNode {
    let config = NodeConfig {
        peer_id: name.to_string(),
        effort_bits: 4,
        enable_metrics: true,
        poller: PollerConfig {
            quorum: 2,
            ..PollerConfig::default()
        },
        ..NodeConfig::default()
    };
    let mut node = LcapNode::new(config, net.clone()).unwrap();
    let content = node.content();
    content.add_au(ArchivalUnit::new(au_id(), AccessType::Subscription));
    content.put(&au_id(), ROOT, front_page.to_vec()).unwrap();
    content
        .put(&au_id(), format!("{ROOT}issue-1.html"), b"issue one".to_vec())
        .unwrap();
    node.start().unwrap();
    node
}

async fn wait_for_voter_close(node: &LcapNode) {
    tokio::time::timeout(WAIT, async {
        while node.manager().active_voters() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("voter poll did not close in time");
}

fn peers(nodes: &[&LcapNode]) -> Vec<PeerId> {
    nodes.iter().map(|n| n.id().clone()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_nodes_agree_over_identical_content() {
    let net = LoopbackNetwork::new();
    let mut poller = start_node(&net, "alpha", b"front page");
    let mut v1 = start_node(&net, "beta", b"front page");
    let mut v2 = start_node(&net, "gamma", b"front page");

    let poll = poller.call_poll(spec(), peers(&[&v1, &v2])).unwrap();
    let status = tokio::time::timeout(WAIT, poll.closed()).await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(poll.tally().result(), TallyResult::Won);
    assert_eq!(poll.tally().vote_count(), 2);
    assert_eq!(
        poller.identity().reputation(v1.id(), &au_id()),
        Some(1.0)
    );

    for voter in [&v1, &v2] {
        wait_for_voter_close(voter).await;
        assert_eq!(
            voter.identity().agreement_hint(poller.id(), &au_id()),
            Some(1.0)
        );
        assert_eq!(voter.identity().reputation(poller.id(), &au_id()), None);
    }

    let metrics = poller.metrics().unwrap();
    tokio::time::timeout(WAIT, async {
        while metrics.polls_completed.get() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        metrics
            .polls_created
            .with_label_values(&["poller"])
            .get(),
        1
    );
    assert_eq!(metrics.votes_tallied.get(), 2);
    assert_eq!(
        v1.metrics()
            .unwrap()
            .polls_created
            .with_label_values(&["voter"])
            .get(),
        1
    );

    for node in [&mut poller, &mut v1, &mut v2] {
        node.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn damaged_poller_is_repaired_from_a_voter() {
    let net = LoopbackNetwork::new();
    let mut poller = start_node(&net, "alpha", b"front page, bit-rotted");
    let mut v1 = start_node(&net, "beta", b"front page");
    let mut v2 = start_node(&net, "gamma", b"front page");
    for voter in [&v1, &v2] {
        voter
            .identity()
            .set_reputation(poller.id(), &au_id(), 0.9)
            .unwrap();
    }

    let poll = poller.call_poll(spec(), peers(&[&v1, &v2])).unwrap();
    let status = tokio::time::timeout(WAIT, poll.closed()).await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(poll.tally().result(), TallyResult::Lost);
    assert_eq!(
        poller.content().content(&au_id(), ROOT).unwrap(),
        b"front page".to_vec()
    );

    for node in [&mut poller, &mut v1, &mut v2] {
        node.stop().await;
    }
}

#[tokio::test]
async fn stopping_aborts_open_polls() {
    let net = LoopbackNetwork::new();
    let mut poller = start_node(&net, "alpha", b"front page");
    // Invitee never started: the poll waits for its deadline.
    let absent = PeerId::parse("nobody").unwrap();

    let poll = poller.call_poll(spec(), vec![absent]).unwrap();
    assert!(!poll.is_closed());
    poller.stop().await;
    assert!(poll.is_closed());
    assert_eq!(poller.manager().active_poll_count(), 0);
}
