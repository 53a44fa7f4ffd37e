//! A polling node: one peer identity, its content, and a poll manager wired
//! to a transport.
//!
//! The node owns the receiving end of its inbox. [`LcapNode::start`] spawns
//! the inbound loop that feeds every message to the poll manager, plus a
//! task that keeps the active-polls gauge current. Both stop on
//! [`LcapNode::stop`] or when the shutdown controller fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use lcap_effort::{ContentHasher, HashcashEffort, MemoryContent};
use lcap_identity::MemoryIdentityManager;
use lcap_messages::{LcapMessage, Opcode};
use lcap_network::LoopbackNetwork;
use lcap_poller::{ConfigHandle, Poll, PollManager, PollServices, Role};
use lcap_types::{PeerId, PollSpec};

use crate::{NodeConfig, NodeError, PollerMetrics, ShutdownController};

/// Lower bound on the hash time estimate for any poll.
const MIN_HASH_ESTIMATE: Duration = Duration::from_millis(10);
/// How often the active-polls gauge is refreshed.
const GAUGE_INTERVAL: Duration = Duration::from_secs(5);

/// A running polling node.
pub struct LcapNode {
    pub config: NodeConfig,
    id: PeerId,
    network: LoopbackNetwork,
    identity: Arc<MemoryIdentityManager>,
    content: Arc<MemoryContent>,
    manager: PollManager,
    metrics: Option<Arc<PollerMetrics>>,
    shutdown: ShutdownController,
    /// Handles for spawned background tasks (joined during stop).
    task_handles: Vec<JoinHandle<()>>,
}

impl LcapNode {
    /// Build a node attached to `network`.
    ///
    /// Must be called from within a tokio runtime. Call [`start`](Self::start)
    /// to begin receiving messages.
    pub fn new(config: NodeConfig, network: LoopbackNetwork) -> Result<Self, NodeError> {
        config.validate()?;
        let id = config.peer()?;

        let identity = Arc::new(MemoryIdentityManager::new(id.clone()));
        for peer in config.trusted()? {
            identity.trust(peer);
        }
        let content = Arc::new(MemoryContent::new());
        let hasher = ContentHasher::new(content.clone())
            .with_rate(config.hash_bytes_per_ms, MIN_HASH_ESTIMATE);

        let manager = PollManager::new(PollServices {
            identity: identity.clone(),
            effort: Arc::new(HashcashEffort::new(config.effort_difficulty())),
            hasher: Arc::new(hasher),
            content: content.clone(),
            transport: Arc::new(network.clone()),
            config: ConfigHandle::new(config.poller.clone())?,
        })?;

        let metrics = if config.enable_metrics {
            Some(Arc::new(PollerMetrics::new()?))
        } else {
            None
        };

        tracing::info!(peer = %id, metrics = config.enable_metrics, "node created");
        Ok(Self {
            config,
            id,
            network,
            identity,
            content,
            manager,
            metrics,
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn manager(&self) -> &PollManager {
        &self.manager
    }

    pub fn identity(&self) -> &Arc<MemoryIdentityManager> {
        &self.identity
    }

    /// The content this node preserves. Add AUs and files here.
    pub fn content(&self) -> &Arc<MemoryContent> {
        &self.content
    }

    pub fn metrics(&self) -> Option<&Arc<PollerMetrics>> {
        self.metrics.as_ref()
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn is_running(&self) -> bool {
        !self.task_handles.is_empty()
    }

    /// Register with the network and spawn the inbound loop.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.is_running() {
            return Err(NodeError::AlreadyRunning);
        }
        if self.shutdown.is_triggered() {
            // Restarted after a stop.
            self.shutdown = ShutdownController::new();
        }
        let mut inbox = self.network.register(self.id.clone(), self.config.inbox_capacity);

        let manager = self.manager.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        let inbound_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => {
                        tracing::info!("inbound loop shutting down");
                        break;
                    }
                    message = inbox.recv() => {
                        let Some(message) = message else {
                            tracing::info!("inbox closed");
                            break;
                        };
                        handle_inbound(&manager, metrics.as_ref(), &shutdown, message);
                    }
                }
            }
        });
        self.task_handles.push(inbound_handle);

        if let Some(metrics) = self.metrics.clone() {
            let manager = self.manager.clone();
            let shutdown = self.shutdown.clone();
            let gauge_handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(GAUGE_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.triggered() => break,
                        _ = interval.tick() => metrics.set_active_polls(manager.active_poll_count()),
                    }
                }
            });
            self.task_handles.push(gauge_handle);
        }

        tracing::info!(peer = %self.id, "node started");
        Ok(())
    }

    /// Close every poll, detach from the network and join the background tasks.
    pub async fn stop(&mut self) {
        tracing::info!(peer = %self.id, "node stopping");
        self.shutdown.trigger();
        self.manager.shutdown();
        self.network.disconnect(&self.id);

        for handle in self.task_handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task failed");
            }
        }
        tracing::info!(peer = %self.id, "node stopped");
    }

    /// Call a poll over `spec`, inviting `peers`.
    pub fn call_poll(&self, spec: PollSpec, peers: Vec<PeerId>) -> Result<Poll, NodeError> {
        let poll = self.manager.call_poll(spec, peers)?;
        if let Some(metrics) = &self.metrics {
            watch_poll(&self.manager, metrics, &self.shutdown, poll.clone());
        }
        Ok(poll)
    }
}

fn handle_inbound(
    manager: &PollManager,
    metrics: Option<&Arc<PollerMetrics>>,
    shutdown: &ShutdownController,
    message: LcapMessage,
) {
    let key = *message.poll_key();
    let opcode = message.opcode();
    let invitation = opcode == Opcode::Poll && !manager.is_poll_active(&key);
    if let Some(metrics) = metrics {
        let label = opcode.to_string();
        metrics.messages_received.with_label_values(&[label.as_str()]).inc();
    }

    if let Err(e) = manager.handle_incoming_message(message) {
        tracing::debug!(poll = %key, %opcode, error = %e, "inbound message refused");
        if let Some(metrics) = metrics {
            metrics.messages_rejected.inc();
        }
        return;
    }

    if invitation {
        if let (Some(metrics), Some(poll)) = (metrics, manager.find_poll(&key)) {
            if poll.role() == Role::Voter {
                watch_poll(manager, metrics, shutdown, poll);
            }
        }
    }
}

/// Count `poll` as created and record its outcome once it closes.
fn watch_poll(
    manager: &PollManager,
    metrics: &Arc<PollerMetrics>,
    shutdown: &ShutdownController,
    poll: Poll,
) {
    metrics.poll_created(poll.role());
    metrics.set_active_polls(manager.active_poll_count());

    let manager = manager.clone();
    let metrics = Arc::clone(metrics);
    let shutdown = shutdown.clone();
    let started = Instant::now();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.triggered() => {}
            _ = poll.closed() => {
                metrics.poll_closed(&poll, started.elapsed());
                metrics.set_active_polls(manager.active_poll_count());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> NodeConfig {
        NodeConfig {
            peer_id: name.to_string(),
            effort_bits: 0,
            enable_metrics: true,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn new_requires_a_runtime() {
        let result = LcapNode::new(config("alpha"), LoopbackNetwork::new());
        assert!(matches!(
            result,
            Err(NodeError::Manager(lcap_poller::ManagerError::NoRuntime))
        ));
    }

    #[tokio::test]
    async fn invalid_peer_id_is_rejected() {
        let result = LcapNode::new(config("two words"), LoopbackNetwork::new());
        assert!(matches!(result, Err(NodeError::Types(_))));
    }

    #[tokio::test]
    async fn start_registers_and_stop_detaches() {
        let net = LoopbackNetwork::new();
        let mut node = LcapNode::new(config("alpha"), net.clone()).unwrap();
        assert!(!net.is_registered(node.id()));

        node.start().unwrap();
        assert!(net.is_registered(node.id()));
        assert!(matches!(node.start(), Err(NodeError::AlreadyRunning)));

        node.stop().await;
        assert!(!net.is_registered(node.id()));
        assert!(!node.is_running());
        assert!(node.shutdown_controller().is_triggered());
    }

    #[tokio::test]
    async fn trusted_peers_come_from_config() {
        use lcap_identity::IdentityManager;

        let mut cfg = config("alpha");
        cfg.trusted_peers = vec!["beta".into()];
        let node = LcapNode::new(cfg, LoopbackNetwork::new()).unwrap();
        assert!(node.identity().is_trusted(&PeerId::parse("beta").unwrap()));
        assert!(!node.identity().is_trusted(&PeerId::parse("gamma").unwrap()));
    }
}
