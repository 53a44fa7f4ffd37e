//! In-process network connecting peers through bounded tokio channels.
//!
//! Each registered peer gets an inbox receiver. Sending pushes onto the
//! recipient's channel with `try_send`, so a slow peer drops messages instead
//! of stalling the sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use lcap_messages::LcapMessage;
use lcap_types::PeerId;

use crate::{Transport, TransportError};

/// Default per-peer inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// A shared in-process message hub.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    inboxes: RwLock<HashMap<PeerId, mpsc::Sender<LcapMessage>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer and return the receiving end of its inbox.
    ///
    /// Registering an already-attached peer replaces its inbox.
    pub fn register(&self, peer: PeerId, capacity: usize) -> mpsc::Receiver<LcapMessage> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inner
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, tx);
        rx
    }

    /// Detach a peer; later sends to it fail with `PeerNotFound`.
    pub fn disconnect(&self, peer: &PeerId) {
        self.inner
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.inner
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(peer)
    }

    /// Number of messages handed to a recipient inbox.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Number of messages that could not be queued.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackNetwork {
    fn send(&self, to: &PeerId, message: LcapMessage) -> Result<(), TransportError> {
        let sender = self
            .inner
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned();

        let Some(sender) = sender else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::PeerNotFound(to.to_string()));
        };

        match sender.try_send(message) {
            Ok(()) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(peer = %to, "loopback message queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull(to.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Disconnected(to.to_string()))
            }
        }
    }
}
