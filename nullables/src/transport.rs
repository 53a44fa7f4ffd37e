//! Nullable transport: record messages instead of sending them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use lcap_messages::LcapMessage;
use lcap_network::{Transport, TransportError};
use lcap_types::PeerId;

/// A transport that queues every sent message for the test to inspect.
#[derive(Default)]
pub struct NullTransport {
    sent: Mutex<VecDeque<(PeerId, LcapMessage)>>,
    notify: Notify,
    failing: AtomicBool,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail (nothing is recorded) until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Take the oldest recorded message, if any.
    pub fn pop_sent(&self) -> Option<(PeerId, LcapMessage)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for the next recorded message.
    pub async fn next_sent(&self) -> (PeerId, LcapMessage) {
        loop {
            let notified = self.notify.notified();
            if let Some(sent) = self.pop_sent() {
                return sent;
            }
            notified.await;
        }
    }

    pub fn sent_is_empty(&self) -> bool {
        self.sent_count() == 0
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Transport for NullTransport {
    fn send(&self, to: &PeerId, message: LcapMessage) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(format!("scripted failure to {to}")));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((to.clone(), message));
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_messages::{MessageBody, PollNak};
    use lcap_types::PollKey;

    fn message() -> LcapMessage {
        LcapMessage::new(
            PollKey::ZERO,
            PeerId::parse("me").unwrap(),
            MessageBody::nak(PollNak::Conflict),
        )
    }

    #[tokio::test]
    async fn records_in_order() {
        let transport = NullTransport::new();
        let a = PeerId::parse("a").unwrap();
        let b = PeerId::parse("b").unwrap();
        transport.send(&a, message()).unwrap();
        transport.send(&b, message()).unwrap();
        assert_eq!(transport.sent_count(), 2);
        assert_eq!(transport.next_sent().await.0, a);
        assert_eq!(transport.pop_sent().map(|(to, _)| to), Some(b));
        assert!(transport.sent_is_empty());
    }

    #[test]
    fn failing_send_records_nothing() {
        let transport = NullTransport::new();
        transport.set_failing(true);
        assert!(transport.send(&PeerId::parse("a").unwrap(), message()).is_err());
        assert!(transport.sent_is_empty());
    }
}
