//! The outbound message seam.

use lcap_messages::LcapMessage;
use lcap_types::PeerId;

use crate::TransportError;

/// Delivers protocol messages to peers.
///
/// `send` must not block: implementations queue the message and return.
/// Delivery is best-effort; a message accepted here may still be lost.
pub trait Transport: Send + Sync {
    fn send(&self, to: &PeerId, message: LcapMessage) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, to: &PeerId, message: LcapMessage) -> Result<(), TransportError> {
        (**self).send(to, message)
    }
}
