use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("peer {0} disconnected")]
    Disconnected(String),

    #[error("outbound queue for {0} is full")]
    QueueFull(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}
