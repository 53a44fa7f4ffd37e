//! Identity manager trait.

use lcap_types::{AuId, PeerId};

use crate::IdentityError;

/// Access to peer identities, the trust list and per-AU reputation.
///
/// Implementations must be safe for concurrent use from many polls.
pub trait IdentityManager: Send + Sync {
    /// The identity this node polls and votes as.
    fn local_peer(&self) -> &PeerId;

    /// Map an identity key string to a peer identity.
    fn find_peer(&self, key: &str) -> Result<PeerId, IdentityError> {
        PeerId::parse(key).map_err(|_| IdentityError::InvalidKey(key.to_string()))
    }

    /// The best agreement ever recorded for `peer` on `au`, if any.
    fn reputation(&self, peer: &PeerId, au: &AuId) -> Option<f64>;

    /// Overwrite the reputation of `peer` on `au`.
    fn set_reputation(&self, peer: &PeerId, au: &AuId, value: f64) -> Result<(), IdentityError>;

    /// Record the agreement observed in one finished poll.
    fn record_agreement(&self, peer: &PeerId, au: &AuId, agreement: f64)
        -> Result<(), IdentityError>;

    /// Record the agreement a poller claimed for us in an evaluation
    /// receipt. Hints are kept apart from measured agreement and never
    /// count towards [`reputation`](Self::reputation).
    fn record_agreement_hint(&self, peer: &PeerId, au: &AuId, hint: f64)
        -> Result<(), IdentityError>;

    /// The most recent hint `peer` sent us for `au`.
    fn agreement_hint(&self, peer: &PeerId, au: &AuId) -> Option<f64>;

    /// Peers with a measured agreement above zero on `au`.
    fn agreeing_peers(&self, au: &AuId) -> Vec<PeerId>;

    fn signal_agreed(&self, peer: &PeerId, au: &AuId) -> Result<(), IdentityError> {
        self.record_agreement(peer, au, 1.0)
    }

    fn signal_disagreed(&self, peer: &PeerId, au: &AuId) -> Result<(), IdentityError> {
        self.record_agreement(peer, au, 0.0)
    }

    /// Whether the operator has marked `peer` as trusted.
    fn is_trusted(&self, peer: &PeerId) -> bool;
}
