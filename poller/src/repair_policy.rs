//! Whether to serve repair content to a requesting peer.

use std::sync::Arc;

use lcap_identity::IdentityManager;
use lcap_types::{ArchivalUnit, PeerId};

use crate::{ConfigHandle, ReputationTransfers};

/// Why a repair request was allowed or denied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RepairDecision {
    /// Repairs are switched off.
    Disabled,
    /// Open-access content is served to anyone.
    OpenAccess,
    /// The peer is on the trust list and trusted peers are served.
    TrustedPeer,
    /// The peer's reputation met the threshold.
    Reputation { score: f64, threshold: f64 },
    /// The peer's reputation (0 if unknown) fell short of the threshold.
    InsufficientReputation { score: f64, threshold: f64 },
}

impl RepairDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            RepairDecision::OpenAccess
                | RepairDecision::TrustedPeer
                | RepairDecision::Reputation { .. }
        )
    }
}

/// Repair eligibility, read against the live configuration on every call.
#[derive(Clone)]
pub struct RepairPolicy {
    config: ConfigHandle,
    identity: Arc<dyn IdentityManager>,
    transfers: ReputationTransfers,
}

impl RepairPolicy {
    pub fn new(
        config: ConfigHandle,
        identity: Arc<dyn IdentityManager>,
        transfers: ReputationTransfers,
    ) -> Self {
        Self {
            config,
            identity,
            transfers,
        }
    }

    pub fn decide(&self, peer: &PeerId, au: &ArchivalUnit) -> RepairDecision {
        let config = self.config.snapshot();
        if !config.enable_v3_repair {
            return RepairDecision::Disabled;
        }
        if au.is_open_access() && !config.open_access_repair_needs_agreement {
            return RepairDecision::OpenAccess;
        }
        if config.repair_any_trusted_peer && self.identity.is_trusted(peer) {
            return RepairDecision::TrustedPeer;
        }
        let threshold = config.min_percent_agreement_for_repairs;
        let score = self
            .transfers
            .effective_reputation(self.identity.as_ref(), peer, &au.id)
            .unwrap_or(0.0);
        if score >= threshold {
            RepairDecision::Reputation { score, threshold }
        } else {
            RepairDecision::InsufficientReputation { score, threshold }
        }
    }

    /// Whether `peer` may receive any repair from `au`.
    pub fn serve_au_repair(&self, peer: &PeerId, au: &ArchivalUnit) -> bool {
        self.decide(peer, au).is_allowed()
    }

    /// Whether `peer` may receive the repair of `url` in `au`.
    pub fn serve_repair(&self, peer: &PeerId, au: &ArchivalUnit, url: &str) -> bool {
        let decision = self.decide(peer, au);
        tracing::debug!(peer = %peer, au = %au.id, url, ?decision, "repair request evaluated");
        decision.is_allowed()
    }
}
