//! The collaborators a poll manager computes and communicates through.

use std::sync::Arc;

use lcap_effort::{ContentSource, EffortService, HashService};
use lcap_identity::IdentityManager;
use lcap_network::Transport;
use lcap_types::{AuId, PeerId};

use crate::{ConfigHandle, PollerConfig, RepairPolicy, ReputationTransfers};

/// External services handed to [`crate::PollManager::new`].
#[derive(Clone)]
pub struct PollServices {
    pub identity: Arc<dyn IdentityManager>,
    pub effort: Arc<dyn EffortService>,
    pub hasher: Arc<dyn HashService>,
    pub content: Arc<dyn ContentSource>,
    pub transport: Arc<dyn Transport>,
    pub config: ConfigHandle,
}

/// Services plus the policies derived from them, shared by every poll.
#[derive(Clone)]
pub(crate) struct PollEnv {
    pub(crate) services: PollServices,
    pub(crate) transfers: ReputationTransfers,
    pub(crate) repair_policy: RepairPolicy,
}

impl PollEnv {
    pub(crate) fn new(services: PollServices) -> Self {
        let transfers = ReputationTransfers::new(services.config.clone());
        let repair_policy = RepairPolicy::new(
            services.config.clone(),
            Arc::clone(&services.identity),
            transfers.clone(),
        );
        Self {
            services,
            transfers,
            repair_policy,
        }
    }

    pub(crate) fn local_peer(&self) -> &PeerId {
        self.services.identity.local_peer()
    }

    pub(crate) fn config(&self) -> Arc<PollerConfig> {
        self.services.config.snapshot()
    }

    /// Reputation used to weight `peer`'s vote, following transfers and
    /// falling back to the configured default for unknown peers.
    pub(crate) fn effective_reputation(&self, peer: &PeerId, au: &AuId) -> f64 {
        self.transfers
            .effective_reputation(self.services.identity.as_ref(), peer, au)
            .unwrap_or_else(|| self.config().default_reputation)
    }
}
