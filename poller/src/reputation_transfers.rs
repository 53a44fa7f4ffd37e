//! Reputation inherited across peer identities.
//!
//! An operator whose peer changes identity (new address, new key) can carry
//! the old identity's standing over with a `source,destination` entry. Entries
//! chain: with `A,B;B,C`, C inherits from B, which inherits from A.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use lcap_identity::IdentityManager;
use lcap_types::{AuId, PeerId};

use crate::{ConfigHandle, TransferMapError};

/// Longest permitted inheritance chain, in hops.
pub const MAX_TRANSFER_CHAIN: usize = 10;

/// A validated transfer mapping: every destination has exactly one source,
/// every source feeds exactly one destination, and chains are acyclic and at
/// most [`MAX_TRANSFER_CHAIN`] hops long.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferMap {
    /// destination -> source
    sources: HashMap<PeerId, PeerId>,
}

impl TransferMap {
    pub fn parse(raw: &str) -> Result<Self, TransferMapError> {
        let mut sources: HashMap<PeerId, PeerId> = HashMap::new();
        let mut destinations: HashMap<PeerId, PeerId> = HashMap::new();

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
            let [source, destination] = parts.as_slice() else {
                return Err(TransferMapError::Malformed(entry.to_string()));
            };
            let source = PeerId::parse(source)
                .map_err(|_| TransferMapError::InvalidPeer(source.to_string()))?;
            let destination = PeerId::parse(destination)
                .map_err(|_| TransferMapError::InvalidPeer(destination.to_string()))?;

            if source == destination {
                return Err(TransferMapError::Cycle(source.to_string()));
            }
            match sources.get(&destination) {
                Some(existing) if *existing == source => continue,
                Some(_) => return Err(TransferMapError::MultipleSources(destination.to_string())),
                None => {}
            }
            if destinations.contains_key(&source) {
                return Err(TransferMapError::MultipleDestinations(source.to_string()));
            }
            destinations.insert(source.clone(), destination.clone());
            sources.insert(destination, source);
        }

        let map = Self { sources };
        for peer in map.sources.keys() {
            map.walk(peer)?;
        }
        Ok(map)
    }

    /// Follow the chain from `peer`, failing on cycles and overlong chains.
    fn walk(&self, peer: &PeerId) -> Result<Vec<PeerId>, TransferMapError> {
        let mut chain = vec![peer.clone()];
        let mut current = peer;
        while let Some(source) = self.sources.get(current) {
            if chain.contains(source) {
                return Err(TransferMapError::Cycle(source.to_string()));
            }
            if chain.len() > MAX_TRANSFER_CHAIN {
                return Err(TransferMapError::ChainTooLong {
                    peer: peer.to_string(),
                    max: MAX_TRANSFER_CHAIN,
                });
            }
            chain.push(source.clone());
            current = source;
        }
        Ok(chain)
    }

    pub fn transferred_from(&self, peer: &PeerId) -> Option<&PeerId> {
        self.sources.get(peer)
    }

    /// `[peer, source, source's source, ..., root]`, or `None` if `peer`
    /// inherits from nobody.
    pub fn chain(&self, peer: &PeerId) -> Option<Vec<PeerId>> {
        if !self.sources.contains_key(peer) {
            return None;
        }
        // Validated at parse time, so the walk cannot fail.
        self.walk(peer).ok()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Transfer lookups against the live configuration.
///
/// The parsed map is cached against the raw configuration string and
/// re-parsed when the configuration changes.
#[derive(Clone)]
pub struct ReputationTransfers {
    config: ConfigHandle,
    cache: Arc<Mutex<Option<(String, Arc<TransferMap>)>>>,
}

impl ReputationTransfers {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// The mapping in force right now.
    pub fn current_map(&self) -> Arc<TransferMap> {
        let snapshot = self.config.snapshot();
        let raw = &snapshot.reputation_transfer_map;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_raw, map)) = cache.as_ref() {
            if cached_raw == raw {
                return Arc::clone(map);
            }
        }
        let map = match TransferMap::parse(raw) {
            Ok(map) => Arc::new(map),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring invalid reputation transfer map");
                Arc::new(TransferMap::default())
            }
        };
        *cache = Some((raw.clone(), Arc::clone(&map)));
        map
    }

    pub fn reputation_transferred_from(&self, peer: &PeerId) -> Option<PeerId> {
        self.current_map().transferred_from(peer).cloned()
    }

    pub fn all_reputations_transferred_from(&self, peer: &PeerId) -> Option<Vec<PeerId>> {
        self.current_map().chain(peer)
    }

    /// The best reputation on `au` held by `peer` or anyone it inherits from.
    pub fn effective_reputation(
        &self,
        identity: &dyn IdentityManager,
        peer: &PeerId,
        au: &AuId,
    ) -> Option<f64> {
        let chain = self
            .all_reputations_transferred_from(peer)
            .unwrap_or_else(|| vec![peer.clone()]);
        chain
            .iter()
            .filter_map(|p| identity.reputation(p, au))
            .reduce(f64::max)
    }
}
