//! In-memory identity manager.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use lcap_types::{AuId, PeerId};

use crate::{IdentityError, IdentityManager};

/// Agreement history of one peer on one AU.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AgreementRecord {
    /// Agreement observed in the most recent poll.
    pub last: f64,
    /// Best agreement ever observed; this is what counts as reputation.
    pub highest: f64,
    /// Number of polls that contributed.
    pub polls: u64,
    /// Latest agreement the peer reported for us as a poller. Not reputation.
    pub hint: Option<f64>,
}

/// A thread-safe identity manager backed by hash maps.
pub struct MemoryIdentityManager {
    local: PeerId,
    records: RwLock<HashMap<(PeerId, AuId), AgreementRecord>>,
    trusted: RwLock<HashSet<PeerId>>,
}

impl MemoryIdentityManager {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            records: RwLock::new(HashMap::new()),
            trusted: RwLock::new(HashSet::new()),
        }
    }

    /// Add `peer` to the trust list.
    pub fn trust(&self, peer: PeerId) {
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
    }

    pub fn untrust(&self, peer: &PeerId) {
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }

    pub fn agreement_record(&self, peer: &PeerId, au: &AuId) -> Option<AgreementRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(peer.clone(), au.clone()))
            .copied()
    }
}

fn check_range(value: f64) -> Result<f64, IdentityError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(IdentityError::InvalidAgreement(value))
    }
}

impl IdentityManager for MemoryIdentityManager {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    fn reputation(&self, peer: &PeerId, au: &AuId) -> Option<f64> {
        self.agreement_record(peer, au).map(|r| r.highest)
    }

    fn set_reputation(&self, peer: &PeerId, au: &AuId, value: f64) -> Result<(), IdentityError> {
        let value = check_range(value)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry((peer.clone(), au.clone())).or_default();
        record.last = value;
        record.highest = value;
        Ok(())
    }

    fn record_agreement(
        &self,
        peer: &PeerId,
        au: &AuId,
        agreement: f64,
    ) -> Result<(), IdentityError> {
        let agreement = check_range(agreement)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry((peer.clone(), au.clone())).or_default();
        record.last = agreement;
        record.highest = record.highest.max(agreement);
        record.polls += 1;
        tracing::debug!(peer = %peer, au = %au, agreement, highest = record.highest, "agreement recorded");
        Ok(())
    }

    fn record_agreement_hint(
        &self,
        peer: &PeerId,
        au: &AuId,
        hint: f64,
    ) -> Result<(), IdentityError> {
        let hint = check_range(hint)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.entry((peer.clone(), au.clone())).or_default().hint = Some(hint);
        tracing::debug!(peer = %peer, au = %au, hint, "agreement hint recorded");
        Ok(())
    }

    fn agreement_hint(&self, peer: &PeerId, au: &AuId) -> Option<f64> {
        self.agreement_record(peer, au).and_then(|r| r.hint)
    }

    fn agreeing_peers(&self, au: &AuId) -> Vec<PeerId> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<PeerId> = records
            .iter()
            .filter(|((_, record_au), record)| record_au == au && record.highest > 0.0)
            .map(|((peer, _), _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    fn is_trusted(&self, peer: &PeerId) -> bool {
        self.trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::parse(name).unwrap()
    }

    fn au() -> AuId {
        AuId::new("au").unwrap()
    }

    #[test]
    fn unknown_peer_has_no_reputation() {
        let ids = MemoryIdentityManager::new(peer("me"));
        assert_eq!(ids.reputation(&peer("x"), &au()), None);
    }

    #[test]
    fn reputation_is_highest_agreement() {
        let ids = MemoryIdentityManager::new(peer("me"));
        ids.record_agreement(&peer("x"), &au(), 0.8).unwrap();
        ids.signal_disagreed(&peer("x"), &au()).unwrap();
        assert_eq!(ids.reputation(&peer("x"), &au()), Some(0.8));

        let record = ids.agreement_record(&peer("x"), &au()).unwrap();
        assert_eq!(record.last, 0.0);
        assert_eq!(record.polls, 2);
    }

    #[test]
    fn set_reputation_overwrites() {
        let ids = MemoryIdentityManager::new(peer("me"));
        ids.signal_agreed(&peer("x"), &au()).unwrap();
        ids.set_reputation(&peer("x"), &au(), 0.05).unwrap();
        assert_eq!(ids.reputation(&peer("x"), &au()), Some(0.05));
    }

    #[test]
    fn out_of_range_agreement_rejected() {
        let ids = MemoryIdentityManager::new(peer("me"));
        assert!(ids.record_agreement(&peer("x"), &au(), 1.5).is_err());
        assert!(ids.set_reputation(&peer("x"), &au(), f64::NAN).is_err());
    }

    #[test]
    fn hints_do_not_count_as_reputation() {
        let ids = MemoryIdentityManager::new(peer("me"));
        ids.record_agreement_hint(&peer("x"), &au(), 1.0).unwrap();
        assert_eq!(ids.agreement_hint(&peer("x"), &au()), Some(1.0));
        assert_eq!(ids.reputation(&peer("x"), &au()), None);
        assert!(ids.agreeing_peers(&au()).is_empty());

        ids.record_agreement(&peer("x"), &au(), 0.25).unwrap();
        ids.record_agreement_hint(&peer("x"), &au(), 0.9).unwrap();
        assert_eq!(ids.reputation(&peer("x"), &au()), Some(0.25));
        assert!(ids.record_agreement_hint(&peer("x"), &au(), -0.1).is_err());
    }

    #[test]
    fn agreeing_peers_are_per_au() {
        let ids = MemoryIdentityManager::new(peer("me"));
        ids.signal_agreed(&peer("b"), &au()).unwrap();
        ids.signal_agreed(&peer("a"), &au()).unwrap();
        ids.signal_disagreed(&peer("c"), &au()).unwrap();
        ids.signal_agreed(&peer("d"), &AuId::new("other").unwrap()).unwrap();
        assert_eq!(ids.agreeing_peers(&au()), vec![peer("a"), peer("b")]);
    }

    #[test]
    fn trust_list() {
        let ids = MemoryIdentityManager::new(peer("me"));
        assert!(!ids.is_trusted(&peer("x")));
        ids.trust(peer("x"));
        assert!(ids.is_trusted(&peer("x")));
        ids.untrust(&peer("x"));
        assert!(!ids.is_trusted(&peer("x")));
    }

    #[test]
    fn find_peer_maps_key_strings() {
        let ids = MemoryIdentityManager::new(peer("me"));
        assert_eq!(ids.find_peer(" TCP:[1.2.3.4]:9729 ").unwrap().as_str(), "TCP:[1.2.3.4]:9729");
        assert!(ids.find_peer("bad key").is_err());
    }
}
