//! Archival unit content seam and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use lcap_types::{ArchivalUnit, AuId, PollSpec};

use crate::ContentError;

/// Read (and repair) access to preserved content.
pub trait ContentSource: Send + Sync {
    /// Look up an AU this node preserves.
    fn find_au(&self, au: &AuId) -> Option<ArchivalUnit>;

    /// URLs inside the poll spec's range, in ascending order.
    fn urls(&self, spec: &PollSpec) -> Result<Vec<String>, ContentError>;

    /// The stored bytes of one URL.
    fn content(&self, au: &AuId, url: &str) -> Result<Vec<u8>, ContentError>;

    /// Replace the stored bytes of one URL with repaired content.
    fn store_repair(&self, au: &AuId, url: &str, content: Vec<u8>) -> Result<(), ContentError>;
}

struct StoredAu {
    unit: ArchivalUnit,
    files: BTreeMap<String, Vec<u8>>,
}

/// A thread-safe in-memory content store.
#[derive(Default)]
pub struct MemoryContent {
    aus: RwLock<HashMap<AuId, StoredAu>>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start preserving an AU. Re-adding an AU keeps its files.
    pub fn add_au(&self, unit: ArchivalUnit) {
        let mut aus = self.aus.write().unwrap_or_else(PoisonError::into_inner);
        match aus.get_mut(&unit.id) {
            Some(stored) => stored.unit = unit,
            None => {
                aus.insert(
                    unit.id.clone(),
                    StoredAu {
                        unit,
                        files: BTreeMap::new(),
                    },
                );
            }
        }
    }

    /// Store the bytes of a URL in an already-added AU.
    pub fn put(&self, au: &AuId, url: impl Into<String>, bytes: Vec<u8>) -> Result<(), ContentError> {
        let mut aus = self.aus.write().unwrap_or_else(PoisonError::into_inner);
        let stored = aus
            .get_mut(au)
            .ok_or_else(|| ContentError::NoSuchAu(au.to_string()))?;
        stored.files.insert(url.into(), bytes);
        Ok(())
    }

    /// Total stored bytes inside a spec's range.
    pub fn range_size(&self, spec: &PollSpec) -> Result<u64, ContentError> {
        let aus = self.aus.read().unwrap_or_else(PoisonError::into_inner);
        let stored = aus
            .get(&spec.au_id)
            .ok_or_else(|| ContentError::NoSuchAu(spec.au_id.to_string()))?;
        Ok(stored
            .files
            .iter()
            .filter(|(url, _)| spec.contains_url(url))
            .map(|(_, bytes)| bytes.len() as u64)
            .sum())
    }
}

impl ContentSource for MemoryContent {
    fn find_au(&self, au: &AuId) -> Option<ArchivalUnit> {
        self.aus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(au)
            .map(|stored| stored.unit.clone())
    }

    fn urls(&self, spec: &PollSpec) -> Result<Vec<String>, ContentError> {
        let aus = self.aus.read().unwrap_or_else(PoisonError::into_inner);
        let stored = aus
            .get(&spec.au_id)
            .ok_or_else(|| ContentError::NoSuchAu(spec.au_id.to_string()))?;
        Ok(stored
            .files
            .keys()
            .filter(|url| spec.contains_url(url))
            .cloned()
            .collect())
    }

    fn content(&self, au: &AuId, url: &str) -> Result<Vec<u8>, ContentError> {
        let aus = self.aus.read().unwrap_or_else(PoisonError::into_inner);
        let stored = aus
            .get(au)
            .ok_or_else(|| ContentError::NoSuchAu(au.to_string()))?;
        stored
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| ContentError::NoSuchUrl(url.to_string()))
    }

    fn store_repair(&self, au: &AuId, url: &str, content: Vec<u8>) -> Result<(), ContentError> {
        tracing::info!(au = %au, url, bytes = content.len(), "storing repaired content");
        self.put(au, url, content)
    }
}
