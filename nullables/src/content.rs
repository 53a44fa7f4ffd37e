//! Nullable content source: a fixed set of AUs whose URLs echo their name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use lcap_effort::{ContentError, ContentSource};
use lcap_types::{ArchivalUnit, AuId, PollSpec};

/// Serves `url.as_bytes()` for any URL of a known AU and records repairs.
#[derive(Default)]
pub struct NullContent {
    units: Mutex<HashMap<AuId, ArchivalUnit>>,
    repairs: Mutex<Vec<(AuId, String, Vec<u8>)>>,
    refuse_repairs: AtomicBool,
}

impl NullContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_au(self, unit: ArchivalUnit) -> Self {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit.id.clone(), unit);
        self
    }

    /// Make every later `store_repair` fail.
    pub fn set_refuse_repairs(&self, refuse: bool) {
        self.refuse_repairs.store(refuse, Ordering::SeqCst);
    }

    /// Repairs stored so far, in order.
    pub fn repairs(&self) -> Vec<(AuId, String, Vec<u8>)> {
        self.repairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ContentSource for NullContent {
    fn find_au(&self, au: &AuId) -> Option<ArchivalUnit> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(au)
            .cloned()
    }

    fn urls(&self, spec: &PollSpec) -> Result<Vec<String>, ContentError> {
        self.find_au(&spec.au_id)
            .map(|_| vec![spec.url.clone()])
            .ok_or_else(|| ContentError::NoSuchAu(spec.au_id.to_string()))
    }

    fn content(&self, au: &AuId, url: &str) -> Result<Vec<u8>, ContentError> {
        self.find_au(au)
            .map(|_| url.as_bytes().to_vec())
            .ok_or_else(|| ContentError::NoSuchAu(au.to_string()))
    }

    fn store_repair(&self, au: &AuId, url: &str, content: Vec<u8>) -> Result<(), ContentError> {
        if self.find_au(au).is_none() {
            return Err(ContentError::NoSuchAu(au.to_string()));
        }
        if self.refuse_repairs.load(Ordering::SeqCst) {
            return Err(ContentError::Backend(format!("refusing to store {url}")));
        }
        self.repairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((au.clone(), url.to_string(), content));
        Ok(())
    }
}
