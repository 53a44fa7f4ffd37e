//! Nullable hash service: digests derived from the nonces and a content tag.
//!
//! Two instances with the same content tag agree; changing the tag on one
//! simulates a damaged copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use lcap_crypto::blake2b_256_multi;
use lcap_effort::{ContentError, HashError, HashService, HASH_ALGORITHM};
use lcap_types::{Digest, Nonce, PollSpec};

pub struct NullHashService {
    estimate: Mutex<Duration>,
    content_tag: Mutex<Vec<u8>>,
    failing: AtomicBool,
}

impl NullHashService {
    pub fn new(estimate: Duration) -> Self {
        Self {
            estimate: Mutex::new(estimate),
            content_tag: Mutex::new(b"intact".to_vec()),
            failing: AtomicBool::new(false),
        }
    }

    /// Builder form of [`set_content_tag`](Self::set_content_tag).
    pub fn with_content_tag(self, tag: &[u8]) -> Self {
        self.set_content_tag(tag);
        self
    }

    pub fn set_content_tag(&self, tag: &[u8]) {
        *self.content_tag.lock().unwrap_or_else(PoisonError::into_inner) = tag.to_vec();
    }

    pub fn set_estimate(&self, estimate: Duration) {
        *self.estimate.lock().unwrap_or_else(PoisonError::into_inner) = estimate;
    }

    /// Make `hash_content` fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for NullHashService {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl HashService for NullHashService {
    fn estimate_hash_duration(&self, _spec: &PollSpec) -> Result<Duration, HashError> {
        Ok(*self.estimate.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn hash_content(
        &self,
        spec: &PollSpec,
        poller_nonce: &Nonce,
        voter_nonce: &Nonce,
    ) -> Result<Digest, HashError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ContentError::Backend("scripted hash failure".into()).into());
        }
        let tag = self
            .content_tag
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(Digest::new(blake2b_256_multi(&[
            b"null-hash".as_slice(),
            spec.url.as_bytes(),
            poller_nonce.as_bytes(),
            voter_nonce.as_bytes(),
            tag.as_slice(),
        ])))
    }

    fn supports_algorithm(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(HASH_ALGORITHM)
    }
}
