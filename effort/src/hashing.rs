//! Content hashing seam and a Blake2b implementation over a content source.

use std::sync::Arc;
use std::time::Duration;

use lcap_crypto::blake2b_256_multi;
use lcap_types::{Digest, Nonce, PollSpec};

use crate::{ContentSource, HashError};

/// Name of the digest algorithm [`ContentHasher`] implements.
pub const HASH_ALGORITHM: &str = "BLAKE2b-256";

/// Hashes the content a poll covers.
pub trait HashService: Send + Sync {
    /// How long hashing the poll spec's range is expected to take.
    fn estimate_hash_duration(&self, spec: &PollSpec) -> Result<Duration, HashError>;

    /// Digest of the poll spec's range salted with both participants' nonces, so
    /// a voter cannot reuse another peer's answer.
    fn hash_content(
        &self,
        spec: &PollSpec,
        poller_nonce: &Nonce,
        voter_nonce: &Nonce,
    ) -> Result<Digest, HashError>;

    fn supports_algorithm(&self, name: &str) -> bool;
}

/// Blake2b hasher over the URLs a [`ContentSource`] holds.
pub struct ContentHasher {
    content: Arc<dyn ContentSource>,
    bytes_per_ms: u64,
    min_estimate: Duration,
}

impl ContentHasher {
    pub fn new(content: Arc<dyn ContentSource>) -> Self {
        Self {
            content,
            bytes_per_ms: 50_000,
            min_estimate: Duration::from_millis(10),
        }
    }

    /// Hashing throughput used for estimates.
    pub fn with_rate(mut self, bytes_per_ms: u64, min_estimate: Duration) -> Self {
        self.bytes_per_ms = bytes_per_ms.max(1);
        self.min_estimate = min_estimate;
        self
    }
}

impl HashService for ContentHasher {
    fn estimate_hash_duration(&self, spec: &PollSpec) -> Result<Duration, HashError> {
        let mut total = 0u64;
        for url in self.content.urls(spec)? {
            total += self.content.content(&spec.au_id, &url)?.len() as u64;
        }
        let estimate = Duration::from_millis(total / self.bytes_per_ms);
        Ok(estimate.max(self.min_estimate))
    }

    fn hash_content(
        &self,
        spec: &PollSpec,
        poller_nonce: &Nonce,
        voter_nonce: &Nonce,
    ) -> Result<Digest, HashError> {
        let mut running = blake2b_256_multi(&[poller_nonce.as_bytes(), voter_nonce.as_bytes()]);
        for url in self.content.urls(spec)? {
            let bytes = self.content.content(&spec.au_id, &url)?;
            let url_len = (url.len() as u64).to_le_bytes();
            let body_len = (bytes.len() as u64).to_le_bytes();
            running = blake2b_256_multi(&[&running, &url_len, url.as_bytes(), &body_len, &bytes]);
        }
        Ok(Digest::new(running))
    }

    fn supports_algorithm(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(HASH_ALGORITHM)
    }
}
