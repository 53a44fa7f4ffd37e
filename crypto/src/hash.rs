//! Blake2b hashing for poll keys and content.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use lcap_types::{Nonce, PollKey, PollSpec};

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    finish(hasher)
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

/// Derive the key of a poll from the poller's challenge and the poll spec.
///
/// Every variable-length field is length-prefixed so distinct specs can never
/// produce the same hash input.
pub fn poll_key(challenge: &Nonce, spec: &PollSpec) -> PollKey {
    let mut hasher = Blake2b256::new();
    hasher.update(challenge.as_bytes());
    for field in [
        spec.au_id.as_str(),
        spec.plugin_version.as_str(),
        spec.url.as_str(),
        spec.lower.as_deref().unwrap_or(""),
        spec.upper.as_deref().unwrap_or(""),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update([spec.lower.is_some() as u8, spec.upper.is_some() as u8]);
    hasher.update(spec.poll_type.to_string().as_bytes());
    hasher.update(spec.protocol_version.to_le_bytes());
    PollKey::new(finish(hasher))
}

fn finish(hasher: Blake2b256) -> [u8; 32] {
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}
