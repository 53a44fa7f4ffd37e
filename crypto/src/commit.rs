//! Random values and verifier/secret commitments.

use rand::rngs::OsRng;
use rand::RngCore;

use lcap_types::{Nonce, Secret, Verifier};

use crate::blake2b_256;

fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A fresh random nonce (poll challenge or voter nonce).
pub fn random_nonce() -> Nonce {
    Nonce::new(random_bytes())
}

/// A fresh random secret for a verifier commitment.
pub fn random_secret() -> Secret {
    Secret::new(random_bytes())
}

/// The public verifier committing to `secret`.
pub fn make_verifier(secret: &Secret) -> Verifier {
    Verifier::new(blake2b_256(secret.as_bytes()))
}

/// Whether `secret` is the preimage of `verifier`.
pub fn verify_secret(secret: &Secret, verifier: &Verifier) -> bool {
    make_verifier(secret) == *verifier
}
