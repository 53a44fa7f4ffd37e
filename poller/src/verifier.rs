//! Verifier/secret commitment pairs for polls this node calls.
//!
//! The verifier travels in the poll invitation; the secret is revealed to
//! each voter in its evaluation receipt, proving the receipt came from the
//! peer that started the poll.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use lcap_crypto::{make_verifier, random_secret};
use lcap_types::{Secret, Verifier};

/// Stores secrets by verifier until they expire.
#[derive(Default)]
pub struct VerifierStore {
    entries: Mutex<HashMap<Verifier, (Secret, Instant)>>,
}

impl VerifierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a secret, store it for `lifetime`, and return its verifier.
    pub fn make_verifier(&self, lifetime: Duration) -> Verifier {
        let secret = random_secret();
        let verifier = make_verifier(&secret);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(verifier, (secret, now + lifetime));
        verifier
    }

    /// The secret behind `verifier`, unless it is unknown or expired.
    pub fn get_secret(&self, verifier: &Verifier) -> Option<Secret> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(verifier) {
            Some((secret, expires)) if *expires > now => Some(*secret),
            Some(_) => {
                entries.remove(verifier);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
