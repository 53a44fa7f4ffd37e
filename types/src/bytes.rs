//! Fixed-size 32-byte values: poll keys, digests, nonces and commitments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

macro_rules! bytes32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// Parse a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, TypesError> {
                let raw = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
                let bytes: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| TypesError::InvalidHex(format!("expected 32 bytes in {s:?}")))?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }
    };
}

bytes32!(
    /// Unique identifier of one running poll, derived from the poller's
    /// challenge and the poll spec.
    PollKey
);

bytes32!(
    /// A content digest produced by the hash service.
    Digest
);

bytes32!(
    /// A single-use random value contributed by a poll participant.
    Nonce
);

bytes32!(
    /// The random half of a verifier/secret commitment pair.
    Secret
);

bytes32!(
    /// One-way hash of a [`Secret`]; published first, the secret is revealed later.
    Verifier
);
