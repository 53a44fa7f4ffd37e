//! Peer identity strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// The network identity of a peer cache, e.g. `TCP:[10.0.0.1]:9729`.
///
/// Identities appear inside flat configuration strings that use `,` and `;`
/// as separators, so those characters (and whitespace) are rejected.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Parse a peer identity key.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let trimmed = raw.trim();
        let invalid = trimmed.is_empty()
            || trimmed
                .chars()
                .any(|c| c.is_whitespace() || c == ',' || c == ';');
        if invalid {
            return Err(TypesError::InvalidPeerId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Return the identity key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let peer = PeerId::parse("  TCP:[127.0.0.1]:9729 ").unwrap();
        assert_eq!(peer.as_str(), "TCP:[127.0.0.1]:9729");
    }

    #[test]
    fn parse_rejects_separators() {
        assert!(PeerId::parse("a,b").is_err());
        assert!(PeerId::parse("a;b").is_err());
        assert!(PeerId::parse("a b").is_err());
        assert!(PeerId::parse("   ").is_err());
    }

    #[test]
    fn ordering_follows_key_string() {
        let a: PeerId = "alpha".parse().unwrap();
        let b: PeerId = "beta".parse().unwrap();
        assert!(a < b);
    }
}
