//! Errors raised while constructing protocol types from untrusted input.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid peer identity {0:?}")]
    InvalidPeerId(String),

    #[error("invalid archival unit id {0:?}")]
    InvalidAuId(String),

    #[error("invalid hex value: {0}")]
    InvalidHex(String),
}
