use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentityError {
    #[error("invalid peer identity key: {0}")]
    InvalidKey(String),

    #[error("agreement {0} outside [0, 1]")]
    InvalidAgreement(f64),
}
