use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffortError {
    #[error("no proof found after {attempts} attempts")]
    Exhausted { attempts: u64 },

    #[error("effort computation failed: {0}")]
    Computation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("archival unit {0} not found")]
    NoSuchAu(String),

    #[error("url {0} not found")]
    NoSuchUrl(String),

    #[error("content backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    #[error("hash algorithm {0} not supported")]
    UnsupportedAlgorithm(String),
}
