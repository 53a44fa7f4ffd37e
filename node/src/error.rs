use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("poller config error: {0}")]
    PollerConfig(#[from] lcap_poller::ConfigError),

    #[error("poll manager error: {0}")]
    Manager(#[from] lcap_poller::ManagerError),

    #[error("transport error: {0}")]
    Transport(#[from] lcap_network::TransportError),

    #[error("identity error: {0}")]
    Identity(#[from] lcap_identity::IdentityError),

    #[error("invalid value: {0}")]
    Types(#[from] lcap_types::TypesError),

    #[error("content error: {0}")]
    Content(#[from] lcap_effort::ContentError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("node already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
