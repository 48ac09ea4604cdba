use thiserror::Error;

/// Errors produced by the czfrp protocol and registry layers.
#[derive(Debug, Error)]
pub enum FrpError {
    #[error("tunnel not found: {0}")]
    NotFound(String),

    #[error("domain '{0}' is already in use")]
    Conflict(String),

    #[error("tunnel '{0}' already has a control connection")]
    AlreadyConnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type FrpResult<T> = Result<T, FrpError>;
