use std::io;

use thiserror::Error;

/// Problems with the command line, detected before any connection is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing subject")]
    MissingSubject,

    #[error("wildcard subject not allowed when publishing: {0}")]
    WildcardPublish(String),
}

/// Failures talking to the NATS server. Every one of these ends the process.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("failed to connect to {addrs}: {source}")]
    Connect { addrs: String, source: io::Error },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("payload of {size} bytes exceeds server maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("connection closed by server")]
    Closed,

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Top-level error returned by a dispatcher run.
#[derive(Error, Debug)]
pub enum CatError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading stdin or writing stdout failed.
    #[error("stdio error: {0}")]
    Io(#[from] io::Error),
}
