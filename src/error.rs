//! Crate-wide error taxonomy.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    ProtocolError(String),

    #[error("socket I/O error")]
    WireIoError(#[from] std::io::Error),

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("authenticator '{0}' is not supported")]
    UnsupportedAuthenticator(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("all stream ids are in use")]
    AllStreamsBusy,

    #[error("pool has no live connection")]
    NoConnection,

    #[error("session has no host")]
    NoHosts,

    #[error("invalid keyspace name: '{0}'")]
    InvalidKeyspace(String),

    #[error("invalid consistency value: {0}")]
    InvalidConsistency(i16),

    #[error("invalid event type: '{0}'")]
    InvalidEventType(String),

    #[error("invalid host selection policy: {0}")]
    InvalidPolicy(String),

    #[error("server error {code:#06x}: {message}")]
    ServerError { code: i32, message: String },

    #[error("no more rows")]
    NoMoreRows,

    #[error("query produced no results")]
    NoQueryResults,

    #[error("iterator is closed")]
    ClosedIter,
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolError(msg.into())
    }
}
