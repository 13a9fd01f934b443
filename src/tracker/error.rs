use thiserror::Error;

/// Errors raised by the tracker registry and server.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A node sent a frame that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// The connection has no registered peer record.
    #[error("peer {0} is not registered")]
    PeerNotRegistered(u64),

    /// A connection sent a request before `Init`.
    #[error("request received before init")]
    NotInitialized,

    /// A publish whose metadata is inconsistent.
    #[error("invalid file {name}: {reason}")]
    InvalidFile { name: String, reason: String },
}
