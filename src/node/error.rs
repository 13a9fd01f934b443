use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// The tracker connection is gone.
    #[error("not connected to tracker")]
    NotConnected,

    /// Zero-length files cannot be published.
    #[error("file {0:?} is empty")]
    EmptyFile(PathBuf),

    /// A chunk of this file would not fit in one datagram.
    #[error("chunks of {name} are {chunk_size} bytes, too large for a datagram")]
    ChunkTooLarge { name: String, chunk_size: u64 },

    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// The file is already pending, published, or downloading here.
    #[error("file {0} is already tracked locally")]
    AlreadyTracked(String),

    /// The name cannot be used as a local file name.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
}
