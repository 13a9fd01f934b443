use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk index: {0}")]
    InvalidChunkIndex(u16),

    #[error("chunk {index} has {actual} bytes, expected {expected}")]
    ChunkLength {
        index: u16,
        expected: u64,
        actual: usize,
    },

    #[error("writer for {0} is stopped")]
    WriterStopped(String),
}
