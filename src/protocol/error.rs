use thiserror::Error;

/// Errors that can occur while encoding, decoding, or moving protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The message ended before all of its fields were read.
    #[error("truncated message: expected {needed} more bytes for {field}")]
    Truncated { field: &'static str, needed: usize },

    /// Received an unknown message type tag.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// A message that is valid but not allowed on this channel.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A field held a value outside its domain.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A frame announced a length larger than we accept.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Bytes were left over after the last field.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// The remote end closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}
