use thiserror::Error;

/// Codec-level failure on a single message. The connection may remain usable.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated message")]
    Truncated,
    #[error("unsupported byte order {0:#04x}")]
    ByteOrder(u8),
}

/// Connection-level failure.
#[derive(Debug, Error)]
pub enum DbusError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("unsupported bus address {0:?}")]
    UnsupportedAddress(String),
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    #[error("method call failed: {name}")]
    Call {
        /// The D-Bus ERROR_NAME carried by the METHOD_ERROR reply.
        name: String,
    },
    #[error("connection closed")]
    Closed,
}
