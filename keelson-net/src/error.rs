//! Error taxonomy for the networking layer.

use keelson_core::error::{BufferError, TransformError};
use thiserror::Error;

/// Main error type for keelson networking operations.
///
/// Low-level syscall failures are mapped into these categories with a
/// diagnostic string that includes the platform error code. No panics cross
/// the public API.
#[derive(Error, Debug)]
pub enum NetError {
    /// Platform network initialization failed
    #[error("network initialization failed: {0}")]
    Init(String),

    /// Host could not be resolved for the requested protocol family
    #[error("host resolution failed: {0}")]
    Resolution(String),

    /// `socket()` failed
    #[error("socket creation failed: {0}")]
    SocketCreate(String),

    /// connect/bind/listen/setsockopt failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation requires a connected socket
    #[error("not connected")]
    NotConnected,

    /// Transient or fatal write-side IO error
    #[error("write failed: {0}")]
    Write(String),

    /// Transient or fatal read-side IO error
    #[error("receive failed: {0}")]
    Receive(String),

    /// Peer closed the connection or the socket handle is invalid
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// No incoming connection within the accept window; retry at the caller
    #[error("accept timed out")]
    AcceptTimeout,

    /// Short read on opcode, size or payload
    #[error("incomplete frame: {0}")]
    FrameIncomplete(String),

    /// The codec could not decode a packet
    #[error("packet error: {0}")]
    Packet(String),

    /// A pipeline transform failed
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// A shared buffer stream failed
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
}

/// Result type alias for keelson networking operations.
pub type NetResult<T> = std::result::Result<T, NetError>;

impl NetError {
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    pub fn packet(msg: impl Into<String>) -> Self {
        Self::Packet(msg.into())
    }

    /// Whether retrying the operation can succeed without reconnecting.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::AcceptTimeout)
    }
}
