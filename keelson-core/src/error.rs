//! Error types shared by the byte-stream kernel.

use thiserror::Error;

/// Errors surfaced by the shared producer/consumer streams.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Write attempted after the producer posted a terminal status
    #[error("stream is closed for writing")]
    Closed,

    /// The producer posted an error status; drained readers observe it
    #[error("stream failed: {0}")]
    Failed(String),
}

/// Errors produced by pipeline stages and the data transforms.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Compression or decompression failure
    #[error("compression error: {0}")]
    Compression(String),

    /// Encryption, decryption or key-derivation failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Hashing failure
    #[error("hash error: {0}")]
    Hash(String),

    /// The underlying stream reported a failure
    #[error("stream error: {0}")]
    Stream(#[from] BufferError),

    /// IO error inside a transform
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    /// Create a compression error with a message
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a crypto error with a message
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }
}
