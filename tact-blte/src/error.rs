//! Error types for BLTE encoding and decoding.

use thiserror::Error;

/// Result type for BLTE operations.
pub type Result<T> = std::result::Result<T, Error>;

/// BLTE error types.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid BLTE magic bytes
    #[error("Invalid BLTE magic: {0:?}")]
    BadMagic([u8; 4]),

    /// Frame table is malformed
    #[error("Invalid frame table: {0}")]
    InvalidFrameTable(String),

    /// Stream is shorter than its header promises
    #[error("Truncated stream: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// Encoded frame bytes do not match the frame-table checksum
    #[error("Frame checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Unknown frame mode byte
    #[error("Unknown frame mode: {0:#04x}")]
    UnknownMode(u8),

    /// Encrypted frame references a key that is not registered
    #[error("Missing encryption key: {0:#018x}")]
    MissingKey(u64),

    /// Encrypted frame structure is malformed
    #[error("Invalid encrypted frame: {0}")]
    InvalidEncryptedFrame(String),

    /// Frame payload failed to decompress, or decompressed to the wrong size
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// ESpec string failed to parse, or describes a schedule the encoder
    /// cannot honor
    #[error("Bad ESpec: {0}")]
    BadESpec(String),

    /// Cipher error from tact-crypto
    #[error("Crypto error: {0}")]
    Crypto(#[from] tact_crypto::CryptoError),
}
