//! Error types for the CAS engine.

use thiserror::Error;

use crate::keys::EKey;

/// Result type for CAS operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying storage. Never retried here; retries
    /// are the caller's concern.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not 32 hex characters
    #[error("Bad hash: {0}")]
    BadHash(String),

    /// File does not start with the expected magic
    #[error("Bad magic: not a {0} file")]
    BadMagic(&'static str),

    /// Format version this engine does not understand
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Checksum mismatch or impossible layout; fatal for the single file,
    /// not for the containing directory scan
    #[error("Corrupt {what}: {detail}")]
    Corrupt {
        what: &'static str,
        detail: String,
    },

    /// Two different records staged under one encoding key; the second is
    /// dropped
    #[error("Duplicate EKey on write path: {0}")]
    DuplicateEKey(EKey),

    /// BLTE codec error, including checksum mismatches and missing
    /// encryption keys surfaced mid-stream
    #[error("BLTE error: {0}")]
    Blte(#[from] tact_blte::Error),

    /// Cooperative cancellation observed; temp files may remain and are
    /// cleaned on the next open
    #[error("Operation cancelled")]
    Cancelled,
}
