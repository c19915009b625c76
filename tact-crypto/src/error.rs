//! Error types for key management and frame ciphers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// IO error while loading key files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IV has the wrong length for the cipher
    #[error("Invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize { expected: usize, actual: usize },

    /// Malformed key name or key value in a key file
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
