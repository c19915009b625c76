//! Encryption support for TACT content archives.
//!
//! This crate provides:
//! - A registry of named 16-byte content keys ([`KeyService`])
//! - The Salsa20 stream cipher variant used by encrypted BLTE frames
//! - The ARC4 cipher variant kept for older repositories

pub mod arc4;
pub mod error;
pub mod key_service;
pub mod salsa20;

pub use error::CryptoError;
pub use key_service::KeyService;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
