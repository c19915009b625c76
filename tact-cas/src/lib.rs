//! Content-addressed storage engine for TACT repositories.
//!
//! A TACT repository stores every object twice over: identified by a
//! content key (CKey, digest of the plaintext) and addressed by an
//! encoding key (EKey, digest of the BLTE-encoded stream). This crate
//! implements the storage side of that scheme:
//!
//! - [`index`]: sorted, paged `.index` files mapping EKeys to byte ranges
//!   inside archive blobs
//! - [`archive`]: the packing engine that stages records and flushes them
//!   into size-capped archives
//! - [`encoding`]: the CKey-to-EKeys translation table with its ESpec
//!   string pool
//! - [`cas`]: the reader/writer facade tying the pieces together over a
//!   [`blob::BlobSource`]
//!
//! Reads from a snapshot never block one another; writes are serialized
//! per store. Manifest fetching and CDN transport live in collaborating
//! crates behind the [`blob::BlobSource`] seam.

pub mod archive;
pub mod blob;
pub mod cancel;
pub mod cas;
pub mod config;
pub mod encoding;
pub mod error;
pub mod index;
pub mod keys;

pub use archive::{ArchiveStore, CasRecord, SaveOptions, ARCHIVE_MAX_BYTES};
pub use blob::{BlobKind, BlobSource, LocalBlobSource, ReadSeek};
pub use cancel::CancelToken;
pub use cas::{CasReader, CasWriter};
pub use config::BuildConfig;
pub use encoding::{CKeyEntry, EKeyEntry, EncodingTable};
pub use error::{Error, Result};
pub use index::{IndexEntry, IndexFile, IndexKind, IndexSet, Located};
pub use keys::{CKey, EKey, Hash};
