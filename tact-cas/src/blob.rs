//! Blob access and the CDN directory layout.
//!
//! Content lives at `<root>/<kind>/<aa>/<bb>/<hash>`, where `aa` and `bb`
//! are the first two byte pairs of the lowercase hex hash. Indices sit next
//! to their archive with an `.index` suffix. The layout is wire-visible:
//! other clients resolve the same paths.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Boxable `Read + Seek` for blob handles.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Top-level content kind in the CDN layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Data,
    Patch,
    Config,
}

impl BlobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Patch => "patch",
            Self::Config => "config",
        }
    }
}

/// Path of `hash` (plus optional suffix, e.g. `.index`) under `root`.
///
/// `abcdef…` becomes `<root>/<kind>/ab/cd/abcdef…`.
pub fn cdn_path(root: &Path, kind: BlobKind, hash: &str, suffix: &str) -> PathBuf {
    let mut path = root.join(kind.as_str());
    if hash.len() >= 4 {
        path.push(&hash[..2]);
        path.push(&hash[2..4]);
    }
    path.push(format!("{hash}{suffix}"));
    path
}

/// Source of blob bytes, keyed by lowercase hex hash.
///
/// Implemented here over a local CDN-layout directory; network-backed
/// sources (HTTP range readers) implement the same trait outside this
/// crate.
pub trait BlobSource {
    /// Open the blob stored under `key_hex`. Missing blobs surface as
    /// `Io(NotFound)`.
    fn open(&self, key_hex: &str, kind: BlobKind) -> Result<Box<dyn ReadSeek>>;
}

/// Blob source over a local CDN-layout directory.
pub struct LocalBlobSource {
    root: PathBuf,
}

impl LocalBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobSource for LocalBlobSource {
    fn open(&self, key_hex: &str, kind: BlobKind) -> Result<Box<dyn ReadSeek>> {
        let path = cdn_path(&self.root, kind, key_hex, "");
        let file = File::open(path)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cdn_path_layout() {
        let path = cdn_path(
            Path::new("/cdn"),
            BlobKind::Data,
            "abcdef0123456789abcdef0123456789",
            "",
        );
        assert_eq!(
            path,
            Path::new("/cdn/data/ab/cd/abcdef0123456789abcdef0123456789")
        );

        let path = cdn_path(Path::new("/cdn"), BlobKind::Config, "deadbeef", ".index");
        assert_eq!(path, Path::new("/cdn/config/de/ad/deadbeef.index"));
    }

    #[test]
    fn test_local_source_open() {
        let dir = tempfile::tempdir().unwrap();
        let hash = "00112233445566778899aabbccddeeff";

        let path = cdn_path(dir.path(), BlobKind::Data, hash, "");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(&path).unwrap().write_all(b"blob!").unwrap();

        let source = LocalBlobSource::new(dir.path());
        let mut handle = source.open(hash, BlobKind::Data).unwrap();
        let mut out = String::new();
        handle.read_to_string(&mut out).unwrap();
        assert_eq!(out, "blob!");

        let missing = source.open("ffffffffffffffffffffffffffffffff", BlobKind::Data);
        assert!(matches!(
            missing,
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound
        ));
    }
}
