//! Directory-level index management.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
use crate::index::file::{IndexFile, IndexKind};
use crate::keys::{EKey, Hash};

/// A resolved index entry: which archive blob holds the slice, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Name of the archive blob (the checksum of its index).
    pub archive: Hash,
    /// Byte offset inside the blob.
    pub offset: u32,
    /// Size of the slice.
    pub size: u32,
}

/// All indices found under a directory, loaded as one immutable set.
///
/// Readers share a snapshot of the set; a save builds a fresh set by
/// rescanning and swaps it in whole, so no intermediate state is visible.
#[derive(Default)]
pub struct IndexSet {
    files: Vec<IndexFile>,
}

impl IndexSet {
    /// Recursively scan `dir` for `*.index` files.
    ///
    /// A file that fails validation is logged and suppressed, not fatal:
    /// the rest of the directory still loads. Stale `*.tmp` files from a
    /// cancelled save are removed. A missing directory yields an empty set.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut set = Self::default();
        if dir.exists() {
            set.scan(dir)?;
        }
        debug!("Loaded {} indices from {dir:?}", set.files.len());
        Ok(set)
    }

    fn scan(&mut self, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if entry.file_type()?.is_dir() {
                self.scan(&path)?;
                continue;
            }

            match path.extension().and_then(|e| e.to_str()) {
                Some("tmp") => {
                    debug!("Removing stale temp file {path:?}");
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("Failed to remove {path:?}: {e}");
                    }
                }
                Some("index") => {
                    let Some(name) = index_name(&path) else {
                        warn!("Skipping index with unparseable name: {path:?}");
                        continue;
                    };
                    match Self::load(&path, name) {
                        Ok(file) => self.files.push(file),
                        Err(e) => warn!("Skipping index {path:?}: {e}"),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn load(path: &Path, name: Hash) -> Result<IndexFile> {
        let data = fs::read(path)?;
        let file = IndexFile::parse(&data)?;

        // The filename is the content checksum; a mismatch means the file
        // was tampered with or misnamed.
        if file.checksum() != name {
            return Err(crate::Error::Corrupt {
                what: "index_name",
                detail: format!("content hash {} under name {name}", file.checksum()),
            });
        }
        Ok(file)
    }

    /// Look up an EKey across all loaded indices. Group indices are
    /// skipped; the per-archive indices are authoritative.
    pub fn try_get(&self, ekey: &EKey) -> Option<Located> {
        if ekey.is_empty() {
            return None;
        }
        self.files
            .iter()
            .filter(|f| !f.is_group())
            .find_map(|f| {
                f.try_get(ekey).map(|entry| Located {
                    archive: f.checksum(),
                    offset: entry.offset,
                    size: entry.size,
                })
            })
    }

    pub fn contains(&self, ekey: &EKey) -> bool {
        self.try_get(ekey).is_some()
    }

    /// The loaded index files.
    pub fn files(&self) -> &[IndexFile] {
        &self.files
    }

    /// Checksums of the data archives covered by this set.
    pub fn archives(&self) -> impl Iterator<Item = Hash> + '_ {
        self.files
            .iter()
            .filter(|f| !f.is_group() && f.kind() == IndexKind::Data)
            .map(|f| f.checksum())
    }
}

/// Parse the `<hash>.index` filename stem.
fn index_name(path: &Path) -> Option<Hash> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::file::IndexEntry;
    use std::fs;

    fn write_index(dir: &Path, entries: &[IndexEntry]) -> Hash {
        let data = IndexFile::serialize(entries, IndexKind::Data, false);
        let name = Hash::of(&data);
        fs::write(dir.join(format!("{name}.index")), &data).unwrap();
        name
    }

    fn entries(seed: u8) -> Vec<IndexEntry> {
        (0u8..4)
            .map(|i| IndexEntry {
                ekey: EKey::new([seed + i; 16]),
                size: 10,
                offset: u32::from(i) * 10,
                archive_index: None,
            })
            .collect()
    }

    #[test]
    fn test_open_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_index(dir.path(), &entries(0x10));
        let b = write_index(dir.path(), &entries(0x40));

        let set = IndexSet::open(dir.path()).unwrap();
        assert_eq!(set.files().len(), 2);

        let hit = set.try_get(&EKey::new([0x41; 16])).unwrap();
        assert_eq!(hit.archive, b);
        assert_eq!(hit.offset, 10);

        let hit = set.try_get(&EKey::new([0x10; 16])).unwrap();
        assert_eq!(hit.archive, a);

        assert!(set.try_get(&EKey::new([0x99; 16])).is_none());
        assert!(set.try_get(&EKey::default()).is_none());
    }

    #[test]
    fn test_corrupt_file_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), &entries(0x10));

        // A valid file, then corrupt one page byte on disk.
        let data = IndexFile::serialize(&entries(0x40), IndexKind::Data, false);
        let name = Hash::of(&data);
        let mut bad = data;
        bad[17] ^= 0xFF;
        fs::write(dir.path().join(format!("{name}.index")), &bad).unwrap();

        let set = IndexSet::open(dir.path()).unwrap();
        assert_eq!(set.files().len(), 1);
        assert!(set.try_get(&EKey::new([0x10; 16])).is_some());
        assert!(set.try_get(&EKey::new([0x40; 16])).is_none());
    }

    #[test]
    fn test_misnamed_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let data = IndexFile::serialize(&entries(0x10), IndexKind::Data, false);
        fs::write(
            dir.path()
                .join("00000000000000000000000000000000.index"),
            &data,
        )
        .unwrap();

        let set = IndexSet::open(dir.path()).unwrap();
        assert!(set.files().is_empty());
    }

    #[test]
    fn test_stale_tmp_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("deadbeef.index.tmp");
        fs::write(&tmp, b"partial").unwrap();

        IndexSet::open(dir.path()).unwrap();
        assert!(!tmp.exists());
    }

    #[test]
    fn test_group_index_is_skipped_on_lookup() {
        let dir = tempfile::tempdir().unwrap();

        let group_entries: Vec<IndexEntry> = entries(0x10)
            .into_iter()
            .map(|mut e| {
                e.archive_index = Some(0);
                e
            })
            .collect();
        let data = IndexFile::serialize(&group_entries, IndexKind::Data, true);
        let name = Hash::of(&data);
        fs::write(dir.path().join(format!("{name}.index")), &data).unwrap();

        let set = IndexSet::open(dir.path()).unwrap();
        assert_eq!(set.files().len(), 1);
        assert!(set.files()[0].is_group());
        assert!(set.try_get(&EKey::new([0x10; 16])).is_none());
    }

    #[test]
    fn test_recursive_scan() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("aa").join("bb");
        fs::create_dir_all(&nested).unwrap();
        write_index(&nested, &entries(0x20));

        let set = IndexSet::open(dir.path()).unwrap();
        assert_eq!(set.files().len(), 1);
        assert!(set.try_get(&EKey::new([0x21; 16])).is_some());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = IndexSet::open(&dir.path().join("nope")).unwrap();
        assert!(set.files().is_empty());
    }
}
