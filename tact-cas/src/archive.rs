//! Archive packing and persistence.
//!
//! New records are staged in a sorted map and flushed by `save` into
//! archive blobs (plain concatenations of BLTE streams) with one `.index`
//! per blob. Packing is greedy: the staging map is already in EKey order,
//! so archives are emitted in order and sealed when the next record would
//! push them past the size cap.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tact_blte::ESpec;

use crate::blob::{cdn_path, BlobKind};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::index::{IndexEntry, IndexFile, IndexKind, IndexSet, Located};
use crate::keys::{CKey, EKey, Hash};

/// Upper bound on archive blob size. An archive is sealed once the next
/// record would push it past this; a single record larger than the cap
/// gets an archive of its own.
pub const ARCHIVE_MAX_BYTES: u64 = 256_000_000;

/// A record staged for archiving: one BLTE-encoded object and its keys.
/// Transient; dropped once flushed to an archive.
#[derive(Debug, Clone)]
pub struct CasRecord {
    pub ckey: CKey,
    pub ekey: EKey,
    pub plain_size: u64,
    pub espec: ESpec,
    /// The complete encoded BLTE stream.
    pub data: Vec<u8>,
}

impl CasRecord {
    pub fn encoded_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Options for [`ArchiveStore::save`].
#[derive(Clone, Default)]
pub struct SaveOptions {
    /// Delete replaced blobs instead of leaving them for deferred cleanup.
    pub dispose: bool,
    /// Cooperative cancellation; checked between files.
    pub cancel: CancelToken,
}

/// The index + archive engine over one CDN-layout directory.
///
/// Reads are served from an immutable [`IndexSet`] snapshot and never
/// block one another; `enqueue` takes a short writer lock on the staging
/// map; `save` is serialized per store.
pub struct ArchiveStore {
    root: PathBuf,
    max_archive_bytes: u64,
    indices: RwLock<Arc<IndexSet>>,
    staging: Mutex<BTreeMap<EKey, CasRecord>>,
    tombstones: Mutex<BTreeSet<EKey>>,
}

impl ArchiveStore {
    /// Open a store over a CDN-layout root, scanning `<root>/data` for
    /// indices.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let indices = IndexSet::open(&root.join("data"))?;
        info!(
            "Opened archive store at {root:?} with {} indices",
            indices.files().len()
        );
        Ok(Self {
            root,
            max_archive_bytes: ARCHIVE_MAX_BYTES,
            indices: RwLock::new(Arc::new(indices)),
            staging: Mutex::new(BTreeMap::new()),
            tombstones: Mutex::new(BTreeSet::new()),
        })
    }

    /// Override the archive size cap. Tests exercise the packing rule with
    /// small caps; production stays at [`ARCHIVE_MAX_BYTES`].
    pub fn with_max_archive_bytes(mut self, max: u64) -> Self {
        self.max_archive_bytes = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current index snapshot. The snapshot is immutable; a concurrent
    /// `save` publishes a fresh one without disturbing it.
    pub fn indices(&self) -> Arc<IndexSet> {
        self.indices.read().clone()
    }

    /// Resolve an EKey to its archive slice.
    pub fn try_get(&self, ekey: &EKey) -> Option<Located> {
        self.indices().try_get(ekey)
    }

    /// Stage a record for the next save.
    ///
    /// First write wins: staging the same record twice is a no-op, and a
    /// different record under an already-staged EKey is dropped with a
    /// warning. Records keyed by the empty hash are skipped entirely.
    pub fn enqueue(&self, record: CasRecord) {
        if record.ekey.is_empty() {
            debug!("Skipping record with empty EKey (ckey {})", record.ckey);
            return;
        }

        let mut staging = self.staging.lock();
        match staging.entry(record.ekey) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
            }
            std::collections::btree_map::Entry::Occupied(existing) => {
                if existing.get().data != record.data {
                    warn!("{}", Error::DuplicateEKey(record.ekey));
                }
            }
        }
    }

    /// Mark a record for removal from its data index on the next save.
    pub fn remove(&self, ekey: EKey) {
        if !ekey.is_empty() {
            self.tombstones.lock().insert(ekey);
        }
    }

    /// Number of records currently staged.
    pub fn staged_len(&self) -> usize {
        self.staging.lock().len()
    }

    /// Flush staged work to disk.
    ///
    /// Order of operations: mutated data indices are rewritten first, then
    /// staged records are partitioned and written as new blob + index
    /// pairs. Each index is fsynced and renamed into place before its blob
    /// becomes visible, so a crash never exposes a blob without its index
    /// being durable. On success the directory is rescanned and the new
    /// index set replaces the old one atomically; on error (including
    /// cancellation) the staged state is kept so the caller can retry.
    pub fn save(&self, opts: &SaveOptions) -> Result<()> {
        let mut staging = self.staging.lock();
        let mut tombstones = self.tombstones.lock();
        let current = self.indices();

        let disposable = self.rewrite_mutated_indices(&current, &tombstones, opts)?;

        // Records already reachable through an index were flushed by an
        // earlier save; writing them again would duplicate content and
        // rename nothing.
        let pending: Vec<&CasRecord> = staging
            .values()
            .filter(|r| !current.contains(&r.ekey) && !tombstones.contains(&r.ekey))
            .collect();

        let mut archives = 0usize;
        for partition in partition_by_size(&pending, self.max_archive_bytes) {
            opts.cancel.check()?;
            self.write_archive(partition)?;
            archives += 1;
        }

        for path in disposable {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to dispose {path:?}: {e}");
            }
        }

        info!(
            "Saved {} records into {archives} archives",
            pending.len()
        );

        staging.clear();
        tombstones.clear();

        let fresh = IndexSet::open(&self.root.join("data"))?;
        *self.indices.write() = Arc::new(fresh);
        Ok(())
    }

    /// Rewrite data indices that lost entries to tombstones. The new index
    /// is named by its new checksum and the blob is re-linked under that
    /// name; replaced files are returned for disposal if requested.
    fn rewrite_mutated_indices(
        &self,
        current: &IndexSet,
        tombstones: &BTreeSet<EKey>,
        opts: &SaveOptions,
    ) -> Result<Vec<PathBuf>> {
        let mut disposable = Vec::new();
        if tombstones.is_empty() {
            return Ok(disposable);
        }

        for file in current.files() {
            if file.is_group() || file.kind() != IndexKind::Data {
                continue;
            }
            if !file.entries().any(|e| tombstones.contains(&e.ekey)) {
                continue;
            }
            opts.cancel.check()?;

            let kept: Vec<IndexEntry> = file
                .entries()
                .filter(|e| !tombstones.contains(&e.ekey))
                .collect();
            let bytes = IndexFile::serialize(&kept, IndexKind::Data, false);
            let new_name = Hash::of(&bytes);
            let old_name = file.checksum();

            debug!("Rewriting index {old_name} as {new_name} ({} entries kept)", kept.len());

            let old_blob = self.data_path(&old_name.to_string(), "");
            let new_blob = self.data_path(&new_name.to_string(), "");
            link_or_copy(&old_blob, &new_blob)?;

            let new_index = self.data_path(&new_name.to_string(), ".index");
            write_file_atomic(&new_index, &bytes)?;

            let old_index = self.data_path(&old_name.to_string(), ".index");
            fs::remove_file(&old_index)?;
            if opts.dispose {
                disposable.push(old_blob);
            }
        }

        Ok(disposable)
    }

    /// Write one archive blob and its index.
    fn write_archive(&self, records: &[&CasRecord]) -> Result<()> {
        let mut entries = Vec::with_capacity(records.len());
        let mut offset = 0u32;
        for record in records {
            entries.push(IndexEntry {
                ekey: record.ekey,
                size: record.data.len() as u32,
                offset,
                archive_index: None,
            });
            offset += record.data.len() as u32;
        }

        let index_bytes = IndexFile::serialize(&entries, IndexKind::Data, false);
        let name = Hash::of(&index_bytes).to_string();

        let blob_path = self.data_path(&name, "");
        let index_path = self.data_path(&name, ".index");
        fs::create_dir_all(blob_path.parent().expect("cdn paths are nested"))?;

        // Blob goes to a temp name first; the index must be durable before
        // the blob is renamed into place.
        let blob_tmp = tmp_path(&blob_path);
        let mut blob = File::create(&blob_tmp)?;
        for record in records {
            blob.write_all(&record.data)?;
        }
        blob.sync_all()?;
        drop(blob);

        write_file_atomic(&index_path, &index_bytes)?;
        fs::rename(&blob_tmp, &blob_path)?;

        debug!(
            "Wrote archive {name}: {} records, {offset} bytes",
            records.len()
        );
        Ok(())
    }

    /// Write a loose file under its own EKey in the data tree.
    pub fn write_loose(&self, ekey: &EKey, data: &[u8]) -> Result<()> {
        let path = self.data_path(&ekey.to_string(), "");
        fs::create_dir_all(path.parent().expect("cdn paths are nested"))?;
        write_file_atomic(&path, data)
    }

    fn data_path(&self, hash: &str, suffix: &str) -> PathBuf {
        cdn_path(&self.root, BlobKind::Data, hash, suffix)
    }
}

/// Greedy packing over records already sorted by EKey: seal the current
/// archive when the next record would exceed the cap, keeping global key
/// order within and across archives.
fn partition_by_size<'a, 'r>(
    records: &'a [&'r CasRecord],
    max_bytes: u64,
) -> Vec<&'a [&'r CasRecord]> {
    let mut partitions = Vec::new();
    let mut start = 0;
    let mut size = 0u64;

    for (i, record) in records.iter().enumerate() {
        let record_size = record.encoded_size();
        if size + record_size > max_bytes && size > 0 {
            partitions.push(&records[start..i]);
            start = i;
            size = 0;
        }
        size += record_size;
    }
    if start < records.len() {
        partitions.push(&records[start..]);
    }
    partitions
}

/// `path` plus a `.tmp` suffix on the file name.
fn tmp_path(path: &Path) -> PathBuf {
    let name = path.file_name().expect("file path").to_string_lossy();
    path.with_file_name(format!("{name}.tmp"))
}

/// Write via a temp file, fsync, then atomic rename.
fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    fs::create_dir_all(path.parent().expect("cdn paths are nested"))?;
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Link the blob under a second name, copying if the filesystem refuses.
fn link_or_copy(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to.parent().expect("cdn paths are nested"))?;
    if fs::hard_link(from, to).is_err() {
        fs::copy(from, to)?;
    }
    Ok(())
}
