//! The CAS read/write facade.
//!
//! `CasReader` resolves content through the two-level key translation:
//! CKey to EKeys through the encoding table, EKey to an archive slice
//! through the index set, then a BLTE reader over the slice. `CasWriter`
//! runs the same path in reverse and orchestrates the flush.
//!
//! Both borrow their collaborators; neither owns long-lived state beyond
//! the borrow.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::debug;

use tact_blte::{BlteReader, ESpec};
use tact_crypto::KeyService;

use crate::archive::{ArchiveStore, CasRecord, SaveOptions};
use crate::blob::{BlobKind, BlobSource, ReadSeek};
use crate::config::BuildConfig;
use crate::encoding::EncodingTable;
use crate::error::{Error, Result};
use crate::index::IndexSet;
use crate::keys::{CKey, EKey};

/// Read access to a repository snapshot.
pub struct CasReader<'a> {
    indices: &'a IndexSet,
    encoding: &'a EncodingTable,
    blobs: &'a dyn BlobSource,
    keys: Option<Arc<KeyService>>,
}

impl<'a> CasReader<'a> {
    pub fn new(
        indices: &'a IndexSet,
        encoding: &'a EncodingTable,
        blobs: &'a dyn BlobSource,
        keys: Option<Arc<KeyService>>,
    ) -> Self {
        Self {
            indices,
            encoding,
            blobs,
            keys,
        }
    }

    /// Open the BLTE-decoded plaintext stream behind an encoding key.
    ///
    /// Resolution order: an index hit opens the archive blob at the
    /// entry's offset; otherwise the key is tried as a loose file stored
    /// under its own hex name. A miss on both is `Ok(None)`. Every call
    /// opens an independent blob handle.
    pub fn open_by_ekey(&self, ekey: &EKey) -> Result<Option<BlteReader<Box<dyn ReadSeek>>>> {
        if ekey.is_empty() {
            return Ok(None);
        }

        if let Some(hit) = self.indices.try_get(ekey) {
            let mut handle = self.blobs.open(&hit.archive.to_string(), BlobKind::Data)?;
            handle.seek(SeekFrom::Start(hit.offset.into()))?;
            let reader = BlteReader::new(handle, hit.size.into(), self.keys.clone())?;
            return Ok(Some(reader));
        }

        // Loose files (system files such as the encoding table) are stored
        // directly under their EKey.
        match self.blobs.open(&ekey.to_string(), BlobKind::Data) {
            Ok(mut handle) => {
                let len = handle.seek(SeekFrom::End(0))?;
                handle.seek(SeekFrom::Start(0))?;
                Ok(Some(BlteReader::new(handle, len, self.keys.clone())?))
            }
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open the plaintext stream behind a content key.
    ///
    /// The encoding table lists the equivalent encodings; the first one
    /// whose archive is present wins.
    pub fn open_by_ckey(&self, ckey: &CKey) -> Result<Option<BlteReader<Box<dyn ReadSeek>>>> {
        let Some(entry) = self.encoding.try_get_ckey(ckey) else {
            return Ok(None);
        };

        for ekey in &entry.ekeys {
            if let Some(reader) = self.open_by_ekey(ekey)? {
                return Ok(Some(reader));
            }
            debug!("EKey {ekey} for {ckey} not resolvable, trying next");
        }
        Ok(None)
    }

    /// Read the full plaintext behind a content key.
    pub fn read_by_ckey(&self, ckey: &CKey) -> Result<Option<Vec<u8>>> {
        self.read_all(self.open_by_ckey(ckey)?)
    }

    /// Read the full plaintext behind an encoding key.
    pub fn read_by_ekey(&self, ekey: &EKey) -> Result<Option<Vec<u8>>> {
        self.read_all(self.open_by_ekey(ekey)?)
    }

    fn read_all(
        &self,
        reader: Option<BlteReader<Box<dyn ReadSeek>>>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = reader else {
            return Ok(None);
        };
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(Some(out))
    }
}

/// Write access: BLTE-encode, stage, and flush records.
pub struct CasWriter<'a> {
    store: &'a ArchiveStore,
    encoding: &'a mut EncodingTable,
}

impl<'a> CasWriter<'a> {
    pub fn new(store: &'a ArchiveStore, encoding: &'a mut EncodingTable) -> Self {
        Self { store, encoding }
    }

    /// Encode plaintext under the given spec and stage it for the next
    /// commit. Returns the record's keys. Staging the same plaintext and
    /// spec twice is a no-op.
    pub fn put(&mut self, plaintext: &[u8], spec: &ESpec) -> Result<(CKey, EKey)> {
        let encoded = tact_blte::encode(plaintext, spec)?;
        let ckey = CKey::new(encoded.ckey);
        let ekey = EKey::new(encoded.ekey);

        self.encoding.add(
            ckey,
            encoded.plain_size,
            &[(ekey, encoded.data.len() as u64)],
            spec,
        );
        self.store.enqueue(CasRecord {
            ckey,
            ekey,
            plain_size: encoded.plain_size,
            espec: spec.clone(),
            data: encoded.data,
        });

        Ok((ckey, ekey))
    }

    /// [`put`][Self::put] with the default block schedule for the input
    /// size.
    pub fn put_default(&mut self, plaintext: &[u8]) -> Result<(CKey, EKey)> {
        let spec = ESpec::default_for_len(plaintext.len() as u64);
        self.put(plaintext, &spec)
    }

    /// Flush everything staged: archives and their indices first, then the
    /// encoding table as the final artifact, stored loose under its EKey
    /// and written back to the build config.
    pub fn commit(&mut self, config: &mut BuildConfig, opts: &SaveOptions) -> Result<EKey> {
        self.store.save(opts)?;

        let encoded = self.encoding.to_encoded()?;
        opts.cancel.check()?;

        let ckey = CKey::new(encoded.ckey);
        let ekey = EKey::new(encoded.ekey);
        self.store.write_loose(&ekey, &encoded.data)?;
        config.set_encoding(ckey, ekey);

        debug!("Committed; encoding table stored as {ekey}");
        Ok(ekey)
    }
}
