//! The encoding table.
//!
//! A two-section paged map translating content keys to encoding keys:
//! CKey pages hold `(plain size, [EKey…])` per content key, EKey pages
//! hold `(ESpec index, encoded size)` per encoding key, and a string pool
//! interns the ESpecs. The table itself is stored BLTE-encoded under its
//! own EKey, which the build config references.
//!
//! All integers are big-endian, unlike the index format.

use byteorder::{BigEndian, ReadBytesExt};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use tracing::{debug, warn};

use tact_blte::ESpec;

use crate::error::{Error, Result};
use crate::keys::{read_u40be, write_u40be, CKey, EKey};

const ENCODING_MAGIC: [u8; 2] = *b"EN";
const PAGE_SIZE_KB: u16 = 4;
const PAGE_SIZE: usize = PAGE_SIZE_KB as usize * 1024;

/// Fixed 25-byte EKey record: key, espec index, encoded size.
const EKEY_RECORD_LEN: usize = 16 + 4 + 5;

/// What the table knows about one content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CKeyEntry {
    /// Plaintext size; every referenced EKey decodes to exactly this many
    /// bytes.
    pub plain_size: u64,
    /// Equivalent encodings, in insertion order.
    pub ekeys: Vec<EKey>,
}

/// What the table knows about one encoding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EKeyEntry {
    pub espec_index: u32,
    pub encoded_size: u64,
}

/// In-memory encoding table, kept sorted for serialization.
#[derive(Default, Debug)]
pub struct EncodingTable {
    ckeys: BTreeMap<CKey, CKeyEntry>,
    ekeys: BTreeMap<EKey, EKeyEntry>,
    especs: Vec<String>,
    espec_ids: HashMap<String, u32>,
}

impl EncodingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a (BLTE-decoded) encoding table.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0u8; 2];
        cursor.read_exact(&mut magic)?;
        if magic != ENCODING_MAGIC {
            return Err(Error::BadMagic("encoding"));
        }

        let version = cursor.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let ckey_hash_size = cursor.read_u8()?;
        let ekey_hash_size = cursor.read_u8()?;
        if ckey_hash_size != 16 || ekey_hash_size != 16 {
            return Err(Error::Corrupt {
                what: "encoding_header",
                detail: format!("hash sizes {ckey_hash_size}/{ekey_hash_size}"),
            });
        }

        let ckey_page_size = cursor.read_u16::<BigEndian>()? as usize * 1024;
        let ekey_page_size = cursor.read_u16::<BigEndian>()? as usize * 1024;
        let ckey_page_count = cursor.read_u32::<BigEndian>()? as usize;
        let ekey_page_count = cursor.read_u32::<BigEndian>()? as usize;
        if (ckey_page_size == 0 && ckey_page_count > 0)
            || (ekey_page_size == 0 && ekey_page_count > 0)
        {
            return Err(Error::Corrupt {
                what: "encoding_header",
                detail: "zero page size".into(),
            });
        }

        let _unknown = cursor.read_u8()?;
        let espec_block_size = cursor.read_u32::<BigEndian>()? as usize;

        let mut espec_block = vec![0u8; espec_block_size];
        cursor.read_exact(&mut espec_block)?;
        let especs = parse_espec_pool(&espec_block)?;
        debug!("Parsed ESpec pool with {} entries", especs.len());

        let ckey_index = parse_page_index(&mut cursor, ckey_page_count)?;
        let mut ckeys = BTreeMap::new();
        for (page_num, (_, page_md5)) in ckey_index.iter().enumerate() {
            let mut page = vec![0u8; ckey_page_size];
            cursor.read_exact(&mut page)?;
            verify_page(&page, page_md5, page_num)?;
            parse_ckey_page(&page, &mut ckeys)?;
        }

        let ekey_index = parse_page_index(&mut cursor, ekey_page_count)?;
        let mut ekeys = BTreeMap::new();
        for (page_num, (_, page_md5)) in ekey_index.iter().enumerate() {
            let mut page = vec![0u8; ekey_page_size];
            cursor.read_exact(&mut page)?;
            verify_page(&page, page_md5, page_num)?;
            parse_ekey_page(&page, &mut ekeys)?;
        }

        debug!(
            "Parsed encoding table: {} content keys, {} encoding keys",
            ckeys.len(),
            ekeys.len()
        );

        let espec_ids = especs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();

        Ok(Self {
            ckeys,
            ekeys,
            especs,
            espec_ids,
        })
    }

    /// Look up a content key. Empty keys always miss.
    pub fn try_get_ckey(&self, ckey: &CKey) -> Option<&CKeyEntry> {
        if ckey.is_empty() {
            return None;
        }
        self.ckeys.get(ckey)
    }

    /// The ESpec an encoding key was produced with, for writers wanting to
    /// re-encode on the same schedule.
    pub fn try_get_espec(&self, ekey: &EKey) -> Option<&str> {
        if ekey.is_empty() {
            return None;
        }
        let entry = self.ekeys.get(ekey)?;
        self.especs.get(entry.espec_index as usize).map(String::as_str)
    }

    /// Encoded size of an encoding key's stream.
    pub fn try_get_encoded_size(&self, ekey: &EKey) -> Option<u64> {
        self.ekeys.get(ekey).map(|e| e.encoded_size)
    }

    pub fn ckey_count(&self) -> usize {
        self.ckeys.len()
    }

    pub fn ekey_count(&self) -> usize {
        self.ekeys.len()
    }

    /// Stage a record: a content key, its plaintext size, and the
    /// equivalent encodings `(EKey, encoded size)` produced under `espec`.
    ///
    /// First write wins on both halves, matching the archive staging rule.
    /// Records keyed by the empty hash are skipped.
    pub fn add(&mut self, ckey: CKey, plain_size: u64, ekeys: &[(EKey, u64)], espec: &ESpec) {
        if ckey.is_empty() {
            return;
        }

        let espec_index = self.intern(espec);

        let entry = CKeyEntry {
            plain_size,
            ekeys: ekeys.iter().map(|(k, _)| *k).collect(),
        };
        match self.ckeys.entry(ckey) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            std::collections::btree_map::Entry::Occupied(existing) => {
                if *existing.get() != entry {
                    warn!("Conflicting encoding entry for {ckey}; keeping the first");
                }
            }
        }

        for (ekey, encoded_size) in ekeys {
            if ekey.is_empty() {
                continue;
            }
            self.ekeys.entry(*ekey).or_insert(EKeyEntry {
                espec_index,
                encoded_size: *encoded_size,
            });
        }
    }

    fn intern(&mut self, espec: &ESpec) -> u32 {
        let text = espec.to_string();
        if let Some(&id) = self.espec_ids.get(&text) {
            return id;
        }
        let id = self.especs.len() as u32;
        self.especs.push(text.clone());
        self.espec_ids.insert(text, id);
        id
    }

    /// Serialize the table to its on-disk layout.
    pub fn write(&self) -> Vec<u8> {
        let espec_block: Vec<u8> = self
            .especs
            .iter()
            .flat_map(|s| s.bytes().chain(std::iter::once(0)))
            .collect();

        // CKey pages
        let mut ckey_pages: Vec<Vec<u8>> = Vec::new();
        let mut ckey_firsts: Vec<CKey> = Vec::new();
        for (ckey, entry) in &self.ckeys {
            let record_len = 1 + 5 + 16 + 16 * entry.ekeys.len();
            let fits = ckey_pages
                .last()
                .is_some_and(|page| page.len() + record_len <= PAGE_SIZE);
            if !fits {
                ckey_pages.push(Vec::with_capacity(PAGE_SIZE));
                ckey_firsts.push(*ckey);
            }

            let page = ckey_pages.last_mut().unwrap();
            page.push(entry.ekeys.len() as u8);
            page.extend_from_slice(&write_u40be(entry.plain_size));
            page.extend_from_slice(ckey.as_bytes());
            for ekey in &entry.ekeys {
                page.extend_from_slice(ekey.as_bytes());
            }
        }

        // EKey pages
        let mut ekey_pages: Vec<Vec<u8>> = Vec::new();
        let mut ekey_firsts: Vec<EKey> = Vec::new();
        for (ekey, entry) in &self.ekeys {
            let fits = ekey_pages
                .last()
                .is_some_and(|page| page.len() + EKEY_RECORD_LEN <= PAGE_SIZE);
            if !fits {
                ekey_pages.push(Vec::with_capacity(PAGE_SIZE));
                ekey_firsts.push(*ekey);
            }

            let page = ekey_pages.last_mut().unwrap();
            page.extend_from_slice(ekey.as_bytes());
            page.extend_from_slice(&entry.espec_index.to_be_bytes());
            page.extend_from_slice(&write_u40be(entry.encoded_size));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&ENCODING_MAGIC);
        out.push(1); // version
        out.push(16); // ckey hash size
        out.push(16); // ekey hash size
        out.extend_from_slice(&PAGE_SIZE_KB.to_be_bytes());
        out.extend_from_slice(&PAGE_SIZE_KB.to_be_bytes());
        out.extend_from_slice(&(ckey_pages.len() as u32).to_be_bytes());
        out.extend_from_slice(&(ekey_pages.len() as u32).to_be_bytes());
        out.push(0); // unknown
        out.extend_from_slice(&(espec_block.len() as u32).to_be_bytes());
        out.extend_from_slice(&espec_block);

        // Pages are padded to full size and checksummed over the padding.
        for (first, page) in ckey_firsts.iter().zip(&mut ckey_pages) {
            page.resize(PAGE_SIZE, 0);
            out.extend_from_slice(first.as_bytes());
            out.extend_from_slice(&md5::compute(&page).0);
        }
        for page in &ckey_pages {
            out.extend_from_slice(page);
        }
        for (first, page) in ekey_firsts.iter().zip(&mut ekey_pages) {
            page.resize(PAGE_SIZE, 0);
            out.extend_from_slice(first.as_bytes());
            out.extend_from_slice(&md5::compute(&page).0);
        }
        for page in &ekey_pages {
            out.extend_from_slice(page);
        }

        out
    }

    /// Serialize and BLTE-encode the table for storage. The resulting
    /// EKey is what the build config must reference.
    pub fn to_encoded(&self) -> Result<tact_blte::Encoded> {
        let bytes = self.write();
        let spec = ESpec::default_for_len(bytes.len() as u64);
        Ok(tact_blte::encode(&bytes, &spec)?)
    }
}

fn parse_espec_pool(block: &[u8]) -> Result<Vec<String>> {
    let mut especs = Vec::new();
    let mut rest = block;
    while let Some(nul) = rest.iter().position(|&b| b == 0) {
        let (text, tail) = rest.split_at(nul);
        especs.push(
            std::str::from_utf8(text)
                .map_err(|_| Error::Corrupt {
                    what: "espec_pool",
                    detail: "non-ASCII spec string".into(),
                })?
                .to_string(),
        );
        rest = &tail[1..];
    }
    if !rest.is_empty() {
        return Err(Error::Corrupt {
            what: "espec_pool",
            detail: "unterminated spec string".into(),
        });
    }
    Ok(especs)
}

fn parse_page_index<R: Read>(reader: &mut R, count: usize) -> Result<Vec<([u8; 16], [u8; 16])>> {
    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        let mut first = [0u8; 16];
        reader.read_exact(&mut first)?;
        let mut md5 = [0u8; 16];
        reader.read_exact(&mut md5)?;
        index.push((first, md5));
    }
    Ok(index)
}

fn verify_page(page: &[u8], expected: &[u8; 16], page_num: usize) -> Result<()> {
    let actual = md5::compute(page).0;
    if actual != *expected {
        return Err(Error::Corrupt {
            what: "encoding_page",
            detail: format!(
                "page {page_num}: expected {}, got {}",
                hex::encode(expected),
                hex::encode(actual)
            ),
        });
    }
    Ok(())
}

fn parse_ckey_page(page: &[u8], entries: &mut BTreeMap<CKey, CKeyEntry>) -> Result<()> {
    let mut offset = 0;
    while offset < page.len() {
        let key_count = page[offset] as usize;
        if key_count == 0 {
            break;
        }
        offset += 1;

        let record_len = 5 + 16 + 16 * key_count;
        if offset + record_len > page.len() {
            return Err(Error::Corrupt {
                what: "encoding_page",
                detail: "ckey record overruns page".into(),
            });
        }

        let plain_size = read_u40be(page[offset..offset + 5].try_into().unwrap());
        offset += 5;

        let ckey = CKey::from_slice(&page[offset..offset + 16]).unwrap();
        offset += 16;

        let mut ekeys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            ekeys.push(EKey::from_slice(&page[offset..offset + 16]).unwrap());
            offset += 16;
        }

        entries.insert(ckey, CKeyEntry { plain_size, ekeys });
    }
    Ok(())
}

fn parse_ekey_page(page: &[u8], entries: &mut BTreeMap<EKey, EKeyEntry>) -> Result<()> {
    let mut offset = 0;
    while offset + EKEY_RECORD_LEN <= page.len() {
        let ekey = EKey::from_slice(&page[offset..offset + 16]).unwrap();
        if ekey.is_empty() {
            break;
        }
        offset += 16;

        let espec_index = u32::from_be_bytes(page[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let encoded_size = read_u40be(page[offset..offset + 5].try_into().unwrap());
        offset += 5;

        entries.insert(ekey, EKeyEntry {
            espec_index,
            encoded_size,
        });
    }
    Ok(())
}
