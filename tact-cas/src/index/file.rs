//! Archive index files.
//!
//! An index is a sorted, paged map from EKey to a byte range inside one
//! archive blob. Pages are fixed at 4 KiB for mmap-style random access;
//! a table of contents holds the last EKey and a truncated MD5 per page,
//! and a fixed-size footer seals the whole structure. The file is named
//! after the MD5 of its own contents, so rewriting any page renames the
//! file.

use std::fmt;

use crate::error::{Error, Result};
use crate::keys::{EKey, Hash};

/// Page size in bytes. The footer stores it in KiB.
pub const PAGE_SIZE: usize = 4096;

const PAGE_SIZE_KB: u16 = 4;
const TOC_ENTRY_LEN: usize = 16 + 8;
const FOOTER_LEN: usize = 35;

/// Offset of the checksum over the leading footer fields.
const FOOTER_CHECKSUM_OFFSET: usize = 19;

/// Entry layout: EKey, size, offset, with an archive selector inserted
/// between size and offset in group indices.
const ENTRY_LEN: usize = 16 + 4 + 4;
const GROUP_ENTRY_LEN: usize = 16 + 4 + 2 + 4;

/// What an index covers. Stored in `flags_0` of the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Archive blobs of packed records
    Data = 0,
    /// Loose files stored under their own EKey
    Loose = 1,
    /// Patch content
    Patch = 2,
}

impl IndexKind {
    fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::Data),
            1 => Some(Self::Loose),
            2 => Some(Self::Patch),
            _ => None,
        }
    }
}

/// One index entry: a slice of an archive blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub ekey: EKey,
    /// Size of the slice in bytes.
    pub size: u32,
    /// Byte offset inside the archive blob.
    pub offset: u32,
    /// Which archive holds the slice; present only in group indices.
    pub archive_index: Option<u16>,
}

/// A parsed index file, held as raw pages plus its table of contents.
/// Lookups binary-search the TOC and then the page, touching two pages of
/// the raw block.
pub struct IndexFile {
    checksum: Hash,
    kind: IndexKind,
    group: bool,
    toc: Vec<(EKey, [u8; 8])>,
    pages: Vec<u8>,
}

impl IndexFile {
    /// Parse and validate an index file.
    ///
    /// The footer is validated first, then the TOC checksum, then every
    /// page checksum. Any mismatch fails this file with
    /// [`Error::Corrupt`]; the caller decides whether the surrounding scan
    /// continues.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FOOTER_LEN {
            return Err(Error::Corrupt {
                what: "index_footer",
                detail: format!("{} bytes is too short for a footer", data.len()),
            });
        }

        let footer = &data[data.len() - FOOTER_LEN..];
        let expected = &footer[FOOTER_CHECKSUM_OFFSET..];
        let actual = md5::compute(&footer[..FOOTER_CHECKSUM_OFFSET]).0;
        if expected != actual {
            return Err(Error::Corrupt {
                what: "footer_checksum",
                detail: format!(
                    "expected {}, got {}",
                    hex::encode(expected),
                    hex::encode(actual)
                ),
            });
        }

        let version = footer[8];
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }
        if footer[9] != 16 || footer[10] != 8 {
            return Err(Error::Corrupt {
                what: "index_footer",
                detail: format!("key_size {} / checksum_size {}", footer[9], footer[10]),
            });
        }

        let kind = IndexKind::from_flag(footer[11]).ok_or(Error::Corrupt {
            what: "index_footer",
            detail: format!("unknown kind flag {}", footer[11]),
        })?;
        let group = footer[12] & 0x01 != 0;

        let page_size_kb = u16::from_le_bytes(footer[13..15].try_into().unwrap());
        if page_size_kb != PAGE_SIZE_KB {
            return Err(Error::Corrupt {
                what: "index_footer",
                detail: format!("page size {page_size_kb} KiB"),
            });
        }

        let num_pages = u32::from_le_bytes(footer[15..19].try_into().unwrap()) as usize;
        let pages_len = num_pages * PAGE_SIZE;
        let toc_len = num_pages * TOC_ENTRY_LEN;
        if pages_len + toc_len + FOOTER_LEN != data.len() {
            return Err(Error::Corrupt {
                what: "index_layout",
                detail: format!("{num_pages} pages do not fit {} bytes", data.len()),
            });
        }

        let toc_bytes = &data[pages_len..pages_len + toc_len];
        let toc_checksum = md5::compute(toc_bytes).0;
        if footer[..8] != toc_checksum[..8] {
            return Err(Error::Corrupt {
                what: "toc_checksum",
                detail: format!(
                    "expected {}, got {}",
                    hex::encode(&footer[..8]),
                    hex::encode(&toc_checksum[..8])
                ),
            });
        }

        let mut toc = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let entry = &toc_bytes[i * TOC_ENTRY_LEN..(i + 1) * TOC_ENTRY_LEN];
            let last_ekey = EKey::from_slice(&entry[..16]).unwrap();
            let page_md5: [u8; 8] = entry[16..].try_into().unwrap();

            let page = &data[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];
            let actual = md5::compute(page).0;
            if actual[..8] != page_md5 {
                return Err(Error::Corrupt {
                    what: "page_checksum",
                    detail: format!(
                        "page {i}: expected {}, got {}",
                        hex::encode(page_md5),
                        hex::encode(&actual[..8])
                    ),
                });
            }

            toc.push((last_ekey, page_md5));
        }

        Ok(Self {
            checksum: Hash::of(data),
            kind,
            group,
            toc,
            pages: data[..pages_len].to_vec(),
        })
    }

    /// Serialize sorted entries into index-file bytes.
    ///
    /// Entries must be strictly increasing by EKey; `group` selects the
    /// wider entry layout carrying `archive_index`.
    pub fn serialize(entries: &[IndexEntry], kind: IndexKind, group: bool) -> Vec<u8> {
        debug_assert!(entries.windows(2).all(|w| w[0].ekey < w[1].ekey));

        let entry_len = if group { GROUP_ENTRY_LEN } else { ENTRY_LEN };
        let per_page = PAGE_SIZE / entry_len;
        let num_pages = entries.len().div_ceil(per_page);

        let mut pages = Vec::with_capacity(num_pages * PAGE_SIZE);
        let mut toc = Vec::with_capacity(num_pages * TOC_ENTRY_LEN);

        for chunk in entries.chunks(per_page) {
            let page_start = pages.len();
            for entry in chunk {
                pages.extend_from_slice(entry.ekey.as_bytes());
                pages.extend_from_slice(&entry.size.to_be_bytes());
                if group {
                    pages.extend_from_slice(&entry.archive_index.unwrap_or(0).to_be_bytes());
                }
                pages.extend_from_slice(&entry.offset.to_be_bytes());
            }
            pages.resize(page_start + PAGE_SIZE, 0);

            let page_md5 = md5::compute(&pages[page_start..]).0;
            toc.extend_from_slice(chunk.last().unwrap().ekey.as_bytes());
            toc.extend_from_slice(&page_md5[..8]);
        }

        let mut data = pages;
        data.extend_from_slice(&toc);

        let mut footer = [0u8; FOOTER_LEN];
        footer[..8].copy_from_slice(&md5::compute(&toc).0[..8]);
        footer[8] = 1; // version
        footer[9] = 16; // key size
        footer[10] = 8; // checksum size
        footer[11] = kind as u8;
        footer[12] = if group { 0x01 } else { 0x00 };
        footer[13..15].copy_from_slice(&PAGE_SIZE_KB.to_le_bytes());
        footer[15..19].copy_from_slice(&(num_pages as u32).to_le_bytes());
        let footer_checksum = md5::compute(&footer[..FOOTER_CHECKSUM_OFFSET]).0;
        footer[FOOTER_CHECKSUM_OFFSET..].copy_from_slice(&footer_checksum);

        data.extend_from_slice(&footer);
        data
    }

    /// MD5 of the file contents; also the filename stem and, for data
    /// indices, the name of the archive blob it covers.
    pub fn checksum(&self) -> Hash {
        self.checksum
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_group(&self) -> bool {
        self.group
    }

    pub fn num_pages(&self) -> usize {
        self.toc.len()
    }

    fn entry_len(&self) -> usize {
        if self.group {
            GROUP_ENTRY_LEN
        } else {
            ENTRY_LEN
        }
    }

    /// Decode the entry at `slot` of `page`. Returns `None` for padding.
    fn slot(&self, page: usize, slot: usize) -> Option<IndexEntry> {
        let entry_len = self.entry_len();
        let start = page * PAGE_SIZE + slot * entry_len;
        let bytes = &self.pages[start..start + entry_len];

        let ekey = EKey::from_slice(&bytes[..16]).unwrap();
        if ekey.is_empty() {
            return None;
        }

        let size = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
        let (archive_index, offset_at) = if self.group {
            let archive = u16::from_be_bytes(bytes[20..22].try_into().unwrap());
            (Some(archive), 22)
        } else {
            (None, 20)
        };
        let offset = u32::from_be_bytes(bytes[offset_at..offset_at + 4].try_into().unwrap());

        Some(IndexEntry {
            ekey,
            size,
            offset,
            archive_index,
        })
    }

    /// Number of used slots in `page`. Padding is all-zero and entries are
    /// a prefix, so this is a binary search for the first empty slot.
    fn used_slots(&self, page: usize) -> usize {
        let per_page = PAGE_SIZE / self.entry_len();
        let mut lo = 0;
        let mut hi = per_page;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.slot(page, mid).is_some() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary-search for an entry: TOC by last EKey, then the page.
    pub fn try_get(&self, ekey: &EKey) -> Option<IndexEntry> {
        let page = self.toc.partition_point(|(last, _)| last < ekey);
        if page == self.toc.len() {
            return None;
        }

        let mut lo = 0;
        let mut hi = self.used_slots(page);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = self.slot(page, mid).unwrap();
            match entry.ekey.cmp(ekey) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(entry),
            }
        }
        None
    }

    /// Iterate all entries in EKey order.
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.num_pages()).flat_map(move |page| {
            (0..self.used_slots(page)).map(move |slot| self.slot(page, slot).unwrap())
        })
    }
}

impl fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexFile")
            .field("checksum", &self.checksum)
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("pages", &self.num_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seed: u8, size: u32, offset: u32) -> IndexEntry {
        IndexEntry {
            ekey: EKey::new([seed; 16]),
            size,
            offset,
            archive_index: None,
        }
    }

    fn sample_entries(count: u8) -> Vec<IndexEntry> {
        (1..=count).map(|i| entry(i, 100, u32::from(i) * 100)).collect()
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let entries = sample_entries(5);
        let data = IndexFile::serialize(&entries, IndexKind::Data, false);

        let index = IndexFile::parse(&data).unwrap();
        assert_eq!(index.kind(), IndexKind::Data);
        assert!(!index.is_group());
        assert_eq!(index.num_pages(), 1);
        assert_eq!(index.checksum(), Hash::of(&data));
        assert_eq!(index.entries().collect::<Vec<_>>(), entries);
    }

    #[test]
    fn test_lookup_across_pages() {
        // 400 entries at 170 per page = 3 pages
        let entries: Vec<IndexEntry> = (0u32..400)
            .map(|i| {
                let mut key = [0u8; 16];
                key[..4].copy_from_slice(&(i + 1).to_be_bytes());
                IndexEntry {
                    ekey: EKey::new(key),
                    size: 64,
                    offset: i * 64,
                    archive_index: None,
                }
            })
            .collect();

        let data = IndexFile::serialize(&entries, IndexKind::Data, false);
        let index = IndexFile::parse(&data).unwrap();
        assert_eq!(index.num_pages(), 3);

        for wanted in [&entries[0], &entries[169], &entries[170], &entries[399]] {
            assert_eq!(index.try_get(&wanted.ekey), Some(*wanted));
        }

        let absent = EKey::new([0xFF; 16]);
        assert_eq!(index.try_get(&absent), None);
    }

    #[test]
    fn test_group_entries_round_trip() {
        let entries: Vec<IndexEntry> = (1u8..=10)
            .map(|i| IndexEntry {
                ekey: EKey::new([i; 16]),
                size: 500,
                offset: u32::from(i) * 500,
                archive_index: Some(u16::from(i) % 3),
            })
            .collect();

        let data = IndexFile::serialize(&entries, IndexKind::Data, true);
        let index = IndexFile::parse(&data).unwrap();
        assert!(index.is_group());

        let found = index.try_get(&EKey::new([7; 16])).unwrap();
        assert_eq!(found.archive_index, Some(1));
        assert_eq!(found.offset, 3500);
    }

    #[test]
    fn test_corrupt_page_fails_parse() {
        let data = IndexFile::serialize(&sample_entries(5), IndexKind::Data, false);

        let mut bad = data.clone();
        bad[17] ^= 0xFF;

        let err = IndexFile::parse(&bad).unwrap_err();
        assert!(
            matches!(err, Error::Corrupt { what: "page_checksum", .. }),
            "actual error: {err:?}"
        );
    }

    #[test]
    fn test_corrupt_footer_fails_parse() {
        let data = IndexFile::serialize(&sample_entries(3), IndexKind::Data, false);

        let mut bad = data.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let err = IndexFile::parse(&bad).unwrap_err();
        assert!(
            matches!(err, Error::Corrupt { what: "footer_checksum", .. }),
            "actual error: {err:?}"
        );
    }

    #[test]
    fn test_corrupt_toc_fails_parse() {
        let data = IndexFile::serialize(&sample_entries(3), IndexKind::Data, false);

        // First TOC byte sits right after the single page
        let mut bad = data.clone();
        bad[PAGE_SIZE] ^= 0xFF;

        let err = IndexFile::parse(&bad).unwrap_err();
        assert!(
            matches!(err, Error::Corrupt { what: "toc_checksum", .. }),
            "actual error: {err:?}"
        );
    }

    #[test]
    fn test_truncated_file() {
        let err = IndexFile::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::Corrupt { what: "index_footer", .. }));
    }
}
