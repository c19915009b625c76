//! Frame table parsing.
//!
//! Every BLTE stream starts with the magic, a header size, and (for
//! multi-frame streams) a frame table of encoded/plain sizes and checksums.
//! A header size of zero means the rest of the stream is a single frame.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;
use tracing::trace;

use crate::{Error, Result, BLTE_MAGIC};

/// Size of one frame record in the table.
const FRAME_RECORD_LEN: u32 = 4 + 4 + 16;

/// Information about a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Encoded size of the frame, including its mode byte.
    pub encoded_size: u32,

    /// Plaintext size of the frame. Zero for a headerless single frame,
    /// where the size is unknown until the frame is decoded.
    pub plain_size: u32,

    /// MD5 of the encoded frame bytes. Absent for headerless streams.
    pub checksum: Option<[u8; 16]>,

    /// Offset of the frame, relative to the start of the stream.
    pub encoded_offset: u64,

    /// Offset of the frame's plaintext within the decoded output.
    pub plain_offset: u64,
}

/// Parsed BLTE frame table.
#[derive(Debug, Clone)]
pub struct FrameTable {
    /// Offset where frame data starts (magic + header).
    pub data_offset: u64,

    /// Per-frame layout, in stream order.
    pub frames: Vec<FrameInfo>,

    /// Total plaintext size, if the stream carries a frame table.
    /// Headerless single-frame streams do not declare it.
    pub total_plain_size: Option<u64>,
}

impl FrameTable {
    /// Parse a frame table from the start of a BLTE stream of `length`
    /// bytes. The reader is left positioned at the first frame.
    pub fn parse<R: Read>(f: &mut R, length: u64) -> Result<Self> {
        if length < 8 {
            return Err(Error::Truncated {
                expected: 8,
                actual: length,
            });
        }

        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if magic != BLTE_MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let header_size = f.read_u32::<BigEndian>()?;
        if header_size == 0 {
            // Single frame, the rest of the stream is its payload.
            return Ok(Self {
                data_offset: 8,
                frames: vec![FrameInfo {
                    encoded_size: (length - 8) as u32,
                    plain_size: 0,
                    checksum: None,
                    encoded_offset: 8,
                    plain_offset: 0,
                }],
                total_plain_size: None,
            });
        }

        if u64::from(header_size) > length {
            return Err(Error::Truncated {
                expected: header_size.into(),
                actual: length,
            });
        }

        let flags_count = f.read_u32::<BigEndian>()?;
        let flags = (flags_count >> 24) as u8;
        if flags != 0x0F {
            return Err(Error::InvalidFrameTable(format!(
                "unexpected table flags {flags:#04x}"
            )));
        }

        let frame_count = flags_count & 0x00FF_FFFF;
        if frame_count == 0 {
            return Err(Error::InvalidFrameTable("zero frames".into()));
        }
        if header_size != 8 + 4 + frame_count * FRAME_RECORD_LEN {
            return Err(Error::InvalidFrameTable(format!(
                "header size {header_size} does not fit {frame_count} frames"
            )));
        }

        trace!("Parsing frame table with {frame_count} frames");

        let mut frames = Vec::with_capacity(frame_count as usize);
        let mut encoded_offset = u64::from(header_size);
        let mut plain_offset = 0u64;

        for _ in 0..frame_count {
            let encoded_size = f.read_u32::<BigEndian>()?;
            let plain_size = f.read_u32::<BigEndian>()?;
            let mut checksum = [0u8; 16];
            f.read_exact(&mut checksum)?;

            frames.push(FrameInfo {
                encoded_size,
                plain_size,
                checksum: Some(checksum),
                encoded_offset,
                plain_offset,
            });

            encoded_offset += u64::from(encoded_size);
            plain_offset += u64::from(plain_size);
        }

        // The frame table must account for the stream exactly.
        if encoded_offset != length {
            return Err(Error::Truncated {
                expected: encoded_offset,
                actual: length,
            });
        }

        Ok(Self {
            data_offset: header_size.into(),
            frames,
            total_plain_size: Some(plain_offset),
        })
    }

    /// Number of frames in the stream.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether this is a headerless single-frame stream.
    pub fn is_headerless(&self) -> bool {
        self.total_plain_size.is_none()
    }

    /// Find the frame containing plaintext offset `pos`, along with the
    /// offset inside that frame. Requires a frame table; headerless streams
    /// have a single frame at offset zero.
    pub fn locate_plain(&self, pos: u64) -> Option<(usize, u64)> {
        if self.is_headerless() {
            return Some((0, pos));
        }
        let total = self.total_plain_size?;
        if pos >= total {
            return None;
        }
        let idx = self
            .frames
            .partition_point(|fr| fr.plain_offset + u64::from(fr.plain_size) <= pos);
        let frame = &self.frames[idx];
        Some((idx, pos - frame.plain_offset))
    }
}
