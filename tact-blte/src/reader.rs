//! Streaming BLTE reader.
//!
//! Decodes frame by frame as the caller reads, without materializing the
//! whole plaintext. Supports seeking within the plaintext; a seek into an
//! earlier frame re-decodes that frame from its start.

use std::io::{Error as IoError, Read, Result as IoResult, Seek, SeekFrom};
use std::sync::Arc;
use tracing::trace;

use crate::{decode_frame, Error, FrameTable, Result};
use tact_crypto::KeyService;

/// Streaming reader over the plaintext of a BLTE stream.
///
/// The underlying source must be positioned at the start of the stream when
/// the reader is created; the stream occupies `stream_len` bytes of it.
pub struct BlteReader<R> {
    src: R,
    /// Position of the stream start within `src`.
    base: u64,
    stream_len: u64,
    table: FrameTable,
    keys: Option<Arc<KeyService>>,

    /// Decoded frame currently buffered, if any.
    current: Option<usize>,
    buf: Vec<u8>,

    /// Position within the plaintext.
    plain_pos: u64,
}

impl<R: Read + Seek> BlteReader<R> {
    /// Open a BLTE stream of `stream_len` bytes at the current position of
    /// `src`.
    pub fn new(mut src: R, stream_len: u64, keys: Option<Arc<KeyService>>) -> Result<Self> {
        let base = src.stream_position()?;
        let table = FrameTable::parse(&mut (&mut src).take(stream_len), stream_len)?;

        trace!(
            "Opened BLTE reader: {} frames, {} encoded bytes",
            table.frame_count(),
            stream_len
        );

        Ok(Self {
            src,
            base,
            stream_len,
            table,
            keys,
            current: None,
            buf: Vec::new(),
            plain_pos: 0,
        })
    }

    /// Total plaintext size.
    ///
    /// Headerless single-frame streams do not declare their plaintext size
    /// up front; for those the frame is decoded on first call.
    pub fn plain_len(&mut self) -> Result<u64> {
        if let Some(total) = self.table.total_plain_size {
            return Ok(total);
        }
        self.load_frame(0)?;
        Ok(self.buf.len() as u64)
    }

    /// Number of frames in the stream.
    pub fn frame_count(&self) -> usize {
        self.table.frame_count()
    }

    /// Decode frame `index` into the buffer, verifying its checksum.
    fn load_frame(&mut self, index: usize) -> Result<()> {
        if self.current == Some(index) {
            return Ok(());
        }

        let frame = &self.table.frames[index];
        self.src
            .seek(SeekFrom::Start(self.base + frame.encoded_offset))?;

        let mut encoded = vec![0u8; frame.encoded_size as usize];
        self.src.read_exact(&mut encoded)?;

        if let Some(expected) = frame.checksum {
            let actual = md5::compute(&encoded).0;
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }

        let plain = decode_frame(&encoded, index, self.keys.as_deref())?;
        if !self.table.is_headerless() && plain.len() as u32 != frame.plain_size {
            return Err(Error::Decompress(format!(
                "frame {index} decoded to {} bytes, table says {}",
                plain.len(),
                frame.plain_size
            )));
        }

        trace!("Loaded frame {index}: {} plaintext bytes", plain.len());
        self.buf = plain;
        self.current = Some(index);
        Ok(())
    }

    /// Locate `self.plain_pos`: the frame holding it and the offset inside.
    /// Returns `None` at or past end of plaintext.
    fn locate(&mut self) -> Result<Option<(usize, usize)>> {
        if self.table.is_headerless() {
            self.load_frame(0)?;
            if self.plain_pos < self.buf.len() as u64 {
                return Ok(Some((0, self.plain_pos as usize)));
            }
            return Ok(None);
        }
        Ok(self
            .table
            .locate_plain(self.plain_pos)
            .map(|(idx, off)| (idx, off as usize)))
    }
}

impl<R: Read + Seek> Read for BlteReader<R> {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        let mut written = 0;

        while written < out.len() {
            let Some((frame, offset)) = self.locate().map_err(IoError::other)? else {
                break;
            };
            self.load_frame(frame).map_err(IoError::other)?;

            let available = &self.buf[offset..];
            if available.is_empty() {
                break;
            }
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.plain_pos += n as u64;
        }

        Ok(written)
    }
}

impl<R: Read + Seek> Seek for BlteReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.plain_pos.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let len = self.plain_len().map_err(IoError::other)?;
                len.checked_add_signed(delta)
            }
        };

        let Some(target) = target else {
            return Err(IoError::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of plaintext",
            ));
        };

        self.plain_pos = target;
        Ok(target)
    }
}

impl<R> BlteReader<R> {
    /// Consume the reader and return the underlying source.
    pub fn into_inner(self) -> R {
        self.src
    }

    /// Encoded length of the stream.
    pub fn encoded_len(&self) -> u64 {
        self.stream_len
    }
}
