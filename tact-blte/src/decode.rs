//! BLTE decoding.
//!
//! Handles all frame modes, verifying the frame-table checksum of every
//! frame before its payload is touched.

use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read};
use tracing::trace;

use crate::{Error, FrameMode, FrameTable, Result};
use tact_crypto::{arc4::decrypt_arc4, salsa20::decrypt_salsa20, KeyService};

/// Decode a complete BLTE stream to its plaintext.
pub fn decode(data: &[u8], keys: Option<&KeyService>) -> Result<Vec<u8>> {
    let table = FrameTable::parse(&mut Cursor::new(data), data.len() as u64)?;

    trace!("Decoding BLTE stream with {} frames", table.frame_count());

    let mut result = Vec::with_capacity(table.total_plain_size.unwrap_or(0) as usize);

    for (index, frame) in table.frames.iter().enumerate() {
        let start = frame.encoded_offset as usize;
        let end = start + frame.encoded_size as usize;
        let encoded = &data[start..end];

        if let Some(expected) = frame.checksum {
            let actual = md5::compute(encoded).0;
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }

        let plain = decode_frame(encoded, index, keys)?;
        if !table.is_headerless() && plain.len() as u32 != frame.plain_size {
            return Err(Error::Decompress(format!(
                "frame {index} decoded to {} bytes, table says {}",
                plain.len(),
                frame.plain_size
            )));
        }
        result.extend_from_slice(&plain);
    }

    Ok(result)
}

/// Decode a single encoded frame (mode byte + payload).
///
/// `frame_index` feeds the cipher IV schedule for encrypted frames.
pub fn decode_frame(data: &[u8], frame_index: usize, keys: Option<&KeyService>) -> Result<Vec<u8>> {
    let Some((&mode_byte, payload)) = data.split_first() else {
        return Err(Error::Truncated {
            expected: 1,
            actual: 0,
        });
    };

    let mode = FrameMode::from_byte(mode_byte).ok_or(Error::UnknownMode(mode_byte))?;
    trace!("Decoding frame {frame_index} with mode {mode:?}");

    match mode {
        FrameMode::Raw => Ok(payload.to_vec()),
        FrameMode::ZLib => decode_zlib(payload),
        FrameMode::Nested => decode(payload, keys),
        FrameMode::Encrypted => decode_encrypted(payload, frame_index, keys),
    }
}

fn decode_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| Error::Decompress(format!("zlib: {e}")))?;
    Ok(result)
}

/// Mode 'E': `keyname_len(1) | keyname[8] | iv_len(1) | iv[4] | cipher(1) |
/// ciphertext`, where the decrypted ciphertext is itself an encoded frame.
fn decode_encrypted(
    data: &[u8],
    frame_index: usize,
    keys: Option<&KeyService>,
) -> Result<Vec<u8>> {
    // 1 + 8 + 1 + 4 + 1 of framing plus at least the inner mode byte
    if data.len() < 16 {
        return Err(Error::InvalidEncryptedFrame(format!(
            "{} bytes is too short",
            data.len()
        )));
    }

    let keyname_len = data[0] as usize;
    if keyname_len != 8 {
        return Err(Error::InvalidEncryptedFrame(format!(
            "key name length {keyname_len}, expected 8"
        )));
    }
    let mut keyname = [0u8; 8];
    keyname.copy_from_slice(&data[1..9]);

    let iv_len = data[9] as usize;
    if iv_len != 4 {
        return Err(Error::InvalidEncryptedFrame(format!(
            "IV length {iv_len}, expected 4"
        )));
    }
    let iv = &data[10..14];
    let cipher = data[14];
    let ciphertext = &data[15..];

    let name = u64::from_le_bytes(keyname);
    let key = keys
        .and_then(|k| k.lookup(keyname))
        .ok_or(Error::MissingKey(name))?;

    trace!("Decrypting frame {frame_index} with key {name:#018x}, cipher {cipher:#04x}");

    let decrypted = match cipher {
        b'S' => decrypt_salsa20(ciphertext, key, iv, frame_index)?,
        b'A' => decrypt_arc4(ciphertext, key, iv, frame_index)?,
        other => {
            return Err(Error::InvalidEncryptedFrame(format!(
                "unknown cipher {other:#04x}"
            )))
        }
    };

    // The plaintext of the cipher is another encoded frame.
    decode_frame(&decrypted, frame_index, keys)
}
