//! BLTE encoding.
//!
//! Turns plaintext into a BLTE container according to an [`ESpec`] block
//! schedule, producing the content key (MD5 of the plaintext) and encoding
//! key (MD5 of the encoded stream) along the way.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::trace;

use crate::espec::{BlockSize, ESpec};
use crate::{Error, Result, BLTE_MAGIC};

/// A fully encoded BLTE stream.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// The complete container bytes.
    pub data: Vec<u8>,
    /// MD5 of the plaintext.
    pub ckey: [u8; 16],
    /// MD5 of `data`.
    pub ekey: [u8; 16],
    /// Plaintext size.
    pub plain_size: u64,
}

/// Cipher selector for [`encrypt_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    Salsa20,
    Arc4,
}

/// Encode plaintext into a BLTE container per the given spec.
///
/// A schedule that produces a single frame is written headerless
/// (`header_size = 0`); anything else gets a frame table with per-frame
/// MD5 checksums.
pub fn encode(plaintext: &[u8], spec: &ESpec) -> Result<Encoded> {
    let frames = build_frames(plaintext, spec)?;

    trace!(
        "Encoded {} bytes into {} frames ({})",
        plaintext.len(),
        frames.len(),
        spec
    );

    let data = assemble(&frames);
    Ok(Encoded {
        ckey: md5::compute(plaintext).0,
        ekey: md5::compute(&data).0,
        data,
        plain_size: plaintext.len() as u64,
    })
}

/// One encoded frame plus the plaintext length it covers.
struct Frame {
    encoded: Vec<u8>,
    plain_len: usize,
}

fn build_frames(plaintext: &[u8], spec: &ESpec) -> Result<Vec<Frame>> {
    match spec {
        ESpec::None | ESpec::ZLib { .. } => Ok(vec![Frame {
            encoded: encode_leaf(plaintext, spec)?,
            plain_len: plaintext.len(),
        }]),
        ESpec::Block { chunks } => {
            let mut frames = Vec::new();
            let mut rest = plaintext;

            for chunk in chunks {
                match chunk.size {
                    Some(BlockSize { size, count }) => {
                        let size = size as usize;
                        let mut remaining_frames = count;
                        // count = None repeats until the input runs out
                        while !rest.is_empty() && remaining_frames != Some(0) {
                            let take = size.min(rest.len());
                            let (block, tail) = rest.split_at(take);
                            frames.push(Frame {
                                encoded: encode_leaf(block, &chunk.spec)?,
                                plain_len: block.len(),
                            });
                            rest = tail;
                            if let Some(n) = remaining_frames {
                                remaining_frames = Some(n - 1);
                            }
                        }
                    }
                    None => {
                        // Final `*` chunk: everything left as one frame.
                        frames.push(Frame {
                            encoded: encode_leaf(rest, &chunk.spec)?,
                            plain_len: rest.len(),
                        });
                        rest = &[];
                    }
                }
            }

            if !rest.is_empty() {
                return Err(Error::BadESpec(format!(
                    "schedule leaves {} bytes uncovered",
                    rest.len()
                )));
            }
            if frames.is_empty() {
                // Zero-length input under a repeating schedule still needs
                // one frame to carry the (empty) plaintext.
                frames.push(Frame {
                    encoded: encode_leaf(&[], leaf_of(chunks)?)?,
                    plain_len: 0,
                });
            }
            Ok(frames)
        }
    }
}

/// The spec of the first chunk, for encoding degenerate empty input.
fn leaf_of(chunks: &[crate::espec::BlockChunk]) -> Result<&ESpec> {
    chunks
        .first()
        .map(|c| &c.spec)
        .ok_or_else(|| Error::BadESpec("empty block schedule".into()))
}

/// Encode one frame body with a non-block spec.
fn encode_leaf(block: &[u8], spec: &ESpec) -> Result<Vec<u8>> {
    match spec {
        ESpec::None => {
            let mut out = Vec::with_capacity(block.len() + 1);
            out.push(b'N');
            out.extend_from_slice(block);
            Ok(out)
        }
        ESpec::ZLib { level } => {
            let level = match level {
                Some(l) => Compression::new(u32::from(*l)),
                None => Compression::default(),
            };
            let mut encoder = ZlibEncoder::new(vec![b'Z'], level);
            encoder.write_all(block)?;
            Ok(encoder.finish()?)
        }
        ESpec::Block { .. } => Err(Error::BadESpec("nested block schedule".into())),
    }
}

fn assemble(frames: &[Frame]) -> Vec<u8> {
    if let [single] = frames {
        let mut data = Vec::with_capacity(8 + single.encoded.len());
        data.extend_from_slice(&BLTE_MAGIC);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&single.encoded);
        return data;
    }

    let header_size = 8 + 4 + 24 * frames.len() as u32;
    let body_len: usize = frames.iter().map(|f| f.encoded.len()).sum();

    let mut data = Vec::with_capacity(header_size as usize + body_len);
    data.extend_from_slice(&BLTE_MAGIC);
    data.extend_from_slice(&header_size.to_be_bytes());
    data.extend_from_slice(&(0x0F00_0000 | frames.len() as u32).to_be_bytes());

    for frame in frames {
        data.extend_from_slice(&(frame.encoded.len() as u32).to_be_bytes());
        data.extend_from_slice(&(frame.plain_len as u32).to_be_bytes());
        data.extend_from_slice(&md5::compute(&frame.encoded).0);
    }
    for frame in frames {
        data.extend_from_slice(&frame.encoded);
    }
    data
}

/// Wrap an already-encoded frame in mode-'E' encryption framing.
///
/// `inner` must be a complete encoded frame (mode byte + payload); the
/// result is `'E' | keyname_len | keyname | iv_len | iv | cipher |
/// ciphertext` and can take the inner frame's place in a container.
pub fn encrypt_frame(
    inner: &[u8],
    key_name: u64,
    key: &[u8; 16],
    iv: [u8; 4],
    method: EncryptionMethod,
    frame_index: usize,
) -> Vec<u8> {
    let (tag, ciphertext) = match method {
        EncryptionMethod::Salsa20 => (
            b'S',
            tact_crypto::salsa20::encrypt_salsa20(inner, key, &iv, frame_index)
                .expect("IV length is fixed at 4"),
        ),
        EncryptionMethod::Arc4 => (
            b'A',
            tact_crypto::arc4::encrypt_arc4(inner, key, &iv, frame_index)
                .expect("IV length is fixed at 4"),
        ),
    };

    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.push(b'E');
    out.push(8);
    out.extend_from_slice(&key_name.to_le_bytes());
    out.push(4);
    out.extend_from_slice(&iv);
    out.push(tag);
    out.extend_from_slice(&ciphertext);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;

    #[test]
    fn test_encode_raw_hello() {
        // 5-byte "Hello" with spec "n": headerless container, raw frame.
        let encoded = encode(b"Hello", &ESpec::None).unwrap();

        assert_eq!(
            encoded.data,
            [
                0x42, 0x4C, 0x54, 0x45, 0x00, 0x00, 0x00, 0x00, // BLTE, size 0
                0x4E, 0x48, 0x65, 0x6C, 0x6C, 0x6F, // 'N' "Hello"
            ]
        );
        assert_eq!(
            hex::encode(encoded.ckey),
            "8b1a9953c4611296a827abf8c47804d7"
        );
        assert_eq!(encoded.ekey, md5::compute(&encoded.data).0);
        assert_eq!(encoded.plain_size, 5);
    }

    #[test]
    fn test_encode_block_schedule_frames() {
        // 3 MiB split into 1 MiB zlib frames.
        let payload: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let spec = ESpec::parse("b:{1M*=z}").unwrap();
        let encoded = encode(&payload, &spec).unwrap();

        let table = crate::FrameTable::parse(
            &mut std::io::Cursor::new(&encoded.data),
            encoded.data.len() as u64,
        )
        .unwrap();
        assert_eq!(table.frame_count(), 3);
        assert_eq!(table.total_plain_size, Some(3 * 1024 * 1024));
        for frame in &table.frames {
            assert_eq!(frame.plain_size, 1024 * 1024);
            let start = frame.encoded_offset as usize;
            assert_eq!(encoded.data[start], b'Z');
        }

        assert_eq!(decode(&encoded.data, None).unwrap(), payload);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let payload = b"determinism matters for encoding keys";
        let spec = ESpec::parse("z").unwrap();

        let a = encode(payload, &spec).unwrap();
        let b = encode(payload, &spec).unwrap();
        assert_eq!(a.ekey, b.ekey);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_encode_counts_are_honored() {
        // 10 bytes: 2 frames of 3, then the rest as one raw frame.
        let spec = ESpec::parse("b:{3*2=n,*=n}").unwrap();
        let encoded = encode(b"0123456789", &spec).unwrap();

        let table = crate::FrameTable::parse(
            &mut std::io::Cursor::new(&encoded.data),
            encoded.data.len() as u64,
        )
        .unwrap();
        assert_eq!(table.frame_count(), 3);
        assert_eq!(table.frames[0].plain_size, 3);
        assert_eq!(table.frames[1].plain_size, 3);
        assert_eq!(table.frames[2].plain_size, 4);

        assert_eq!(decode(&encoded.data, None).unwrap(), b"0123456789");
    }

    #[test]
    fn test_schedule_must_cover_input() {
        let spec = ESpec::parse("b:{3*2=n}").unwrap();
        let err = encode(b"0123456789", &spec).unwrap_err();
        assert!(matches!(err, Error::BadESpec(_)));
    }

    #[test]
    fn test_empty_input() {
        let encoded = encode(b"", &ESpec::ZLib { level: None }).unwrap();
        assert_eq!(decode(&encoded.data, None).unwrap(), b"");
    }

    #[test]
    fn test_zlib_round_trip() {
        let payload: Vec<u8> = std::iter::repeat_n(b"abcdefgh", 1000)
            .flatten()
            .copied()
            .collect();
        let encoded = encode(&payload, &ESpec::ZLib { level: Some(9) }).unwrap();
        assert!(encoded.data.len() < payload.len());
        assert_eq!(decode(&encoded.data, None).unwrap(), payload);
    }
}
