//! ARC4 cipher variant for encrypted BLTE frames in older repositories.

use rc4::consts::U32;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::CryptoError;
use crate::Result;

/// Decrypt a frame with the composite-key ARC4 construction:
/// RC4 key = base key (16) + IV (4) + little-endian frame index (4),
/// zero-padded to 32 bytes.
pub fn decrypt_arc4(data: &[u8], key: &[u8; 16], iv: &[u8], frame_index: usize) -> Result<Vec<u8>> {
    if iv.len() != 4 {
        return Err(CryptoError::InvalidIvSize {
            expected: 4,
            actual: iv.len(),
        });
    }

    let mut arc4_key = [0u8; 32];
    arc4_key[..16].copy_from_slice(key);
    arc4_key[16..20].copy_from_slice(iv);
    arc4_key[20..24].copy_from_slice(&(frame_index as u32).to_le_bytes());

    let mut cipher: Rc4<U32> = Rc4::new(&arc4_key.into());
    let mut output = data.to_vec();
    cipher.apply_keystream(&mut output);

    Ok(output)
}

/// Encrypt a frame with the composite-key ARC4 construction.
pub fn encrypt_arc4(data: &[u8], key: &[u8; 16], iv: &[u8], frame_index: usize) -> Result<Vec<u8>> {
    decrypt_arc4(data, key, iv, frame_index)
}
