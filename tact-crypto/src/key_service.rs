//! Registry of TACT encryption keys.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::CryptoError;

/// Registry of named 16-byte encryption keys.
///
/// Key names are 64-bit identifiers; on the wire they appear as 8
/// little-endian bytes inside encrypted BLTE frames.
#[derive(Default)]
pub struct KeyService {
    keys: HashMap<u64, [u8; 16]>,
}

impl KeyService {
    /// Create a key service with no registered keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a key by its 64-bit name.
    pub fn get_key(&self, name: u64) -> Option<&[u8; 16]> {
        self.keys.get(&name)
    }

    /// Get a key by its wire form: 8 little-endian name bytes.
    pub fn lookup(&self, name: [u8; 8]) -> Option<&[u8; 16]> {
        self.get_key(u64::from_le_bytes(name))
    }

    /// Register a key.
    pub fn add_key(&mut self, name: u64, key: [u8; 16]) {
        self.keys.insert(name, key);
    }

    /// Number of registered keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Load keys from a text file of `name key` lines.
    ///
    /// Both fields are hex: 16 characters for the name, 32 for the key.
    /// Blank lines and `#` comments are skipped; malformed lines are logged
    /// and skipped rather than failing the whole file.
    pub fn load_key_file(&mut self, path: &Path) -> Result<usize, CryptoError> {
        let content = fs::read_to_string(path)?;
        let mut loaded = 0;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(name), Some(key)) = (fields.next(), fields.next()) else {
                warn!("Skipping short key line {}: {line:?}", line_num + 1);
                continue;
            };

            match (parse_key_name(name), parse_key_hex(key)) {
                (Ok(name), Ok(key)) => {
                    self.add_key(name, key);
                    loaded += 1;
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Skipping key line {}: {e}", line_num + 1);
                }
            }
        }

        debug!("Loaded {loaded} keys from {path:?}");
        Ok(loaded)
    }
}

/// Parse a 16-hex-character key name into its 64-bit form.
pub fn parse_key_name(s: &str) -> Result<u64, CryptoError> {
    if s.len() != 16 {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "key name must be 16 hex chars, got {}",
            s.len()
        )));
    }
    u64::from_str_radix(s, 16)
        .map_err(|e| CryptoError::InvalidKeyMaterial(format!("bad key name {s:?}: {e}")))
}

/// Parse a 32-hex-character key value.
pub fn parse_key_hex(s: &str) -> Result<[u8; 16], CryptoError> {
    if s.len() != 32 {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "key must be 32 hex chars, got {}",
            s.len()
        )));
    }
    let mut key = [0u8; 16];
    for (i, chunk) in key.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|e| CryptoError::InvalidKeyMaterial(format!("bad key hex {s:?}: {e}")))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_add_and_lookup() {
        let mut service = KeyService::new();
        assert_eq!(service.key_count(), 0);

        service.add_key(0xFA505078126ACB3E, [0xAB; 16]);
        assert_eq!(service.key_count(), 1);
        assert_eq!(service.get_key(0xFA505078126ACB3E), Some(&[0xAB; 16]));
        assert_eq!(service.get_key(0xDEADBEEF), None);

        // Wire form is little-endian
        let wire = 0xFA505078126ACB3Eu64.to_le_bytes();
        assert_eq!(service.lookup(wire), Some(&[0xAB; 16]));
    }

    #[test]
    fn test_load_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# test keys").unwrap();
        writeln!(file, "fa505078126acb3e bdc51862abed79b2de48c8e7e66c6200").unwrap();
        writeln!(file, "not-a-key-line").unwrap();
        writeln!(file, "ff813f7d062ac0bc 4a914541ae69ce0bfbe5f54b52482d5a").unwrap();

        let mut service = KeyService::new();
        let loaded = service.load_key_file(file.path()).unwrap();

        assert_eq!(loaded, 2);
        assert!(service.get_key(0xFA505078126ACB3E).is_some());
        assert!(service.get_key(0xFF813F7D062AC0BC).is_some());
    }

    #[test]
    fn test_parse_key_material() {
        assert!(parse_key_name("fa505078126acb3e").is_ok());
        assert!(parse_key_name("fa50").is_err());
        assert!(parse_key_hex("bdc51862abed79b2de48c8e7e66c6200").is_ok());
        assert!(parse_key_hex("bdc518").is_err());
    }
}
