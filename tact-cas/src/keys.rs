//! Hashes and keys.
//!
//! Everything in a TACT repository is addressed by a 16-byte digest: a
//! content key (CKey) over plaintext, or an encoding key (EKey) over the
//! BLTE-encoded stream. Ordering is lexicographic by unsigned byte, which
//! is what index files and encoding pages are sorted by.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 16-byte digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 16]);

impl Hash {
    /// The all-zero hash, used as "no value".
    pub const EMPTY: Hash = Hash([0; 16]);

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// MD5 of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this is the distinguished empty hash. Lookups miss and
    /// writers skip on an empty hash.
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() != 32 {
            return Err(Error::BadHash(s.into()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::BadHash(s.into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

macro_rules! key_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub Hash);

        impl $name {
            pub fn new(bytes: [u8; 16]) -> Self {
                Self(Hash::new(bytes))
            }

            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                Hash::from_slice(bytes).map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                s.parse().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

key_newtype! {
    /// Content key: digest of the plaintext.
    CKey
}

key_newtype! {
    /// Encoding key: digest of the BLTE-encoded stream.
    EKey
}

/// Read a 40-bit big-endian integer from a 5-byte slice.
pub fn read_u40be(bytes: &[u8; 5]) -> u64 {
    let mut buf = [0u8; 8];
    buf[3..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Write a 40-bit big-endian integer. Values above 2^40 - 1 do not occur
/// in practice; the high bits are dropped.
pub fn write_u40be(value: u64) -> [u8; 5] {
    let bytes = value.to_be_bytes();
    bytes[3..].try_into().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let hash: Hash = "8b1a9953c4611296a827abf8c47804d7".parse().unwrap();
        assert_eq!(hash.to_string(), "8b1a9953c4611296a827abf8c47804d7");

        // Uppercase input is accepted, output stays lowercase
        let upper: Hash = "8B1A9953C4611296A827ABF8C47804D7".parse().unwrap();
        assert_eq!(upper, hash);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "8b1a".parse::<Hash>(),
            Err(Error::BadHash(_))
        ));
        assert!(matches!(
            "zz1a9953c4611296a827abf8c47804d7".parse::<Hash>(),
            Err(Error::BadHash(_))
        ));
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = Hash::new([0x00; 16]);
        let b = Hash::new([0x7F; 16]);
        let c = Hash::new([0xFF; 16]);
        assert!(a < b && b < c);

        let mut d = [0u8; 16];
        d[15] = 1;
        assert!(Hash::new(d) > a);
        assert!(Hash::new(d) < b);
    }

    #[test]
    fn test_empty_hash() {
        assert!(Hash::EMPTY.is_empty());
        assert!(EKey::default().is_empty());
        assert!(!Hash::of(b"x").is_empty());
    }

    #[test]
    fn test_md5_of() {
        assert_eq!(
            Hash::of(b"Hello").to_string(),
            "8b1a9953c4611296a827abf8c47804d7"
        );
    }

    #[test]
    fn test_u40_round_trip() {
        for value in [0u64, 1, 0xFF, 0x1234_5678, 0xFF_FFFF_FFFF] {
            assert_eq!(read_u40be(&write_u40be(value)), value);
        }
        assert_eq!(write_u40be(0x12_3456_789A), [0x12, 0x34, 0x56, 0x78, 0x9A]);
    }
}
