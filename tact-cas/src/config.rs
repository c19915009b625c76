//! Build configuration manifests.
//!
//! A build config is a `key = value` text file naming the system files of
//! a repository snapshot. Values referencing other files are hash pairs:
//! the content key followed by the encoding key. The engine reads the keys
//! it resolves through and writes back the encoding file's keys on commit.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::trace;

use crate::error::Result;
use crate::keys::{CKey, EKey};

/// Well-known build config keys.
pub mod keys {
    pub const ROOT: &str = "root";
    pub const INSTALL: &str = "install";
    pub const DOWNLOAD: &str = "download";
    pub const ENCODING: &str = "encoding";
}

/// Parsed build configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    values: BTreeMap<String, String>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from its text form. Unknown keys are kept verbatim
    /// and survive a round trip.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            trace!("Config entry: {} = {}", key.trim(), value.trim());
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    /// Content key of the root file.
    pub fn root_ckey(&self) -> Option<CKey> {
        self.hash_field(keys::ROOT, 0)
    }

    /// Content and encoding keys of the encoding file. The second hash of
    /// the pair is the EKey the file is actually stored under.
    pub fn encoding_keys(&self) -> Option<(CKey, EKey)> {
        let ckey = self.hash_field(keys::ENCODING, 0)?;
        let ekey = self.hash_field::<EKey>(keys::ENCODING, 1)?;
        Some((ckey, ekey))
    }

    /// The encoding file's EKey alone.
    pub fn encoding_ekey(&self) -> Option<EKey> {
        self.encoding_keys().map(|(_, ekey)| ekey)
    }

    /// Point the config at a new encoding file.
    pub fn set_encoding(&mut self, ckey: CKey, ekey: EKey) {
        self.set(keys::ENCODING, format!("{ckey} {ekey}"));
    }

    fn hash_field<T: std::str::FromStr>(&self, key: &str, index: usize) -> Option<T> {
        self.get(key)?
            .split_whitespace()
            .nth(index)?
            .parse()
            .ok()
    }

    /// Serialize back to the text form.
    pub fn serialize(&self) -> String {
        let mut out = String::from("# Build Configuration\n\n");
        for (key, value) in &self.values {
            let _ = writeln!(out, "{key} = {value}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Build Configuration

root = 44fa62dcc6ef75f8e0b2d7a123456789
encoding = 8b1a9953c4611296a827abf8c47804d7 aabbccddeeff00112233445566778899
install = 0011223344556677889900aabbccddee
build-name = 1.2.3.45678
";

    #[test]
    fn test_parse_fields() {
        let config = BuildConfig::parse(SAMPLE).unwrap();

        assert_eq!(
            config.root_ckey().unwrap().to_string(),
            "44fa62dcc6ef75f8e0b2d7a123456789"
        );
        let (ckey, ekey) = config.encoding_keys().unwrap();
        assert_eq!(ckey.to_string(), "8b1a9953c4611296a827abf8c47804d7");
        assert_eq!(ekey.to_string(), "aabbccddeeff00112233445566778899");
        assert_eq!(config.get("build-name"), Some("1.2.3.45678"));
    }

    #[test]
    fn test_missing_fields_are_none() {
        let config = BuildConfig::parse("root = 44fa62dcc6ef75f8e0b2d7a123456789\n").unwrap();
        assert!(config.encoding_keys().is_none());
        assert!(config.get("download").is_none());
    }

    #[test]
    fn test_set_encoding_round_trip() {
        let mut config = BuildConfig::parse(SAMPLE).unwrap();
        let ckey: CKey = "99999999999999999999999999999999".parse().unwrap();
        let ekey: EKey = "11111111111111111111111111111111".parse().unwrap();
        config.set_encoding(ckey, ekey);

        let reparsed = BuildConfig::parse(&config.serialize()).unwrap();
        assert_eq!(reparsed.encoding_keys(), Some((ckey, ekey)));
        // Untouched values survive
        assert_eq!(reparsed.get("build-name"), Some("1.2.3.45678"));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let config = BuildConfig::parse("# comment\n\nnot a pair\nkey = v\n").unwrap();
        assert_eq!(config.get("key"), Some("v"));
        assert!(config.get("not a pair").is_none());
    }
}
