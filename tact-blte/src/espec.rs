//! ESpec (encoding specification) strings.
//!
//! An ESpec describes the block layout used to encode a file: which frame
//! mode each region uses and how the plaintext is split into frames, e.g.
//! `b:{1M*=z,*=n}`. The encoding table interns one ESpec per encoded file so
//! writers can re-encode with the same schedule.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// One mebibyte, the upper bound for single-frame zlib encoding in
/// [`ESpec::default_for_len`].
const SINGLE_FRAME_LIMIT: u64 = 1024 * 1024;

/// Encoding specification describing how plaintext becomes BLTE frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ESpec {
    /// No compression ('n')
    None,
    /// ZLib compression ('z'), optionally with an explicit level
    ZLib { level: Option<u8> },
    /// Block table ('b'): the plaintext is split into sized chunks, each
    /// with its own nested spec
    Block { chunks: Vec<BlockChunk> },
}

/// One chunk of a block-table schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockChunk {
    /// Block sizing. `None` is the final `*` chunk covering the remainder
    /// of the input as a single frame.
    pub size: Option<BlockSize>,
    /// Spec applied to each frame of this chunk.
    pub spec: ESpec,
}

/// Frame sizing for a block chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize {
    /// Frame size in bytes.
    pub size: u64,
    /// Number of frames. `None` (written `<size>*`) repeats the size until
    /// the input is exhausted.
    pub count: Option<u32>,
}

impl ESpec {
    /// Parse an ESpec string.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser { input, pos: 0 };
        let spec = parser.parse_espec()?;
        if parser.pos != input.len() {
            return Err(Error::BadESpec(format!(
                "trailing input at position {}",
                parser.pos
            )));
        }
        Ok(spec)
    }

    /// The default write policy: single-frame zlib for inputs under 1 MiB,
    /// otherwise 256 KiB zlib frames.
    pub fn default_for_len(len: u64) -> Self {
        if len < SINGLE_FRAME_LIMIT {
            ESpec::ZLib { level: None }
        } else {
            ESpec::Block {
                chunks: vec![BlockChunk {
                    size: Some(BlockSize {
                        size: 256 * 1024,
                        count: None,
                    }),
                    spec: ESpec::ZLib { level: None },
                }],
            }
        }
    }
}

impl fmt::Display for ESpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ESpec::None => write!(f, "n"),
            ESpec::ZLib { level } => {
                write!(f, "z")?;
                if let Some(level) = level {
                    write!(f, ":{level}")?;
                }
                Ok(())
            }
            ESpec::Block { chunks } => {
                write!(f, "b:{{")?;
                for (i, chunk) in chunks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match &chunk.size {
                        Some(size) => write!(f, "{size}=")?,
                        None => write!(f, "*=")?,
                    }
                    write!(f, "{}", chunk.spec)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.size > 0 && self.size % (1024 * 1024) == 0 {
            write!(f, "{}M", self.size / (1024 * 1024))?;
        } else if self.size > 0 && self.size % 1024 == 0 {
            write!(f, "{}K", self.size / 1024)?;
        } else {
            write!(f, "{}", self.size)?;
        }
        match self.count {
            Some(count) => write!(f, "*{count}"),
            None => write!(f, "*"),
        }
    }
}

impl FromStr for ESpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume(&mut self, ch: char) -> Result<()> {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            Ok(())
        } else {
            Err(Error::BadESpec(format!(
                "expected {ch:?} at position {}",
                self.pos
            )))
        }
    }

    fn parse_number(&mut self) -> Result<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::BadESpec(format!(
                "expected number at position {}",
                self.pos
            )));
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|e| Error::BadESpec(format!("bad number: {e}")))
    }

    fn parse_espec(&mut self) -> Result<ESpec> {
        match self.peek() {
            Some('n') => {
                self.consume('n')?;
                Ok(ESpec::None)
            }
            Some('z') => self.parse_zlib(),
            Some('b') => self.parse_block(),
            other => Err(Error::BadESpec(format!(
                "unknown spec {other:?} at position {}",
                self.pos
            ))),
        }
    }

    fn parse_zlib(&mut self) -> Result<ESpec> {
        self.consume('z')?;
        if self.peek() != Some(':') {
            return Ok(ESpec::ZLib { level: None });
        }
        self.consume(':')?;
        let level = self.parse_number()? as u8;
        if level > 9 {
            return Err(Error::BadESpec(format!("zlib level {level} out of range")));
        }
        Ok(ESpec::ZLib { level: Some(level) })
    }

    fn parse_block(&mut self) -> Result<ESpec> {
        self.consume('b')?;
        self.consume(':')?;

        // `b:z` is shorthand for a single final chunk.
        if self.peek() != Some('{') {
            let spec = self.parse_espec()?;
            return Ok(ESpec::Block {
                chunks: vec![BlockChunk { size: None, spec }],
            });
        }

        self.consume('{')?;
        let mut chunks = Vec::new();
        loop {
            let size = if self.peek() == Some('*') {
                self.consume('*')?;
                None
            } else {
                Some(self.parse_block_size()?)
            };

            self.consume('=')?;
            let spec = self.parse_espec()?;
            chunks.push(BlockChunk { size, spec });

            if self.peek() == Some(',') {
                self.consume(',')?;
            } else {
                break;
            }
        }
        self.consume('}')?;

        Ok(ESpec::Block { chunks })
    }

    fn parse_block_size(&mut self) -> Result<BlockSize> {
        let mut size = self.parse_number()?;
        match self.peek() {
            Some('K') => {
                self.consume('K')?;
                size *= 1024;
            }
            Some('M') => {
                self.consume('M')?;
                size *= 1024 * 1024;
            }
            _ => {}
        }

        if size == 0 {
            return Err(Error::BadESpec("zero block size".into()));
        }

        // `<size>*<count>` is a fixed run; `<size>*` repeats to the end of
        // the input.
        let count = if self.peek() == Some('*') {
            self.consume('*')?;
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                Some(self.parse_number()? as u32)
            } else {
                None
            }
        } else {
            Some(1)
        };

        Ok(BlockSize { size, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_none() {
        let spec = ESpec::parse("n").unwrap();
        assert_eq!(spec, ESpec::None);
        assert_eq!(spec.to_string(), "n");
    }

    #[test]
    fn test_parse_zlib() {
        assert_eq!(ESpec::parse("z").unwrap(), ESpec::ZLib { level: None });
        assert_eq!(
            ESpec::parse("z:9").unwrap(),
            ESpec::ZLib { level: Some(9) }
        );
        assert!(ESpec::parse("z:12").is_err());
    }

    #[test]
    fn test_parse_block_repeating() {
        let spec = ESpec::parse("b:{1M*=z}").unwrap();
        let ESpec::Block { chunks } = &spec else {
            panic!("expected block spec");
        };
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].size,
            Some(BlockSize {
                size: 1024 * 1024,
                count: None
            })
        );
        assert_eq!(chunks[0].spec, ESpec::ZLib { level: None });
        assert_eq!(spec.to_string(), "b:{1M*=z}");
    }

    #[test]
    fn test_parse_block_schedule() {
        let spec = ESpec::parse("b:{256K=n,512K*2=z:6,*=z:9}").unwrap();
        let ESpec::Block { chunks } = &spec else {
            panic!("expected block spec");
        };
        assert_eq!(chunks.len(), 3);

        assert_eq!(
            chunks[0].size,
            Some(BlockSize {
                size: 256 * 1024,
                count: Some(1)
            })
        );
        assert_eq!(chunks[0].spec, ESpec::None);

        assert_eq!(
            chunks[1].size,
            Some(BlockSize {
                size: 512 * 1024,
                count: Some(2)
            })
        );
        assert_eq!(chunks[1].spec, ESpec::ZLib { level: Some(6) });

        assert!(chunks[2].size.is_none());
        assert_eq!(chunks[2].spec, ESpec::ZLib { level: Some(9) });
    }

    #[test]
    fn test_parse_block_shorthand() {
        let spec = ESpec::parse("b:z").unwrap();
        let ESpec::Block { chunks } = &spec else {
            panic!("expected block spec");
        };
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].size.is_none());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["n", "z", "z:6", "b:{1M*=z}", "b:{256K=n,*=z:9}", "b:{100=n,*=n}"] {
            let spec = ESpec::parse(s).unwrap();
            assert_eq!(ESpec::parse(&spec.to_string()).unwrap(), spec, "{s}");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ESpec::parse("").is_err());
        assert!(ESpec::parse("q").is_err());
        assert!(ESpec::parse("b:{1M=z,").is_err());
        assert!(ESpec::parse("b:{0=z}").is_err());
        assert!(ESpec::parse("n extra").is_err());
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(
            ESpec::default_for_len(5),
            ESpec::ZLib { level: None }
        );
        assert_eq!(
            ESpec::default_for_len(1024 * 1024 - 1),
            ESpec::ZLib { level: None }
        );
        assert_eq!(
            ESpec::default_for_len(3 * 1024 * 1024).to_string(),
            "b:{256K*=z}"
        );
    }
}
