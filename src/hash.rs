// src/hash.rs

//! Content digests for recipes and artifacts
//!
//! Every digest in biocook is SHA-256, rendered as `sha256:<hex>`. Recipe
//! checksums decide whether a stored artifact is current; artifact digests
//! identify package contents and image layers.

use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Prefix used when rendering digests
pub const DIGEST_PREFIX: &str = "sha256:";

/// A SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Build from a 64-character hex string
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != 64 {
            return Err(Error::ParseError(format!(
                "invalid digest length: expected 64, got {}",
                hex.len()
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("invalid hex in digest: {}", hex)));
        }
        Ok(Self { hex })
    }

    /// The bare hex value
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// A short prefix for log lines
    pub fn short(&self) -> &str {
        &self.hex[..12]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DIGEST_PREFIX, self.hex)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix(DIGEST_PREFIX).unwrap_or(s);
        Self::from_hex(hex)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Streaming hasher
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Feed a length-prefixed field so adjacent fields cannot alias
    pub fn update_field(&mut self, data: &[u8]) {
        self.inner.update((data.len() as u64).to_le_bytes());
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest {
            hex: hex::encode(self.inner.finalize()),
        }
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Digest of everything readable from `reader`
pub fn hash_reader<R: Read>(mut reader: R) -> Result<Digest> {
    let mut hasher = Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Digest of a file's contents
pub fn hash_file(path: &Path) -> Result<Digest> {
    let file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    hash_reader(io::BufReader::new(file))
}
