//! Hashing functionality using BLAKE3.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Hash digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    #[default]
    Blake3,
}

impl Algorithm {
    /// Returns the canonical string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    /// Parse algorithm from string. Accepts the canonical name and the short
    /// family name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" | "blake3" => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Hash a file's contents.
    pub fn hash_file(&self, path: &Path) -> Result<Hash> {
        match self {
            Algorithm::Blake3 => Hash::hash_file(path),
        }
    }

    /// Combine an ordered sequence of strings into one digest.
    pub fn hash_parts<I, S>(&self, parts: I) -> Hash
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self {
            Algorithm::Blake3 => Hash::hash_parts(parts),
        }
    }
}

/// A 32-byte BLAKE3 hash digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash raw bytes using BLAKE3.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Hash(*hash.as_bytes())
    }

    /// Hash data from a reader using BLAKE3.
    fn hash_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut reader, &mut hasher)?;
        let hash = hasher.finalize();
        Ok(Hash(*hash.as_bytes()))
    }

    /// Hash a file using BLAKE3.
    pub fn hash_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::entry_io(path, e))?;
        Self::hash_reader(file).map_err(|e| match e {
            Error::Io { source } => Error::entry_io(path, source),
            other => other,
        })
    }

    /// Combine an ordered sequence of strings using BLAKE3.
    ///
    /// Each part is framed as its length (u64 LE) followed by its bytes, so
    /// `["ab", "c"]` and `["a", "bc"]` differ. The empty sequence hashes to
    /// the digest of empty input.
    pub fn hash_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            let bytes = part.as_ref().as_bytes();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Hash(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
