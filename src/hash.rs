// src/hash.rs

//! Checksums for package integrity
//!
//! Release feeds publish two digests per artifact:
//! - **SHA-1**: always present, kept for older feeds and per-file delta sidecars
//! - **SHA-256**: preferred whenever the feed provides it
//!
//! Both are streamed so multi-gigabyte packages never sit in memory.

use crate::error::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Buffer size for streaming hashes (64 KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (160-bit), legacy feed checksum
    Sha1,
    /// SHA-256 (256-bit), preferred feed checksum
    #[default]
    Sha256,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("invalid hash length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex in hash: {0}")]
    InvalidHex(String),
}

/// A hash value with its algorithm
///
/// The hex value is always stored lowercase; comparisons against feed
/// values go through [`Hash::matches`], which ignores case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Hash {
    /// Create a validated hash value
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> std::result::Result<Self, HashError> {
        let value = value.into();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    fn new_unchecked(algorithm: HashAlgorithm, value: String) -> Self {
        Self { algorithm, value }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Case-insensitive comparison against an expected hex digest
    pub fn matches(&self, expected: &str) -> bool {
        self.value.eq_ignore_ascii_case(expected.trim())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(hasher) => hasher.update(data),
            HasherState::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Hash {
        let value = match self.state {
            HasherState::Sha1(hasher) => hex::encode(hasher.finalize()),
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
        };
        Hash::new_unchecked(self.algorithm, value)
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute hash of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute hash of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the hash of a file by streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> Result<Hash> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    hash_reader(algorithm, &mut file)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))
}

/// SHA-1 and SHA-256 of a file in a single pass
pub fn digest_file(path: &Path) -> Result<(Hash, Hash)> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut sha1 = Hasher::new(HashAlgorithm::Sha1);
    let mut sha256 = Hasher::new(HashAlgorithm::Sha256);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        sha1.update(&buffer[..n]);
        sha256.update(&buffer[..n]);
    }

    Ok((sha1.finalize(), sha256.finalize()))
}

/// Verify a file matches an expected hex digest (case-insensitive)
pub fn verify_file(path: &Path, expected: &str, algorithm: HashAlgorithm) -> Result<()> {
    let actual = hash_file(algorithm, path)?;
    if actual.matches(expected) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.to_lowercase(),
            actual: actual.value,
        })
    }
}

#[inline]
pub fn sha1(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha1, data).value
}

#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}
