// src/hash.rs

//! Artifact digests
//!
//! Mirrors publish checksums in whichever algorithm their tooling emits, so
//! all three seen in the wild are accepted: SHA-256 (`SHA256SUMS`,
//! `*.sha256`), SHA-512, and MD5 from legacy `md5sum.txt` files. MD5 is only
//! ever compared against a digest somebody else published.

use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    /// Legacy manifests only
    Md5,
}

impl HashAlgorithm {
    /// Length of a digest in hex characters
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
            Self::Md5 => 32,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Md5 => "md5",
        }
    }

    /// Guess the algorithm of a bare hex digest from its length
    pub fn from_hex_len(len: usize) -> Option<Self> {
        [Self::Sha256, Self::Sha512, Self::Md5]
            .into_iter()
            .find(|a| a.hex_len() == len)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    /// Accepts `sha256`, `SHA-256`, `sha512`, `md5` in any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "md5" => Ok(Self::Md5),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("invalid digest length: expected {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("digest is not hex: {0}")]
    InvalidHex(String),
}

/// An expected or computed digest
///
/// `value` is always lowercase hex of the right length for `algorithm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Hash {
    /// Validate a hex digest for `algorithm`
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != algorithm.hex_len() {
            return Err(HashError::InvalidLength {
                expected: algorithm.hex_len(),
                got: value.len(),
            });
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self {
            algorithm,
            value: value.to_ascii_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Parse `algorithm:hex` (`sha256:ab12...`) or bare hex
    ///
    /// Bare hex gets its algorithm from its length.
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        let s = s.trim();
        let (algorithm, hex) = match s.split_once(':') {
            Some((name, hex)) => (name.parse()?, hex),
            None => {
                let algorithm =
                    HashAlgorithm::from_hex_len(s.len()).ok_or(HashError::InvalidLength {
                        expected: HashAlgorithm::Sha256.hex_len(),
                        got: s.len(),
                    })?;
                (algorithm, s)
            }
        };
        Self::new(algorithm, hex)
    }

    /// `sha256:<hex>`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }

    /// Whether `data` hashes to this digest
    pub fn matches(&self, data: &[u8]) -> bool {
        hash_bytes(self.algorithm, data).value == self.value
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_prefixed(s)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Streaming digest over any supported algorithm
pub enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha256(_) => HashAlgorithm::Sha256,
            Self::Sha512(_) => HashAlgorithm::Sha512,
            Self::Md5(_) => HashAlgorithm::Md5,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Hash {
        let algorithm = self.algorithm();
        let value = match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Sha512(h) => format!("{:x}", h.finalize()),
            Self::Md5(h) => format!("{:x}", h.finalize()),
        };
        Hash { algorithm, value }
    }
}

/// Digest of an in-memory buffer
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// SHA-256 of `data` as lowercase hex
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

/// Digest mismatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{algorithm} mismatch: expected {expected}, got {actual}")]
pub struct VerifyError {
    pub algorithm: HashAlgorithm,
    pub expected: String,
    pub actual: String,
}

/// Check `data` against `expected`, returning the computed digest
///
/// ```
/// use rbdeploy::hash::{verify_bytes, Hash, HashAlgorithm};
///
/// let expected = Hash::new(
///     HashAlgorithm::Sha256,
///     "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
/// )
/// .unwrap();
/// assert!(verify_bytes(b"hello world", &expected).is_ok());
/// assert!(verify_bytes(b"hello world!", &expected).is_err());
/// ```
pub fn verify_bytes(data: &[u8], expected: &Hash) -> Result<Hash, VerifyError> {
    let actual = hash_bytes(expected.algorithm, data);
    if actual.value == expected.value {
        return Ok(actual);
    }
    Err(VerifyError {
        algorithm: expected.algorithm,
        expected: expected.value.clone(),
        actual: actual.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    #[test]
    fn test_known_digests() {
        assert_eq!(sha256(b"hello world"), HELLO_SHA256);
        assert_eq!(hash_bytes(HashAlgorithm::Md5, b"hello world").value, HELLO_MD5);
        assert_eq!(hash_bytes(HashAlgorithm::Sha512, b"rockbox").value.len(), 128);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha512);
        hasher.update(b"rock");
        hasher.update(b"box");
        assert_eq!(hasher.finalize(), hash_bytes(HashAlgorithm::Sha512, b"rockbox"));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("SHA-512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert!("crc32".parse::<HashAlgorithm>().is_err());

        assert_eq!(HashAlgorithm::from_hex_len(32), Some(HashAlgorithm::Md5));
        assert_eq!(HashAlgorithm::from_hex_len(128), Some(HashAlgorithm::Sha512));
        assert_eq!(HashAlgorithm::from_hex_len(40), None);
    }

    #[test]
    fn test_new_rejects_bad_digests() {
        assert!(matches!(
            Hash::new(HashAlgorithm::Sha256, "abc123"),
            Err(HashError::InvalidLength { expected: 64, got: 6 })
        ));
        assert!(matches!(
            Hash::new(HashAlgorithm::Md5, "z".repeat(32)),
            Err(HashError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_parse_user_digest() {
        let hash: Hash = format!("SHA256:{}", HELLO_SHA256.to_uppercase()).parse().unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);
        assert_eq!(hash.value, HELLO_SHA256);

        let hash = Hash::parse_prefixed(HELLO_MD5).unwrap();
        assert_eq!(hash.to_prefixed_string(), format!("md5:{}", HELLO_MD5));
        assert!(hash.matches(b"hello world"));

        assert!(Hash::parse_prefixed("deadbeef").is_err());
        assert!(Hash::parse_prefixed("crc:00").is_err());
    }

    #[test]
    fn test_verify_bytes_mismatch() {
        let wrong = Hash::new(HashAlgorithm::Sha256, "0".repeat(64)).unwrap();
        let err = verify_bytes(b"hello world", &wrong).unwrap_err();
        assert_eq!(err.expected, "0".repeat(64));
        assert_eq!(err.actual, HELLO_SHA256);
        assert!(err.to_string().starts_with("sha256 mismatch"));
    }
}
