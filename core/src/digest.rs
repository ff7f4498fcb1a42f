//! Content digests.
//!
//! A digest is an algorithm-prefixed hex string such as `sha256:ab12...`.
//! Blob files on disk are named by the hex part only so names stay
//! filesystem-safe.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::{Result, TagbagError};

/// Digest algorithms the store can compute and verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Algorithm prefix as it appears in a digest string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded hash.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    /// Start an incremental hash for this algorithm.
    pub fn hasher(&self) -> Hasher {
        match self {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = TagbagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(TagbagError::InvalidDigest(format!(
                "unsupported algorithm '{}'",
                other
            ))),
        }
    }
}

/// Incremental hasher producing a [`Digest`].
pub enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Digest {
        match self {
            Hasher::Sha256(h) => Digest {
                algorithm: Algorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Hasher::Sha512(h) => Digest {
                algorithm: Algorithm::Sha512,
                hex: hex::encode(h.finalize()),
            },
        }
    }
}

/// Algorithm-prefixed content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl PartialOrd for Algorithm {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Algorithm {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Digest {
    /// Parse and validate `algorithm:hex`.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, hex) = s.split_once(':').ok_or_else(|| {
            TagbagError::InvalidDigest(format!("'{}': expected algorithm:hex", s))
        })?;
        let algorithm: Algorithm = algo.parse()?;
        if hex.len() != algorithm.hex_len() || !is_lower_hex(hex) {
            return Err(TagbagError::InvalidDigest(format!(
                "'{}': expected {} lowercase hex characters",
                s,
                algorithm.hex_len()
            )));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// SHA-256 digest of a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Algorithm::Sha256.hasher();
        hasher.update(data);
        hasher.finish()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Hex part, used as the blob file name.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl FromStr for Digest {
    type Err = TagbagError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Whether a file name looks like a blob file: the hex part of a sha256 or
/// sha512 digest.
pub fn is_digest_name(name: &str) -> bool {
    [Algorithm::Sha256, Algorithm::Sha512]
        .iter()
        .any(|algorithm| name.len() == algorithm.hex_len())
        && name.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str =
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_from_bytes() {
        let d = Digest::from_bytes(b"hello");
        assert_eq!(d.to_string(), HELLO_SHA256);
        assert_eq!(d.algorithm(), Algorithm::Sha256);
        assert_eq!(d.hex().len(), 64);
    }

    #[test]
    fn test_parse_roundtrip_display() {
        let d = Digest::parse(HELLO_SHA256).unwrap();
        assert_eq!(d, Digest::from_bytes(b"hello"));
    }

    #[test]
    fn test_parse_rejects_missing_algorithm() {
        let err = Digest::parse("2cf24dba").unwrap_err();
        assert!(err.to_string().contains("expected algorithm:hex"));
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        assert!(Digest::parse("md5:abc").is_err());
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        assert!(Digest::parse("sha256:abc123").is_err());
    }

    #[test]
    fn test_parse_rejects_uppercase_hex() {
        let upper = HELLO_SHA256.to_uppercase().replace("SHA256", "sha256");
        assert!(Digest::parse(&upper).is_err());
    }

    #[test]
    fn test_sha512_hasher() {
        let mut hasher = Algorithm::Sha512.hasher();
        hasher.update(b"hel");
        hasher.update(b"lo");
        let d = hasher.finish();
        assert_eq!(d.algorithm(), Algorithm::Sha512);
        assert_eq!(d.hex().len(), 128);
        assert!(Digest::parse(&d.to_string()).is_ok());
    }

    #[test]
    fn test_serde() {
        let d = Digest::from_bytes(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO_SHA256));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<Digest>("\"nope\"").is_err());
    }

    #[test]
    fn test_is_digest_name() {
        assert!(is_digest_name(Digest::from_bytes(b"x").hex()));
        assert!(!is_digest_name("manifest.json"));
        assert!(!is_digest_name("version"));
        assert!(!is_digest_name(&"g".repeat(64)));
    }

    #[test]
    fn test_is_digest_name_sha512() {
        assert!(is_digest_name(&"a".repeat(128)));
        assert!(!is_digest_name(&"a".repeat(96)));
        assert!(!is_digest_name(&"a".repeat(129)));
    }
}
