//! Digest algorithms and values
//!
//! The algorithm is fixed at configuration time and recorded alongside every
//! persisted digest so that verification years later uses the algorithm that
//! was actually used.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Closed set of supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Digest size in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    pub fn hash(&self, bytes: &[u8]) -> Vec<u8> {
        let mut writer = DigestWriter::new(*self);
        writer.update(bytes);
        writer.finalize()
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA-256" | "sha256" => Ok(Self::Sha256),
            "SHA-512" | "sha512" => Ok(Self::Sha512),
            other => Err(format!("Unsupported digest algorithm: {}", other)),
        }
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum DigestWriter {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestWriter {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// A digest value paired with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDigest {
    pub algorithm: DigestAlgorithm,
    /// Lowercase hex encoding of the digest bytes.
    pub value: String,
}

impl CanonicalDigest {
    pub fn of_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex::encode(algorithm.hash(bytes)),
        }
    }

    /// Raw digest bytes, when the hex value is well-formed.
    pub fn raw(&self) -> Option<Vec<u8>> {
        hex::decode(&self.value).ok()
    }
}

impl std::fmt::Display for CanonicalDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.value)
    }
}
