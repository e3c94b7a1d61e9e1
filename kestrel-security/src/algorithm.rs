//! Algorithm identifiers used in partnership attributes, MIC values and
//! S/MIME content types.
//!
//! Digest names exist in two spellings: RFC 3851 (`sha1`, `sha256`) and
//! RFC 5751 (`sha-1`, `sha-256`). Both parse to the same
//! [`DigestAlgorithm`]; which one is written depends on the partnership's
//! `rename_digest_to_old_name` flag.

use std::{fmt, str::FromStr};

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::SecurityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [Self; 6] = [
        Self::Md5,
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    /// RFC 5751 label, or the RFC 3851 one when `legacy` is set.
    #[must_use]
    pub const fn label(self, legacy: bool) -> &'static str {
        match (self, legacy) {
            (Self::Md5, _) => "md5",
            (Self::Sha1, false) => "sha-1",
            (Self::Sha1, true) => "sha1",
            (Self::Sha224, false) => "sha-224",
            (Self::Sha224, true) => "sha224",
            (Self::Sha256, false) => "sha-256",
            (Self::Sha256, true) => "sha256",
            (Self::Sha384, false) => "sha-384",
            (Self::Sha384, true) => "sha384",
            (Self::Sha512, false) => "sha-512",
            (Self::Sha512, true) => "sha512",
        }
    }

    /// Whether `label` is the RFC 3851 spelling.
    #[must_use]
    pub fn is_legacy_label(label: &str) -> bool {
        let label = label.trim();
        label.to_ascii_lowercase().starts_with("sha") && !label.contains('-')
    }

    #[must_use]
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// One-shot digest.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(false))
    }
}

impl FromStr for DigestAlgorithm {
    type Err = SecurityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|alg| normalized == alg.label(false) || normalized == alg.label(true))
            .ok_or_else(|| SecurityError::UnknownAlgorithm {
                kind: "digest",
                name: value.to_string(),
            })
    }
}

/// Incremental digest over one of the supported algorithms.
#[derive(Debug, Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    TripleDes,
    Rc2,
    Aes128,
    Aes192,
    Aes256,
}

impl EncryptionAlgorithm {
    pub const ALL: [Self; 5] = [
        Self::TripleDes,
        Self::Rc2,
        Self::Aes128,
        Self::Aes192,
        Self::Aes256,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TripleDes => "3des",
            Self::Rc2 => "rc2",
            Self::Aes128 => "aes128",
            Self::Aes192 => "aes192",
            Self::Aes256 => "aes256",
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = SecurityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], "");
        let normalized = normalized.strip_suffix("cbc").unwrap_or(&normalized);
        Self::ALL
            .into_iter()
            .find(|alg| normalized == alg.label())
            .ok_or_else(|| SecurityError::UnknownAlgorithm {
                kind: "encryption",
                name: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionType {
    Zlib,
}

impl CompressionType {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CompressionType {
    type Err = SecurityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case("zlib") {
            Ok(Self::Zlib)
        } else {
            Err(SecurityError::UnknownAlgorithm {
                kind: "compression",
                name: value.to_string(),
            })
        }
    }
}
