//! Message Integrity Check.
//!
//! A MIC is a digest over a MIME entity plus the algorithm that produced it,
//! written as `<base64 digest>, <algorithm>`.
//!
//! Whether the entity's headers are part of the digest input is the caller's
//! call: per RFC 4130 section 7.3.1 headers are included exactly when the
//! message is signed, encrypted or compressed. Unprotected messages hash
//! only their content, since intermediaries may rewrite their headers.

use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::STANDARD};
use kestrel_common::{MimeBody, message::normalize_mic};

use crate::{algorithm::DigestAlgorithm, error::MicError};

#[derive(Debug, Clone, Eq)]
pub struct Mic {
    digest: Vec<u8>,
    algorithm: DigestAlgorithm,
    legacy_label: bool,
}

impl Mic {
    #[must_use]
    pub const fn new(digest: Vec<u8>, algorithm: DigestAlgorithm) -> Self {
        Self {
            digest,
            algorithm,
            legacy_label: false,
        }
    }

    /// Digest `body`, optionally including its header block.
    #[must_use]
    pub fn compute(body: &MimeBody, algorithm: DigestAlgorithm, include_headers: bool) -> Self {
        let mut hasher = algorithm.hasher();
        if include_headers {
            hasher.update(body.header_block().as_bytes());
        }
        hasher.update(body.content());

        Self::new(hasher.finalize(), algorithm)
    }

    /// Render the algorithm with its RFC 3851 name (`sha1`) instead of the
    /// RFC 5751 one (`sha-1`).
    #[must_use]
    pub const fn with_legacy_label(mut self, legacy: bool) -> Self {
        self.legacy_label = legacy;
        self
    }

    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

/// Algorithm naming is irrelevant to equality: `sha1` and `sha-1` denote the
/// same digest.
impl PartialEq for Mic {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

impl fmt::Display for Mic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}",
            STANDARD.encode(&self.digest),
            self.algorithm.label(self.legacy_label)
        )
    }
}

impl FromStr for Mic {
    type Err = MicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut tokens = value
            .split([',', ' ', '\t', '\r', '\n'])
            .filter(|token| !token.is_empty());

        let (Some(digest), Some(algorithm)) = (tokens.next(), tokens.next()) else {
            return Err(MicError::MissingSeparator(value.to_string()));
        };

        let digest = STANDARD.decode(digest)?;
        let legacy_label = DigestAlgorithm::is_legacy_label(algorithm);
        let algorithm = algorithm
            .parse::<DigestAlgorithm>()
            .map_err(|_| MicError::UnknownAlgorithm(algorithm.to_string()))?;

        Ok(Self {
            digest,
            algorithm,
            legacy_label,
        })
    }
}

/// Compare a stored MIC with one reported by a partner.
///
/// Both sides are parsed and compared alias-aware. If either fails to parse,
/// the whitespace-stripped texts are compared instead.
#[must_use]
pub fn mic_matches(expected: &str, received: &str) -> bool {
    match (expected.parse::<Mic>(), received.parse::<Mic>()) {
        (Ok(expected), Ok(received)) => expected == received,
        _ => normalize_mic(expected).eq_ignore_ascii_case(&normalize_mic(received)),
    }
}
