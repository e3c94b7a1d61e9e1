//! Error types for the kestrel-security crate.

use std::io;

use kestrel_common::{DispositionReason, MimeError};
use thiserror::Error;

/// MIC text could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MicError {
    /// Expected `<base64>, <algorithm>`.
    #[error("MIC '{0}' is missing the algorithm separator")]
    MissingSeparator(String),

    #[error("MIC digest is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("MIC uses unknown digest algorithm '{0}'")]
    UnknownAlgorithm(String),
}

/// Failure inside an S/MIME provider operation.
#[derive(Debug, Error)]
pub enum SmimeError {
    /// Entity is not the structure the operation expects.
    #[error("Malformed S/MIME entity: {0}")]
    Malformed(String),

    /// Signature does not match the content under the given certificate.
    #[error("Signature does not verify against certificate '{0}'")]
    BadSignature(String),

    /// Enveloped data was not encrypted for the supplied certificate.
    #[error("Enveloped data is not addressed to certificate '{0}'")]
    NotRecipient(String),

    #[error(transparent)]
    Mime(#[from] MimeError),

    #[error("Invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Stages of the inbound pipeline that map to their own failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundStage {
    Decrypt,
    Verify,
    Decompress,
}

impl InboundStage {
    #[must_use]
    pub const fn disposition_reason(self) -> DispositionReason {
        match self {
            Self::Decrypt => DispositionReason::DecryptionFailed,
            Self::Verify => DispositionReason::IntegrityCheckFailed,
            Self::Decompress => DispositionReason::DecompressionFailed,
        }
    }
}

impl std::fmt::Display for InboundStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Decrypt => "decrypt",
            Self::Verify => "verify",
            Self::Decompress => "decompress",
        })
    }
}

#[derive(Debug, Error)]
pub enum SecurityError {
    /// Partnership names an algorithm this engine does not know.
    #[error("Unknown {kind} algorithm '{name}'")]
    UnknownAlgorithm { kind: &'static str, name: String },

    /// Partnership lacks the identity needed to find a certificate.
    #[error("Partnership has no {0} x509_alias")]
    MissingAlias(&'static str),

    #[error("No certificate for alias '{0}'")]
    MissingCertificate(String),

    #[error("No private key for alias '{0}'")]
    MissingPrivateKey(String),

    #[error("Unable to load certificate material for '{alias}': {source}")]
    CertificateLoad {
        alias: String,
        #[source]
        source: io::Error,
    },

    #[error("Signing failed: {0}")]
    Sign(#[source] SmimeError),

    #[error("Signature verification failed: {0}")]
    Verify(#[source] SmimeError),

    #[error("Encryption failed: {0}")]
    Encrypt(#[source] SmimeError),

    #[error("Decryption failed: {0}")]
    Decrypt(#[source] SmimeError),

    #[error("Compression failed: {0}")]
    Compress(#[source] SmimeError),

    #[error("Decompression failed: {0}")]
    Decompress(#[source] SmimeError),

    /// An inbound stage failed before the codec ran, e.g. our own key is
    /// missing. Reported with the stage's disposition reason.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: InboundStage,
        #[source]
        source: Box<SecurityError>,
    },

    /// Content claims compression after a compression layer was already
    /// removed.
    #[error("Message is compressed more than once")]
    DoubleCompression,

    /// Body missing where the pipeline needs one.
    #[error("Message has no body")]
    MissingBody,

    #[error("Unable to dump decrypted content to {path}: {source}")]
    Dump {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Mic(#[from] MicError),

    #[error(transparent)]
    Mime(#[from] MimeError),
}

impl SecurityError {
    /// Raised before any cryptographic step ran, from policy or key material
    /// problems. Never worth retrying.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownAlgorithm { .. }
                | Self::MissingAlias(_)
                | Self::MissingCertificate(_)
                | Self::MissingPrivateKey(_)
                | Self::CertificateLoad { .. }
        )
    }

    /// Reason code reported in an error MDN for inbound failures.
    #[must_use]
    pub const fn disposition_reason(&self) -> DispositionReason {
        match self {
            Self::Decrypt(_) => DispositionReason::DecryptionFailed,
            Self::Verify(_) => DispositionReason::IntegrityCheckFailed,
            Self::Decompress(_) | Self::DoubleCompression => DispositionReason::DecompressionFailed,
            Self::Stage { stage, .. } => stage.disposition_reason(),
            _ => DispositionReason::UnexpectedProcessingError,
        }
    }
}
