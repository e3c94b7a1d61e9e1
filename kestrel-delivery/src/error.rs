//! Typed error handling for AS2 processing.
//!
//! Every lower level failure is converted into an [`As2Error`] exactly once,
//! and classified through [`As2Error::kind`]:
//! - transport and HTTP failures are retried by the resend queue
//! - configuration and partnership lookup failures never are
//! - inbound failures map to the disposition reported in the error MDN

use std::{fmt, io};

use kestrel_common::{Disposition, DispositionError, DispositionReason};
use kestrel_mdn::MdnError;
use kestrel_partnership::PartnershipError;
use kestrel_security::SecurityError;
use kestrel_spool::SpoolError;
use thiserror::Error;

pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure categories, independent of where the failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    DecryptionFailed,
    IntegrityCheckFailed,
    DecompressionFailed,
    AuthenticationFailed,
    PartnershipNotFound,
    ValidationFailed,
    StorageFailed,
    HttpResponse,
    TransportIo,
    UnexpectedProcessing,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::DecryptionFailed => "decryption-failed",
            Self::IntegrityCheckFailed => "integrity-check-failed",
            Self::DecompressionFailed => "decompression-failed",
            Self::AuthenticationFailed => "authentication-failed",
            Self::PartnershipNotFound => "partnership-not-found",
            Self::ValidationFailed => "validation-failed",
            Self::StorageFailed => "storage-failed",
            Self::HttpResponse => "http-response",
            Self::TransportIo => "transport-io",
            Self::UnexpectedProcessing => "unexpected-processing-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum As2Error {
    /// A required policy field is missing. Raised before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Partnership(#[from] PartnershipError),

    /// No partnership exists for the identities on an inbound request.
    #[error("Unknown partner {from} -> {to}: {source}")]
    AuthenticationFailed {
        from: String,
        to: String,
        #[source]
        source: PartnershipError,
    },

    #[error(transparent)]
    Mdn(#[from] MdnError),

    #[error("Pending receipt store failed: {0}")]
    Spool(#[from] SpoolError),

    #[error("Validation rejected message: {0}")]
    ValidationFailed(#[source] BoxedSource),

    #[error("Storing message failed: {0}")]
    StorageFailed(#[source] BoxedSource),

    /// Partner answered with a non-2xx status.
    #[error("HTTP {status} {reason}")]
    HttpResponse { status: u16, reason: String },

    #[error("Transport failed: {0}")]
    Transport(#[from] io::Error),

    /// Receipt reported something other than success.
    #[error("Receipt disposition: {0}")]
    Disposition(#[from] DispositionError),

    /// Receipt MIC differs from the MIC computed at send time.
    #[error("Receipt MIC '{}' does not match sent MIC '{expected}'", received.as_deref().unwrap_or("<none>"))]
    MicMismatch {
        expected: String,
        received: Option<String>,
    },

    #[error("Unexpected processing error: {0}")]
    Unexpected(String),
}

impl As2Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Security(err) => security_kind(err),
            Self::Partnership(PartnershipError::NotFound(_)) => ErrorKind::PartnershipNotFound,
            Self::Partnership(_) => ErrorKind::Configuration,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::Mdn(MdnError::Security(err)) if err.is_configuration() => {
                ErrorKind::Configuration
            }
            Self::Mdn(MdnError::Security(_)) | Self::MicMismatch { .. } => {
                ErrorKind::IntegrityCheckFailed
            }
            Self::Spool(SpoolError::Validation(_)) => ErrorKind::Configuration,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::StorageFailed(_) => ErrorKind::StorageFailed,
            Self::HttpResponse { .. } => ErrorKind::HttpResponse,
            Self::Transport(_) => ErrorKind::TransportIo,
            Self::Mdn(_) | Self::Spool(_) | Self::Disposition(_) | Self::Unexpected(_) => {
                ErrorKind::UnexpectedProcessing
            }
        }
    }

    /// Transport and HTTP failures are handed to the resend queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::HttpResponse | ErrorKind::TransportIo)
    }

    /// Configuration and partnership lookup failures.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::PartnershipNotFound
        )
    }

    /// A warning disposition ends processing of the message without counting
    /// as a failure.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Disposition(err) if err.is_warning())
    }

    /// Disposition to report in the receipt for this failure.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        if let Self::Disposition(err) = self {
            return err.disposition().clone();
        }

        let reason = match self {
            Self::Security(err) => err.disposition_reason(),
            other => match other.kind() {
                ErrorKind::DecryptionFailed => DispositionReason::DecryptionFailed,
                ErrorKind::IntegrityCheckFailed => DispositionReason::IntegrityCheckFailed,
                ErrorKind::DecompressionFailed => DispositionReason::DecompressionFailed,
                ErrorKind::AuthenticationFailed => DispositionReason::AuthenticationFailed,
                _ => DispositionReason::UnexpectedProcessingError,
            },
        };
        Disposition::error(reason)
    }
}

fn security_kind(err: &SecurityError) -> ErrorKind {
    if err.is_configuration() {
        return ErrorKind::Configuration;
    }

    match err.disposition_reason() {
        DispositionReason::DecryptionFailed => ErrorKind::DecryptionFailed,
        DispositionReason::IntegrityCheckFailed => ErrorKind::IntegrityCheckFailed,
        DispositionReason::DecompressionFailed => ErrorKind::DecompressionFailed,
        _ => ErrorKind::UnexpectedProcessing,
    }
}
