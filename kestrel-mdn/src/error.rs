use kestrel_common::{MimeError, error::DispositionParseError};
use kestrel_security::SecurityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdnError {
    /// `Disposition-Notification-Options` did not follow the grammar.
    #[error("Invalid disposition options '{value}': {reason}")]
    Options { value: String, reason: &'static str },

    /// Receipt body is not a disposition-notification report.
    #[error("Malformed MDN: {0}")]
    Malformed(String),

    #[error("MDN has no body")]
    MissingBody,

    #[error(transparent)]
    Mime(#[from] MimeError),

    #[error(transparent)]
    Disposition(#[from] DispositionParseError),

    /// Signing or verifying the receipt failed.
    #[error("MDN signature failure: {0}")]
    Security(#[from] SecurityError),
}
