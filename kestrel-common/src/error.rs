//! Error types for the kestrel-common crate.

use thiserror::Error;

use crate::disposition::{Disposition, DispositionModifier};

/// Errors raised while parsing or assembling MIME entities.
#[derive(Debug, Error)]
pub enum MimeError {
    /// Header block could not be parsed.
    #[error("Invalid MIME headers: {0}")]
    Headers(#[from] mailparse::MailParseError),

    /// Entity is not a multipart, or is missing its boundary parameter.
    #[error("Not a multipart entity: {0}")]
    NotMultipart(String),

    /// Boundary delimiters are missing or out of order.
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// Body could not be decoded according to its transfer encoding.
    #[error("Unable to decode body: {0}")]
    Decode(String),
}

/// Disposition string did not follow
/// `<action>/<mdn-action>; <status>[/<modifier>[:<description>]]`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid disposition '{value}': {reason}")]
pub struct DispositionParseError {
    pub value: String,
    pub reason: &'static str,
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A non-success disposition, optionally carrying the failure that produced
/// it.
///
/// Whether the receipt is a warning or an error is a property of the
/// disposition itself; callers branch on [`Self::is_warning`].
#[derive(Debug, Error)]
#[error("{disposition}")]
pub struct DispositionError {
    disposition: Disposition,
    #[source]
    source: Option<BoxedSource>,
}

impl DispositionError {
    #[must_use]
    pub const fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            source: None,
        }
    }

    /// Attach the underlying failure for diagnostics.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub const fn disposition(&self) -> &Disposition {
        &self.disposition
    }

    #[must_use]
    pub fn into_disposition(self) -> Disposition {
        self.disposition
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.disposition.modifier() == Some(DispositionModifier::Warning)
    }
}
