//! MDN disposition values (RFC 3798 / RFC 4130 section 7.4.3).
//!
//! Grammar handled here:
//!
//! ```text
//! <action>/<mdn-action>; <status>[/<status-modifier>[:<description>]]
//! ```
//!
//! A disposition is a success only when the status is `processed` and no
//! modifier is present. A `warning` modifier still stops processing of the
//! message, but is reported separately from hard errors. Any other modifier,
//! such as `failure`, is error class.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{DispositionError, DispositionParseError};

pub const AUTOMATIC_ACTION: &str = "automatic-action";
pub const MDN_SENT_AUTOMATICALLY: &str = "MDN-sent-automatically";
pub const PROCESSED: &str = "processed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispositionModifier {
    Error,
    Warning,
}

impl DispositionModifier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// Machine-readable failure reasons defined for AS2 receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispositionReason {
    AuthenticationFailed,
    DecompressionFailed,
    DecryptionFailed,
    InsufficientMessageSecurity,
    IntegrityCheckFailed,
    UnexpectedProcessingError,
}

impl DispositionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication-failed",
            Self::DecompressionFailed => "decompression-failed",
            Self::DecryptionFailed => "decryption-failed",
            Self::InsufficientMessageSecurity => "insufficient-message-security",
            Self::IntegrityCheckFailed => "integrity-check-failed",
            Self::UnexpectedProcessingError => "unexpected-processing-error",
        }
    }
}

impl fmt::Display for DispositionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposition {
    action: String,
    mdn_action: String,
    status: String,
    modifier: Option<DispositionModifier>,
    description: Option<String>,
}

impl Disposition {
    /// `automatic-action/MDN-sent-automatically; processed`
    #[must_use]
    pub fn processed() -> Self {
        Self {
            action: AUTOMATIC_ACTION.to_string(),
            mdn_action: MDN_SENT_AUTOMATICALLY.to_string(),
            status: PROCESSED.to_string(),
            modifier: None,
            description: None,
        }
    }

    /// `...; processed/error: <reason>`
    #[must_use]
    pub fn error(reason: DispositionReason) -> Self {
        Self {
            modifier: Some(DispositionModifier::Error),
            description: Some(reason.as_str().to_string()),
            ..Self::processed()
        }
    }

    /// `...; processed/warning: <description>`
    #[must_use]
    pub fn warning(description: impl Into<String>) -> Self {
        Self {
            modifier: Some(DispositionModifier::Warning),
            description: Some(description.into()),
            ..Self::processed()
        }
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn mdn_action(&self) -> &str {
        &self.mdn_action
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub const fn modifier(&self) -> Option<DispositionModifier> {
        self.modifier
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(PROCESSED) && self.modifier.is_none()
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.modifier == Some(DispositionModifier::Warning)
    }

    /// Require a success disposition.
    ///
    /// # Errors
    /// Returns [`DispositionError`] when the status is not `processed`
    /// or a modifier is present.
    pub fn validate(&self) -> Result<(), DispositionError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(DispositionError::new(self.clone()))
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}; {}", self.action, self.mdn_action, self.status)?;
        if let Some(modifier) = self.modifier {
            write!(f, "/{}", modifier.as_str())?;
            if let Some(description) = &self.description {
                write!(f, ": {description}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Disposition {
    type Err = DispositionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| DispositionParseError {
            value: value.to_string(),
            reason,
        };

        let (mode, status_part) = value
            .split_once(';')
            .ok_or_else(|| invalid("missing ';' separator"))?;

        let (action, mdn_action) = mode
            .split_once('/')
            .ok_or_else(|| invalid("missing action/mdn-action"))?;
        let action = action.trim();
        let mdn_action = mdn_action.trim();
        if action.is_empty() || mdn_action.is_empty() {
            return Err(invalid("empty action"));
        }

        let (status, rest) = match status_part.split_once('/') {
            Some((status, rest)) => (status.trim(), Some(rest)),
            None => (status_part.trim(), None),
        };
        if status.is_empty() {
            return Err(invalid("empty status"));
        }

        let (modifier, description) = match rest {
            None => (None, None),
            Some(rest) => {
                let (modifier, description) = match rest.split_once(':') {
                    Some((m, d)) => (m.trim(), Some(d.trim())),
                    None => (rest.trim(), None),
                };
                if modifier.is_empty() {
                    return Err(invalid("empty status modifier"));
                }
                // `failure` and unregistered modifiers are treated as errors.
                let modifier = if modifier.eq_ignore_ascii_case("warning") {
                    DispositionModifier::Warning
                } else {
                    DispositionModifier::Error
                };
                (
                    Some(modifier),
                    description.filter(|d| !d.is_empty()).map(str::to_string),
                )
            }
        };

        Ok(Self {
            action: action.to_string(),
            mdn_action: mdn_action.to_string(),
            status: status.to_string(),
            modifier,
            description,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_processed_is_success() {
        let disposition: Disposition = "automatic-action/MDN-sent-automatically; processed"
            .parse()
            .unwrap();
        assert!(disposition.is_success());
        assert!(disposition.validate().is_ok());
        assert_eq!(disposition, Disposition::processed());
    }

    #[test]
    fn test_error_modifier_fails_validation() {
        let disposition: Disposition =
            "automatic-action/MDN-sent-automatically; processed/error: decryption-failed"
                .parse()
                .unwrap();

        assert!(!disposition.is_success());
        assert_eq!(disposition.modifier(), Some(DispositionModifier::Error));
        assert_eq!(disposition.description(), Some("decryption-failed"));

        let err = disposition.validate().unwrap_err();
        assert!(!err.is_warning());
    }

    #[test]
    fn test_warning_is_never_success() {
        let disposition: Disposition =
            "automatic-action/MDN-sent-automatically; processed/Warning: duplicate-document"
                .parse()
                .unwrap();
        assert!(!disposition.is_success());
        assert!(disposition.validate().unwrap_err().is_warning());
    }

    #[test]
    fn test_unknown_modifier_is_error_class() {
        let disposition: Disposition =
            "automatic-action/MDN-sent-automatically; failed/Failure: unsupported MIC-algorithms"
                .parse()
                .unwrap();
        assert_eq!(disposition.status(), "failed");
        assert_eq!(disposition.modifier(), Some(DispositionModifier::Error));
        assert_eq!(disposition.description(), Some("unsupported MIC-algorithms"));
        assert!(!disposition.is_success());
        assert!(!disposition.validate().unwrap_err().is_warning());

        let disposition: Disposition =
            "automatic-action/MDN-sent-automatically; processed/fatal: x"
                .parse()
                .unwrap();
        assert_eq!(disposition.modifier(), Some(DispositionModifier::Error));
    }

    #[test]
    fn test_non_processed_status() {
        let disposition: Disposition = "manual-action/MDN-sent-manually; failed".parse().unwrap();
        assert!(!disposition.is_success());
        assert!(!disposition.validate().unwrap_err().is_warning());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "automatic-action/MDN-sent-automatically; processed/error: integrity-check-failed";
        assert_eq!(
            Disposition::error(DispositionReason::IntegrityCheckFailed).to_string(),
            text
        );
        assert_eq!(text.parse::<Disposition>().unwrap().to_string(), text);
    }

    #[test]
    fn test_malformed() {
        assert!("processed".parse::<Disposition>().is_err());
        assert!("automatic-action; processed".parse::<Disposition>().is_err());
        assert!(
            "automatic-action/MDN-sent-automatically; processed/: x"
                .parse::<Disposition>()
                .is_err()
        );
        assert!(
            "automatic-action/MDN-sent-automatically; "
                .parse::<Disposition>()
                .is_err()
        );
    }
}
