use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartnershipError {
    /// No stored partnership matches the partial record.
    #[error("Partnership not found: {0}")]
    NotFound(String),

    /// A partnership with this name is already stored.
    #[error("Duplicate partnership name: {0}")]
    DuplicateName(String),

    /// Record has neither a name nor sender and receiver identities.
    #[error("Partnership {0} must carry sender and receiver identities")]
    MissingIdentity(String),

    /// Subject template references something that cannot be resolved.
    #[error("Invalid subject template '{template}': {reason}")]
    Template { template: String, reason: String },
}

impl PartnershipError {
    pub(crate) fn template(template: &str, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.to_string(),
            reason: reason.into(),
        }
    }
}
