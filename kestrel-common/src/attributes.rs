//! Free-form attribute bag carried by messages and receipts.
//!
//! Attributes record transient facts discovered while a message moves through
//! the pipeline (whether it arrived encrypted, the MIC that was calculated,
//! where it came from). They are not sent on the wire.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Set when the inbound body had to be decrypted.
pub const WAS_ENCRYPTED: &str = "was_encrypted";
/// Set when a signature was verified on receive, or applied on send.
pub const WAS_SIGNED: &str = "was_signed";
/// Set when a compression layer was removed on receive, or applied on send.
pub const WAS_COMPRESSED: &str = "was_compressed";
/// The MIC calculated for the message, in `<base64>, <alg>` form.
pub const CALCULATED_MIC: &str = "calculated_mic";
/// Human readable reason the message was queued for resend.
pub const RESEND_CAUSE: &str = "resend_cause";
/// Remaining resend attempts for the message.
pub const RESEND_TRIES_LEFT: &str = "resend_tries_left";
pub const SOURCE_IP: &str = "source_ip";
pub const SOURCE_PORT: &str = "source_port";
pub const DESTINATION_IP: &str = "destination_ip";
pub const DESTINATION_PORT: &str = "destination_port";
/// Path of the retained body for a pending async receipt.
pub const PENDING_BODY: &str = "pending_body";
/// Location the decrypted entity was dumped to, when dumping is enabled.
pub const DUMPED_TO: &str = "dumped_to";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(AHashMap<String, String>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Record a boolean fact.
    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    /// Read a boolean fact; missing keys are `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(parse_flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Interpret a configuration or attribute value as a boolean.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}
