//! Header names and an order-preserving, case-insensitive header list.
//!
//! The same [`Headers`] type backs both the HTTP transport headers of a
//! message and the MIME headers of an entity. Order matters: MIC computation
//! feeds header lines into the digest in the order they appear.

use serde::{Deserialize, Serialize};

pub const AS2_FROM: &str = "AS2-From";
pub const AS2_TO: &str = "AS2-To";
pub const AS2_VERSION: &str = "AS2-Version";
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const DATE: &str = "Date";
pub const DISPOSITION_NOTIFICATION_OPTIONS: &str = "Disposition-Notification-Options";
pub const DISPOSITION_NOTIFICATION_TO: &str = "Disposition-Notification-To";
pub const FROM: &str = "From";
pub const MESSAGE_ID: &str = "Message-ID";
pub const MIME_VERSION: &str = "Mime-Version";
pub const RECEIPT_DELIVERY_OPTION: &str = "Receipt-Delivery-Option";
pub const RECIPIENT_ADDRESS: &str = "Recipient-Address";
pub const SERVER: &str = "Server";
pub const SUBJECT: &str = "Subject";
pub const USER_AGENT: &str = "User-Agent";

/// `AS2-Version` value advertised by this implementation (compression capable).
pub const AS2_VERSION_VALUE: &str = "1.1";

/// Ordered list of `(name, value)` pairs with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// First value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every existing value of `name` with `value`, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .0
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(index) => {
                self.0[index].1 = value;
                let mut seen = 0usize;
                self.0.retain(|(key, _)| {
                    if key.eq_ignore_ascii_case(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push((name.to_string(), value)),
        }
    }

    /// Append without replacing.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_string(), value.into()));
    }

    /// Remove every value of `name`, returning the first one removed.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_string);
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        first
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

    /// Render as `Name: value\r\n` lines, without the terminating blank line.
    #[must_use]
    pub fn to_lines(&self) -> String {
        self.0.iter().fold(String::new(), |mut out, (name, value)| {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
            out
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Strip surrounding angle brackets and whitespace from a message-id.
#[must_use]
pub fn strip_angle_brackets(message_id: &str) -> &str {
    let trimmed = message_id.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
}

/// AS2 identities may be quoted when they contain whitespace; compare and
/// look them up without the quotes.
#[must_use]
pub fn unquote_as2_name(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}
