use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{
    attributes::Attributes,
    disposition::Disposition,
    headers::{Headers, strip_angle_brackets},
    mime::MimeBody,
    partnership::Partnership,
};

/// A business document in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Message-ID including angle brackets, e.g. `<01J...@host>`.
    pub message_id: String,
    /// Transport (HTTP) headers.
    pub headers: Headers,
    pub body: Option<MimeBody>,
    pub attributes: Attributes,
    pub partnership: Partnership,
    pub mdn: Option<MessageMdn>,
}

impl Message {
    #[must_use]
    pub fn new(partnership: Partnership, body: MimeBody) -> Self {
        Self {
            partnership,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Short human readable identification used in log lines.
    #[must_use]
    pub fn log_id(&self) -> String {
        let mut id = if self.message_id.is_empty() {
            "<no message-id>".to_string()
        } else {
            self.message_id.clone()
        };
        if let Some(name) = &self.partnership.name {
            let _ = write!(id, " [{name}]");
        }
        id
    }
}

/// The receipt for a [`Message`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMdn {
    pub message_id: String,
    pub headers: Headers,
    pub body: Option<MimeBody>,
    pub attributes: Attributes,
    pub partnership: Partnership,

    pub original_message_id: Option<String>,
    pub original_recipient: Option<String>,
    pub final_recipient: Option<String>,
    pub reporting_ua: Option<String>,
    pub disposition: Option<Disposition>,
    /// `Received-Content-MIC` exactly as it appeared in the receipt.
    pub received_mic: Option<String>,
    /// Human readable explanation from the text part.
    pub text: Option<String>,
}

/// Strip every whitespace character from a textual MIC.
///
/// Peers disagree on spacing around the comma, so stored and received MIC
/// strings are compared in this form.
#[must_use]
pub fn normalize_mic(mic: &str) -> String {
    mic.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Generate a fresh `<ulid@host>` message id.
#[must_use]
pub fn generate_message_id(host: &str) -> String {
    format!("<{}@{host}>", ulid::Ulid::new())
}

/// File name stem derived from a message id: angle brackets stripped and
/// anything outside `[A-Za-z0-9._@-]` replaced with `_`.
///
/// A leading `.` is also replaced so the stem can never name a hidden or
/// relative path component.
#[must_use]
pub fn safe_filename(message_id: &str) -> String {
    let mut safe: String = strip_angle_brackets(message_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.starts_with('.') {
        safe.replace_range(..1, "_");
    }
    if safe.is_empty() {
        safe.push('_');
    }
    safe
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_generate_message_id() {
        let id = generate_message_id("as2.example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@as2.example.com>"));
        assert_ne!(id, generate_message_id("as2.example.com"));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("<123@x>"), "123@x");
        assert_eq!(safe_filename("<a/b\\c:d*e>"), "a_b_c_d_e");
        assert_eq!(safe_filename("<../../etc/passwd>"), "_._.._etc_passwd");
        assert_eq!(safe_filename("<>"), "_");
    }

    #[test]
    fn test_normalize_mic() {
        assert_eq!(normalize_mic(" abc= ,  sha-256 "), "abc=,sha-256");
        assert_eq!(normalize_mic("abc=,sha-256"), "abc=,sha-256");
    }

    #[test]
    fn test_log_id() {
        let mut message = Message::default();
        assert_eq!(message.log_id(), "<no message-id>");

        message.message_id = "<1@x>".to_string();
        message.partnership.name = Some("acme".to_string());
        assert_eq!(message.log_id(), "<1@x> [acme]");
    }
}
