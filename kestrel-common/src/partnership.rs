//! Partnership policy record.
//!
//! A partnership ties one sender identity to one receiver identity and
//! carries the flags that govern how messages between them are secured and
//! receipted. Identity maps use [`ids`] keys, behaviour lives in a flat
//! string attribute map keyed by [`attrs`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attributes::parse_flag;

/// Identity keys used in the sender and receiver maps.
pub mod ids {
    pub const AS2_ID: &str = "as2_id";
    pub const X509_ALIAS: &str = "x509_alias";
    pub const EMAIL: &str = "email";
}

/// Partnership attribute keys.
pub mod attrs {
    /// Signing digest algorithm (`sha-256`, ...). Unset disables signing.
    pub const SIGN: &str = "sign";
    /// Encryption algorithm (`aes256`, ...). Unset disables encryption.
    pub const ENCRYPT: &str = "encrypt";
    /// Compression type (`zlib`). Unset disables compression.
    pub const COMPRESSION: &str = "compression";
    /// `compress-before-signing` or `compress-after-signing`.
    pub const COMPRESSION_MODE: &str = "compression_mode";
    pub const COMPRESS_BEFORE_SIGNING: &str = "compress-before-signing";
    pub const COMPRESS_AFTER_SIGNING: &str = "compress-after-signing";
    /// Use RFC 3851 digest labels (`sha1`) instead of RFC 5751 (`sha-1`).
    pub const RENAME_DIGEST_TO_OLD_NAME: &str = "rename_digest_to_old_name";
    pub const FORCE_DECRYPT: &str = "force_decrypt";
    pub const DISABLE_DECRYPT: &str = "disable_decrypt";
    pub const FORCE_VERIFY: &str = "force_verify";
    pub const DISABLE_VERIFY: &str = "disable_verify";
    pub const DISABLE_DECOMPRESS: &str = "disable_decompress";
    /// Tri-state; unset inherits the global default.
    pub const INCLUDE_CERT_IN_SIGNED_CONTENT: &str = "include_cert_in_signed_content";
    /// Tri-state; unset inherits the global default.
    pub const VERIFY_USE_CERT_IN_BODY: &str = "verify_use_cert_in_body";
    /// Value for `Disposition-Notification-To`. Unset means no MDN requested.
    pub const AS2_MDN_TO: &str = "as2_mdn_to";
    /// Value for `Disposition-Notification-Options`.
    pub const AS2_MDN_OPTIONS: &str = "as2_mdn_options";
    /// Async receipt URL (`Receipt-Delivery-Option`). Unset means synchronous MDN.
    pub const AS2_RECEIPT_OPTION: &str = "as2_receipt_option";
    /// Partner endpoint messages are posted to.
    pub const AS2_URL: &str = "as2_url";
    /// Suppress error MDNs; failures are reported by HTTP status only.
    pub const BLOCKED_ERROR_MDN: &str = "blocked_error_mdn";
    pub const CONTENT_TRANSFER_ENCODING: &str = "content_transfer_encoding";
    pub const CONTENT_TRANSFER_ENCODING_RECEIVE: &str = "content_transfer_encoding_receive";
    /// Subject template for outbound messages.
    pub const SUBJECT: &str = "subject";
    /// Maximum resend attempts for this partnership.
    pub const RESEND_MAX_RETRIES: &str = "resend_max_retries";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Partnership {
    pub name: Option<String>,
    pub sender: BTreeMap<String, String>,
    pub receiver: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
}

impl Partnership {
    /// Partial record identified only by AS2 ids, as built for lookup.
    #[must_use]
    pub fn between(sender_as2_id: &str, receiver_as2_id: &str) -> Self {
        let mut partnership = Self::default();
        partnership
            .sender
            .insert(ids::AS2_ID.to_string(), sender_as2_id.to_string());
        partnership
            .receiver
            .insert(ids::AS2_ID.to_string(), receiver_as2_id.to_string());
        partnership
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sender_id(&self, key: &str) -> Option<&str> {
        self.sender.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn receiver_id(&self, key: &str) -> Option<&str> {
        self.receiver.get(key).map(String::as_str)
    }

    /// Attribute value, with empty strings treated as unset.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    /// Boolean attribute; unset is `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.attribute(key).is_some_and(parse_flag)
    }

    /// Boolean attribute where unset means "inherit".
    #[must_use]
    pub fn tri_state(&self, key: &str) -> Option<bool> {
        self.attribute(key).map(parse_flag)
    }

    #[must_use]
    pub fn sign_algorithm(&self) -> Option<&str> {
        self.attribute(attrs::SIGN)
    }

    #[must_use]
    pub fn encrypt_algorithm(&self) -> Option<&str> {
        self.attribute(attrs::ENCRYPT)
    }

    #[must_use]
    pub fn compression_type(&self) -> Option<&str> {
        self.attribute(attrs::COMPRESSION)
    }

    /// Compression is applied before signing only when explicitly requested.
    #[must_use]
    pub fn compress_before_signing(&self) -> bool {
        self.attribute(attrs::COMPRESSION_MODE)
            .is_some_and(|mode| mode.eq_ignore_ascii_case(attrs::COMPRESS_BEFORE_SIGNING))
    }

    /// Any of signing, encryption or compression configured.
    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.sign_algorithm().is_some()
            || self.encrypt_algorithm().is_some()
            || self.compression_type().is_some()
    }

    #[must_use]
    pub fn mdn_requested(&self) -> bool {
        self.attribute(attrs::AS2_MDN_TO).is_some()
    }

    /// Async receipt URL; `None` means the MDN comes back on the same request.
    #[must_use]
    pub fn async_mdn_url(&self) -> Option<&str> {
        self.attribute(attrs::AS2_RECEIPT_OPTION)
    }

    /// Display label for log lines.
    #[must_use]
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!(
                "{} -> {}",
                self.sender_id(ids::AS2_ID).unwrap_or("?"),
                self.receiver_id(ids::AS2_ID).unwrap_or("?")
            )
        })
    }
}
