//! Audit logging for message lifecycle events
//!
//! Structured events for compliance and operations monitoring, emitted
//! through `tracing` under the `kestrel::audit` target.
//!
//! ## Audit Events
//!
//! - `MessageSent`: Message secured and posted to a partner
//! - `MessageReceived`: Inbound message processed, with its disposition
//! - `MdnReceived`: Receipt matched to an outstanding message
//! - `MdnMicMismatch`: Receipt MIC differs from the one computed at send time
//! - `ResendScheduled`: Failed send handed to the resend queue
//!
//! ## Redaction
//!
//! Partner AS2 identities can be redacted with [`AuditConfig::redact_partners`].

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for message lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace partner AS2 identities with `[REDACTED]`
    #[serde(default)]
    pub redact_partners: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_partners: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Redact an identity if redaction is enabled
#[must_use]
pub fn redact(identity: &str, redact: bool) -> String {
    if redact {
        "[REDACTED]".to_string()
    } else {
        identity.to_string()
    }
}

/// Emits audit events according to its [`AuditConfig`].
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    config: AuditConfig,
}

impl AuditLog {
    #[must_use]
    pub const fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn partner(&self, identity: &str) -> String {
        redact(identity, self.config.redact_partners)
    }

    /// Message posted to a partner.
    ///
    /// # Fields
    /// - `message_id`: Outbound Message-ID
    /// - `sender` / `receiver`: AS2 identities (redacted if configured)
    /// - `mic`: MIC computed at send time
    /// - `async_mdn`: Whether the receipt will arrive separately
    pub fn message_sent(
        &self,
        message_id: &str,
        sender: &str,
        receiver: &str,
        mic: Option<&str>,
        async_mdn: bool,
    ) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            target: "kestrel::audit",
            tracing::Level::INFO,
            event = "MessageSent",
            message_id = %message_id,
            sender = %self.partner(sender),
            receiver = %self.partner(receiver),
            mic = mic.unwrap_or_default(),
            async_mdn = async_mdn,
            "Audit: Message sent"
        );
    }

    /// Inbound message processed.
    pub fn message_received(
        &self,
        message_id: &str,
        sender: &str,
        receiver: &str,
        disposition: &str,
        size: usize,
    ) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            target: "kestrel::audit",
            tracing::Level::INFO,
            event = "MessageReceived",
            message_id = %message_id,
            sender = %self.partner(sender),
            receiver = %self.partner(receiver),
            disposition = %disposition,
            size = size,
            "Audit: Message received"
        );
    }

    /// Receipt matched to an outstanding message.
    pub fn mdn_received(&self, original_message_id: &str, disposition: &str, async_mdn: bool) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            target: "kestrel::audit",
            tracing::Level::INFO,
            event = "MdnReceived",
            original_message_id = %original_message_id,
            disposition = %disposition,
            async_mdn = async_mdn,
            "Audit: MDN received"
        );
    }

    /// Receipt MIC differs from the MIC computed at send time.
    pub fn mdn_mic_mismatch(&self, original_message_id: &str, expected: &str, received: &str) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            target: "kestrel::audit",
            tracing::Level::WARN,
            event = "MdnMicMismatch",
            original_message_id = %original_message_id,
            expected_mic = %expected,
            received_mic = %received,
            "Audit: MDN MIC mismatch"
        );
    }

    /// Failed send handed to the resend queue.
    pub fn resend_scheduled(&self, message_id: &str, cause: &str, tries_left: u32) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            target: "kestrel::audit",
            tracing::Level::INFO,
            event = "ResendScheduled",
            message_id = %message_id,
            cause = %cause,
            tries_left = tries_left,
            "Audit: Resend scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(redact("ACME-AS2", true), "[REDACTED]");
        assert_eq!(redact("ACME-AS2", false), "ACME-AS2");
    }

    #[test]
    fn test_audit_config_default() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_partners);
    }

    #[test]
    fn test_partner_redaction_follows_config() {
        let log = AuditLog::new(AuditConfig {
            enabled: true,
            redact_partners: true,
        });
        assert_eq!(log.partner("A"), "[REDACTED]");
        assert_eq!(AuditLog::default().partner("A"), "A");
    }

    #[test]
    fn test_disabled_log_is_silent() {
        let log = AuditLog::new(AuditConfig {
            enabled: false,
            redact_partners: false,
        });
        log.message_sent("<1@x>", "A", "B", None, false);
        log.resend_scheduled("<1@x>", "timeout", 2);
    }
}
