//! MDN generation and parsing per RFC 4130 section 7.
//!
//! # MDN structure
//! ```text
//! multipart/report; report-type=disposition-notification
//! ├── Part 1: text/plain (human-readable explanation)
//! └── Part 2: message/disposition-notification (machine-readable verdict)
//! ```
//!
//! The report is wrapped in `multipart/signed` when the requester asked for a
//! signed receipt and our key material is available.

use std::{fmt::Write as _, sync::Arc};

use kestrel_common::{
    Disposition, Message, MessageMdn, MimeBody, PRODUCT_NAME, Partnership,
    attributes::{CALCULATED_MIC, WAS_COMPRESSED, WAS_ENCRYPTED, WAS_SIGNED},
    headers::{
        AS2_FROM, AS2_TO, AS2_VERSION, AS2_VERSION_VALUE, CONTENT_TRANSFER_ENCODING,
        CONTENT_TYPE, DATE, DISPOSITION_NOTIFICATION_OPTIONS, FROM, MESSAGE_ID, MIME_VERSION,
        SERVER, SUBJECT, unquote_as2_name,
    },
    incoming, internal,
    message::generate_message_id,
    mime::{MESSAGE_DISPOSITION_NOTIFICATION, MULTIPART_REPORT, TEXT_PLAIN},
    outgoing,
    partnership::{attrs, ids},
};
use kestrel_partnership::PartnershipStore;
use kestrel_security::{DigestAlgorithm, Mic, SecurityError, SecurityService};
use serde::{Deserialize, Serialize};

use crate::{error::MdnError, options::DispositionOptions};

pub const REPORTING_UA: &str = "Reporting-UA";
pub const ORIGINAL_RECIPIENT: &str = "Original-Recipient";
pub const FINAL_RECIPIENT: &str = "Final-Recipient";
pub const ORIGINAL_MESSAGE_ID: &str = "Original-Message-ID";
pub const DISPOSITION: &str = "Disposition";
pub const RECEIVED_CONTENT_MIC: &str = "Received-Content-MIC";

const REPORT_TYPE: &str = "multipart/report; report-type=disposition-notification";

/// Configuration for MDN generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdnConfig {
    /// Value of the `Reporting-UA` field
    pub reporting_ua: String,
    /// Value of the `Server` header
    pub server: String,
    /// Domain part of generated MDN message ids
    pub hostname: String,
    pub subject: String,
    /// `From` header on outgoing receipts, omitted when unset
    pub from: Option<String>,
}

impl Default for MdnConfig {
    fn default() -> Self {
        Self {
            reporting_ua: PRODUCT_NAME.to_string(),
            server: PRODUCT_NAME.to_string(),
            hostname: "localhost".to_string(),
            subject: "Message Disposition Notification".to_string(),
            from: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MdnEngine {
    security: Arc<SecurityService>,
    partnerships: Arc<PartnershipStore>,
    config: MdnConfig,
}

impl MdnEngine {
    #[must_use]
    pub const fn new(
        security: Arc<SecurityService>,
        partnerships: Arc<PartnershipStore>,
        config: MdnConfig,
    ) -> Self {
        Self {
            security,
            partnerships,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MdnConfig {
        &self.config
    }

    /// Build the receipt for `source`.
    ///
    /// `mic_source` is the entity the `Received-Content-MIC` covers: the
    /// verified signed content, or the final unwrapped body. When absent, the
    /// source message's current body is used. Headers take part in the digest
    /// when the source arrived signed, encrypted or compressed.
    ///
    /// A requested signature that cannot be produced for lack of key material
    /// is logged and the receipt goes out unsigned.
    ///
    /// # Errors
    /// If the signing provider itself fails.
    #[tracing::instrument(skip_all, fields(message_id = %source.message_id))]
    pub fn build(
        &self,
        source: &Message,
        mic_source: Option<&MimeBody>,
        disposition: &Disposition,
        text: &str,
    ) -> Result<MessageMdn, MdnError> {
        let as2_from = source
            .headers
            .get(AS2_TO)
            .map(unquote_as2_name)
            .or_else(|| source.partnership.receiver_id(ids::AS2_ID))
            .unwrap_or_default()
            .to_string();
        let as2_to = source
            .headers
            .get(AS2_FROM)
            .map(unquote_as2_name)
            .or_else(|| source.partnership.sender_id(ids::AS2_ID))
            .unwrap_or_default()
            .to_string();

        let mut mdn = MessageMdn {
            message_id: generate_message_id(&self.config.hostname),
            partnership: self.mdn_partnership(source, &as2_from, &as2_to),
            original_message_id: Some(source.message_id.clone()),
            original_recipient: Some(format!("rfc822; {as2_from}")),
            final_recipient: Some(format!("rfc822; {as2_from}")),
            reporting_ua: Some(self.config.reporting_ua.clone()),
            disposition: Some(disposition.clone()),
            text: Some(text.to_string()),
            ..MessageMdn::default()
        };

        mdn.headers.set(AS2_FROM, as2_from.as_str());
        mdn.headers.set(AS2_TO, as2_to.as_str());
        mdn.headers.set(AS2_VERSION, AS2_VERSION_VALUE);
        mdn.headers.set(MESSAGE_ID, mdn.message_id.as_str());
        mdn.headers.set(DATE, chrono::Utc::now().to_rfc2822());
        mdn.headers.set(SERVER, self.config.server.as_str());
        mdn.headers.set(MIME_VERSION, "1.0");
        mdn.headers.set(SUBJECT, self.config.subject.as_str());
        if let Some(from) = &self.config.from {
            mdn.headers.set(FROM, from.as_str());
        }

        let options = source
            .headers
            .get(DISPOSITION_NOTIFICATION_OPTIONS)
            .and_then(|value| match value.parse::<DispositionOptions>() {
                Ok(options) => Some(options),
                Err(err) => {
                    incoming!(level = WARN, "Ignoring {err}");
                    None
                }
            })
            .unwrap_or_default();

        if let Some(body) = mic_source.or(source.body.as_ref()) {
            let include_headers = [WAS_ENCRYPTED, WAS_SIGNED, WAS_COMPRESSED]
                .iter()
                .any(|flag| source.attributes.flag(flag));
            let mic = Mic::compute(body, options.mic_algorithm(), include_headers)
                .with_legacy_label(options.legacy_mic_label())
                .to_string();

            mdn.attributes.set(CALCULATED_MIC, mic.as_str());
            mdn.received_mic = Some(mic);
        }

        let report = self.report(&mdn);
        let body = if options.signing_requested() {
            self.sign(&mdn.partnership, &report, options.mic_algorithm())?
                .unwrap_or(report)
        } else {
            report
        };

        if let Some(content_type) = body.content_type() {
            mdn.headers.set(CONTENT_TYPE, content_type);
        }
        mdn.body = Some(body);

        outgoing!(
            level = DEBUG,
            "Built MDN {} for {}: {disposition}",
            mdn.message_id,
            source.message_id
        );

        Ok(mdn)
    }

    /// Verify and unpack a received receipt into `mdn`'s named fields.
    ///
    /// `mdn.partnership` is the partnership of the original outbound message,
    /// so the signer is its receiver.
    ///
    /// # Errors
    /// If the signature fails to verify or the body is not a disposition
    /// report.
    #[tracing::instrument(skip_all, fields(message_id = %mdn.message_id))]
    pub fn parse(&self, mdn: &mut MessageMdn) -> Result<(), MdnError> {
        let body = mdn.body.as_ref().ok_or(MdnError::MissingBody)?;
        let partnership = &mdn.partnership;

        let verify = !partnership.flag(attrs::DISABLE_VERIFY)
            && (body.is_signed() || partnership.flag(attrs::FORCE_VERIFY));
        let report = if verify {
            let use_body_certificate = partnership
                .tri_state(attrs::VERIFY_USE_CERT_IN_BODY)
                .unwrap_or(self.security.defaults().verify_use_certificate_in_body);
            let content = self.security.verify(
                body,
                partnership.receiver_id(ids::X509_ALIAS),
                use_body_certificate,
            )?;
            incoming!("Verified MDN signature from {}", partnership.label());
            content
        } else {
            body.clone()
        };
        mdn.attributes.set_flag(WAS_SIGNED, verify);

        if report.mime_type() != MULTIPART_REPORT {
            return Err(MdnError::Malformed(format!(
                "expected {MULTIPART_REPORT}, found {}",
                report.mime_type()
            )));
        }

        let mut notification = None;
        for part in report.parts()? {
            match part.mime_type().as_str() {
                TEXT_PLAIN => {
                    let text = part.decoded_content()?;
                    mdn.text = Some(String::from_utf8_lossy(&text).trim_end().to_string());
                }
                MESSAGE_DISPOSITION_NOTIFICATION => notification = Some(part.decoded_content()?),
                other => internal!(level = DEBUG, "Ignoring MDN part of type {other}"),
            }
        }

        let notification = notification.ok_or_else(|| {
            MdnError::Malformed(format!("no {MESSAGE_DISPOSITION_NOTIFICATION} part"))
        })?;
        let (fields, _) = mailparse::parse_headers(&notification)
            .map_err(|err| MdnError::Malformed(err.to_string()))?;

        for field in &fields {
            let value = field.get_value().trim().to_string();
            match field.get_key().to_ascii_lowercase().as_str() {
                "reporting-ua" => mdn.reporting_ua = Some(value),
                "original-recipient" => mdn.original_recipient = Some(value),
                "final-recipient" => mdn.final_recipient = Some(value),
                "original-message-id" => mdn.original_message_id = Some(value),
                "disposition" => mdn.disposition = Some(value.parse()?),
                "received-content-mic" => mdn.received_mic = Some(value),
                _ => {}
            }
        }

        if mdn.disposition.is_none() {
            return Err(MdnError::Malformed(format!("no {DISPOSITION} field")));
        }

        incoming!(
            level = DEBUG,
            "Parsed MDN for {}",
            mdn.original_message_id.as_deref().unwrap_or("<unknown>")
        );

        Ok(())
    }

    /// The receipt travels in the opposite direction to the message. Falls
    /// back to the source partnership with its sides swapped when no
    /// partnership for the reverse direction is known.
    fn mdn_partnership(&self, source: &Message, as2_from: &str, as2_to: &str) -> Partnership {
        let mut partnership = Partnership::between(as2_from, as2_to);
        match self.partnerships.resolve(&mut partnership) {
            Ok(()) => partnership,
            Err(err) => {
                internal!(
                    level = DEBUG,
                    "{err}, using reversed {}",
                    source.partnership.label()
                );
                Partnership {
                    name: source.partnership.name.clone(),
                    sender: source.partnership.receiver.clone(),
                    receiver: source.partnership.sender.clone(),
                    attributes: source.partnership.attributes.clone(),
                }
            }
        }
    }

    fn report(&self, mdn: &MessageMdn) -> MimeBody {
        let mut text = mdn.text.clone().unwrap_or_default();
        if !text.ends_with("\r\n") {
            text.push_str("\r\n");
        }
        let mut text = MimeBody::new(TEXT_PLAIN, text.into_bytes());
        text.set_header(CONTENT_TRANSFER_ENCODING, "7bit");

        let mut fields = String::new();
        let _ = write!(fields, "{REPORTING_UA}: {}\r\n", self.config.reporting_ua);
        if let Some(recipient) = &mdn.original_recipient {
            let _ = write!(fields, "{ORIGINAL_RECIPIENT}: {recipient}\r\n");
        }
        if let Some(recipient) = &mdn.final_recipient {
            let _ = write!(fields, "{FINAL_RECIPIENT}: {recipient}\r\n");
        }
        if let Some(id) = &mdn.original_message_id {
            let _ = write!(fields, "{ORIGINAL_MESSAGE_ID}: {id}\r\n");
        }
        if let Some(disposition) = &mdn.disposition {
            let _ = write!(fields, "{DISPOSITION}: {disposition}\r\n");
        }
        if let Some(mic) = &mdn.received_mic {
            let _ = write!(fields, "{RECEIVED_CONTENT_MIC}: {mic}\r\n");
        }
        let mut notification =
            MimeBody::new(MESSAGE_DISPOSITION_NOTIFICATION, fields.into_bytes());
        notification.set_header(CONTENT_TRANSFER_ENCODING, "7bit");

        MimeBody::multipart(REPORT_TYPE, &[text, notification])
    }

    /// `Ok(None)` when signing was skipped for lack of key material.
    fn sign(
        &self,
        partnership: &Partnership,
        report: &MimeBody,
        digest: DigestAlgorithm,
    ) -> Result<Option<MimeBody>, MdnError> {
        let Some(alias) = partnership.sender_id(ids::X509_ALIAS) else {
            internal!(
                level = ERROR,
                "Signed MDN requested but {} has no sender x509_alias, sending unsigned",
                partnership.label()
            );
            return Ok(None);
        };

        let include_certificate = partnership
            .tri_state(attrs::INCLUDE_CERT_IN_SIGNED_CONTENT)
            .unwrap_or(self.security.defaults().include_certificate_in_signed_content);

        match self.security.sign(
            report,
            alias,
            digest,
            include_certificate,
            partnership.flag(attrs::RENAME_DIGEST_TO_OLD_NAME),
        ) {
            Ok(signed) => {
                outgoing!("Signed MDN with {digest} as '{alias}'");
                Ok(Some(signed))
            }
            Err(err @ (SecurityError::MissingCertificate(_) | SecurityError::MissingPrivateKey(_))) => {
                internal!(level = ERROR, "Unable to sign MDN, sending unsigned: {err}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Default human readable text for a receipt.
#[must_use]
pub fn default_text(source: &Message, disposition: &Disposition) -> String {
    let mut text = String::new();
    let _ = write!(
        text,
        "The message {} sent to {} ",
        source.message_id,
        source
            .headers
            .get(AS2_TO)
            .map_or("<unknown>", unquote_as2_name)
    );
    if disposition.is_success() {
        text.push_str("has been received. The content was processed successfully.");
    } else if disposition.is_warning() {
        let _ = write!(
            text,
            "has been received with a warning: {}.",
            disposition.description().unwrap_or("unspecified")
        );
    } else {
        let _ = write!(
            text,
            "could not be processed: {}.",
            disposition.description().unwrap_or("unexpected-processing-error")
        );
    }
    text.push_str(" A successful receipt does not guarantee the content was understood by the recipient application.");
    text
}

#[cfg(test)]
mod tests {
    use kestrel_common::DispositionReason;

    use super::*;

    #[test]
    fn test_default_text() {
        let mut source = Message::default();
        source.message_id = "<1@x>".to_string();
        source.headers.set(AS2_TO, "\"GLOBEX\"");

        let ok = default_text(&source, &Disposition::processed());
        assert!(ok.starts_with("The message <1@x> sent to GLOBEX has been received."));

        let failed = default_text(
            &source,
            &Disposition::error(DispositionReason::DecryptionFailed),
        );
        assert!(failed.contains("could not be processed: decryption-failed."));

        let warned = default_text(&source, &Disposition::warning("duplicate-document"));
        assert!(warned.contains("with a warning: duplicate-document."));
    }

    #[test]
    fn test_config_defaults() {
        let config = MdnConfig::default();
        assert_eq!(config.reporting_ua, PRODUCT_NAME);
        assert!(config.from.is_none());
    }
}
