//! Outbound message handling.
//!
//! ```text
//! resolve partnership -> headers -> secure -> MIC -> [pending record] -> POST -> [sync MDN]
//! ```
//!
//! A failed POST removes the pending record again and hands the message to
//! the [`RetryCoordinator`].

use std::sync::Arc;

use base64::Engine as _;
use kestrel_common::{
    Disposition, Message, MessageMdn, MimeBody, PRODUCT_NAME, Partnership,
    attributes::{
        CALCULATED_MIC, PENDING_BODY, RESEND_CAUSE, RESEND_TRIES_LEFT, WAS_COMPRESSED,
        WAS_ENCRYPTED, WAS_SIGNED,
    },
    audit::AuditLog,
    headers::{
        AS2_FROM, AS2_TO, AS2_VERSION, AS2_VERSION_VALUE, CONTENT_TRANSFER_ENCODING, DATE,
        DISPOSITION_NOTIFICATION_OPTIONS, DISPOSITION_NOTIFICATION_TO, FROM, MESSAGE_ID,
        MIME_VERSION, RECEIPT_DELIVERY_OPTION, RECIPIENT_ADDRESS, SUBJECT, USER_AGENT,
    },
    incoming, internal,
    message::generate_message_id,
    outgoing,
    partnership::{attrs, ids},
};
use kestrel_mdn::{DispositionOptions, MdnEngine};
use kestrel_partnership::PartnershipStore;
use kestrel_security::{DigestAlgorithm, SecurityError, SecurityService, mic_matches};
use kestrel_spool::{PendingStore, SpoolError};
use serde::{Deserialize, Serialize};

use crate::{
    action::Action,
    error::As2Error,
    retry::RetryCoordinator,
    transport::{HttpRequest, HttpResponse, Transport, entity_headers, request_for},
};

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Domain part of generated message ids
    pub hostname: String,
    pub user_agent: String,
    /// `Subject` for messages whose partnership has no subject template
    pub default_subject: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            user_agent: PRODUCT_NAME.to_string(),
            default_subject: "AS2 Message".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Partner accepted the message. Carries the synchronous receipt when one
    /// was requested.
    Delivered { mdn: Option<Box<MessageMdn>> },
    /// Partner accepted the message but its receipt reports a warning.
    Warning { mdn: Box<MessageMdn> },
    /// Receipt will arrive later as its own request.
    AwaitingAsyncMdn { message_id: String, mic: String },
    /// The POST failed and the message was handed to the resend queue.
    ResendScheduled,
}

#[derive(Debug, Clone)]
pub struct Sender {
    security: Arc<SecurityService>,
    partnerships: Arc<PartnershipStore>,
    mdn: Arc<MdnEngine>,
    pending: Arc<dyn PendingStore>,
    transport: Arc<dyn Transport>,
    retry: RetryCoordinator,
    audit: AuditLog,
    config: SenderConfig,
}

impl Sender {
    #[must_use]
    pub fn new(
        security: Arc<SecurityService>,
        partnerships: Arc<PartnershipStore>,
        mdn: Arc<MdnEngine>,
        pending: Arc<dyn PendingStore>,
        transport: Arc<dyn Transport>,
        retry: RetryCoordinator,
        config: SenderConfig,
    ) -> Self {
        Self {
            security,
            partnerships,
            mdn,
            pending,
            transport,
            retry,
            audit: AuditLog::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryCoordinator {
        &self.retry
    }

    /// Secure `message` and post it to its partner.
    ///
    /// # Errors
    /// - configuration problems, before anything is sent
    /// - transport failures once no retries remain
    /// - a receipt reporting an error, or a MIC that does not match
    #[tracing::instrument(skip_all, fields(message_id = %message.message_id))]
    pub async fn send(&self, mut message: Message) -> Result<SendOutcome, As2Error> {
        self.partnerships.resolve_message(&mut message, true)?;

        let url = message
            .partnership
            .attribute(attrs::AS2_URL)
            .ok_or_else(|| {
                As2Error::Configuration(format!(
                    "partnership {} has no {}",
                    message.partnership.label(),
                    attrs::AS2_URL
                ))
            })?
            .to_string();
        let document = message.body.clone().ok_or(SecurityError::MissingBody)?;
        let document = match message
            .partnership
            .attribute(attrs::CONTENT_TRANSFER_ENCODING)
        {
            Some(encoding) => transfer_encode(&document, encoding)?,
            None => document,
        };

        self.prepare_headers(&mut message, &url);
        message.body = Some(document.clone());

        let partnership = message.partnership.clone();
        let secured = self
            .security
            .secure(&partnership, &document, |body_of_record| {
                internal!(
                    level = DEBUG,
                    "MIC will cover the compressed entity ({} bytes)",
                    body_of_record.content().len()
                );
            })?;
        message.attributes.set_flag(WAS_SIGNED, secured.signed);
        message.attributes.set_flag(WAS_ENCRYPTED, secured.encrypted);
        message.attributes.set_flag(WAS_COMPRESSED, secured.compressed);

        let mic = partnership.mdn_requested().then(|| {
            SecurityService::compute_mic(
                &secured.body_of_record,
                send_mic_algorithm(&partnership),
                &partnership,
            )
            .to_string()
        });
        if let Some(mic) = &mic {
            message.attributes.set(CALCULATED_MIC, mic.as_str());
        }

        let async_mdn = partnership.mdn_requested() && partnership.async_mdn_url().is_some();
        let mut pending_saved = false;
        if async_mdn && let Some(mic) = &mic {
            let record = self
                .pending
                .save(&message.message_id, mic, &document.to_bytes())
                .await?;
            message.attributes.set(PENDING_BODY, record.body.as_str());
            pending_saved = true;
        }

        let request = request_for(&message.headers, &secured.body);
        let size = request.body.len();
        outgoing!(
            level = INFO,
            "Sending {} ({size} bytes) to {url}",
            message.log_id()
        );

        let response = match self.post(&url, request).await {
            Ok(response) => response,
            Err(err) => {
                if pending_saved {
                    self.discard_pending(&message.message_id).await;
                }
                return self.fail_send(message, err);
            }
        };

        self.audit.message_sent(
            &message.message_id,
            partnership.sender_id(ids::AS2_ID).unwrap_or_default(),
            partnership.receiver_id(ids::AS2_ID).unwrap_or_default(),
            mic.as_deref(),
            async_mdn,
        );

        if !partnership.mdn_requested() {
            outgoing!(level = INFO, "Delivered {}, no MDN requested", message.log_id());
            return Ok(SendOutcome::Delivered { mdn: None });
        }

        if async_mdn {
            outgoing!(
                level = INFO,
                "Delivered {}, awaiting asynchronous MDN",
                message.log_id()
            );
            return Ok(SendOutcome::AwaitingAsyncMdn {
                message_id: message.message_id,
                mic: mic.unwrap_or_default(),
            });
        }

        self.receive_sync_mdn(&message, mic.as_deref(), response)
    }

    /// Post a receipt to the URL the requester asked for.
    ///
    /// Returns `Ok(false)` when the POST failed and a resend was scheduled.
    ///
    /// # Errors
    /// If the POST failed and no retries remain.
    #[tracing::instrument(skip_all, fields(message_id = %mdn.message_id))]
    pub async fn send_mdn(
        &self,
        mdn: MessageMdn,
        url: &str,
        tries_left: Option<u32>,
    ) -> Result<bool, As2Error> {
        let body = mdn.body.as_ref().ok_or(SecurityError::MissingBody)?;
        let request = request_for(&mdn.headers, body);

        match self.post(url, request).await {
            Ok(_) => {
                outgoing!(
                    level = INFO,
                    "Delivered asynchronous MDN {} to {url}",
                    mdn.message_id
                );
                Ok(true)
            }
            Err(err) if err.is_retryable() => {
                let carried = tries_left.map(|count| count.to_string());
                let tries_left = self
                    .retry
                    .tries_left(carried.as_deref(), &mdn.partnership);
                let message_id = mdn.message_id.clone();
                let action = Action::SendAsyncMdn {
                    mdn: Box::new(mdn),
                    url: url.to_string(),
                };

                if self
                    .retry
                    .schedule_resend(action, &message_id, &err.to_string(), tries_left)
                {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn post(
        &self,
        url: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, As2Error> {
        let response = self.transport.post(url, request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(As2Error::HttpResponse {
                status: response.status,
                reason: response.reason,
            })
        }
    }

    fn prepare_headers(&self, message: &mut Message, url: &str) {
        let partnership = &message.partnership;

        if message.message_id.is_empty() {
            message.message_id = generate_message_id(&self.config.hostname);
        }

        let headers = &mut message.headers;
        headers.set(
            AS2_FROM,
            partnership.sender_id(ids::AS2_ID).unwrap_or_default(),
        );
        headers.set(
            AS2_TO,
            partnership.receiver_id(ids::AS2_ID).unwrap_or_default(),
        );
        headers.set(AS2_VERSION, AS2_VERSION_VALUE);
        headers.set(MESSAGE_ID, message.message_id.as_str());
        headers.set(DATE, chrono::Utc::now().to_rfc2822());
        headers.set(MIME_VERSION, "1.0");
        headers.set(USER_AGENT, self.config.user_agent.as_str());
        headers.set(RECIPIENT_ADDRESS, url);
        if !headers.contains(SUBJECT) {
            headers.set(SUBJECT, self.config.default_subject.as_str());
        }
        if let Some(email) = partnership.sender_id(ids::EMAIL) {
            headers.set(FROM, email);
        }

        if let Some(mdn_to) = partnership.attribute(attrs::AS2_MDN_TO) {
            headers.set(DISPOSITION_NOTIFICATION_TO, mdn_to);
            if let Some(options) = partnership.attribute(attrs::AS2_MDN_OPTIONS) {
                headers.set(DISPOSITION_NOTIFICATION_OPTIONS, options);
            }
            if let Some(receipt_url) = partnership.async_mdn_url() {
                headers.set(RECEIPT_DELIVERY_OPTION, receipt_url);
            }
        }
    }

    async fn discard_pending(&self, message_id: &str) {
        match self.pending.delete(message_id).await {
            Ok(()) | Err(SpoolError::NotFound(_)) => {}
            Err(err) => internal!(
                level = ERROR,
                "Unable to remove pending record for {message_id}: {err}"
            ),
        }
    }

    fn fail_send(&self, mut message: Message, err: As2Error) -> Result<SendOutcome, As2Error> {
        outgoing!(
            level = WARN,
            "Sending {} failed: {err}",
            message.log_id()
        );

        if !err.is_retryable() {
            return Err(err);
        }

        let tries_left = self.retry.tries_left(
            message.attributes.get(RESEND_TRIES_LEFT),
            &message.partnership,
        );
        let cause = err.to_string();
        message.attributes.set(RESEND_CAUSE, cause.as_str());
        let message_id = message.message_id.clone();

        if self.retry.schedule_resend(
            Action::Send(Box::new(message)),
            &message_id,
            &cause,
            tries_left,
        ) {
            Ok(SendOutcome::ResendScheduled)
        } else {
            Err(err)
        }
    }

    fn receive_sync_mdn(
        &self,
        message: &Message,
        mic: Option<&str>,
        response: HttpResponse,
    ) -> Result<SendOutcome, As2Error> {
        let mut mdn = MessageMdn {
            message_id: response.headers.get(MESSAGE_ID).unwrap_or_default().to_string(),
            body: Some(MimeBody::from_parts(
                entity_headers(&response.headers),
                response.body,
            )),
            headers: response.headers,
            partnership: message.partnership.clone(),
            ..MessageMdn::default()
        };

        self.mdn.parse(&mut mdn)?;

        if let Some(original) = &mdn.original_message_id
            && original != &message.message_id
        {
            incoming!(
                level = WARN,
                "MDN for {} names {original} as the original message",
                message.message_id
            );
        }

        let disposition = mdn.disposition.clone().unwrap_or_else(Disposition::processed);
        let disposition_text = disposition.to_string();

        if let Err(err) = disposition.validate() {
            if err.is_warning() {
                incoming!(
                    level = WARN,
                    "MDN for {} reports a warning: {disposition_text}",
                    message.message_id
                );
                self.audit
                    .mdn_received(&message.message_id, &disposition_text, false);
                return Ok(SendOutcome::Warning { mdn: Box::new(mdn) });
            }
            incoming!(
                level = ERROR,
                "MDN for {} reports an error: {disposition_text}",
                message.message_id
            );
            return Err(err.into());
        }

        if let Some(expected) = mic {
            let received = mdn.received_mic.as_deref();
            if !received.is_some_and(|received| mic_matches(expected, received)) {
                self.audit.mdn_mic_mismatch(
                    &message.message_id,
                    expected,
                    received.unwrap_or("<none>"),
                );
                return Err(As2Error::MicMismatch {
                    expected: expected.to_string(),
                    received: received.map(ToString::to_string),
                });
            }
        }

        self.audit
            .mdn_received(&message.message_id, &disposition_text, false);
        incoming!(
            level = INFO,
            "Delivered {}: {disposition_text}",
            message.log_id()
        );

        Ok(SendOutcome::Delivered {
            mdn: Some(Box::new(mdn)),
        })
    }
}

/// MIC algorithm on send: the first requested `signed-receipt-micalg` this
/// engine knows, else the signing digest, else SHA-1.
#[must_use]
pub fn send_mic_algorithm(partnership: &Partnership) -> DigestAlgorithm {
    partnership
        .attribute(attrs::AS2_MDN_OPTIONS)
        .and_then(|options| options.parse::<DispositionOptions>().ok())
        .and_then(|options| {
            options
                .micalg()
                .and_then(|micalg| micalg.values.iter().find_map(|value| value.parse().ok()))
        })
        .or_else(|| {
            partnership
                .sign_algorithm()
                .and_then(|sign| sign.parse().ok())
        })
        .unwrap_or(DigestAlgorithm::Sha1)
}

/// Re-encode `body` with the partnership's transfer encoding.
///
/// `base64` is applied to the decoded content; `binary`, `8bit` and `7bit`
/// carry the decoded content as is.
///
/// # Errors
/// If the current content does not decode, or the encoding is unsupported.
pub fn transfer_encode(body: &MimeBody, encoding: &str) -> Result<MimeBody, As2Error> {
    let current = body.content_transfer_encoding().unwrap_or("binary");
    if current.eq_ignore_ascii_case(encoding) {
        return Ok(body.clone());
    }

    let decoded = body.decoded_content().map_err(SecurityError::from)?;
    let content = if encoding.eq_ignore_ascii_case("base64") {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&decoded);
        let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 38);
        for line in encoded.as_bytes().chunks(76) {
            wrapped.push_str(&String::from_utf8_lossy(line));
            wrapped.push_str("\r\n");
        }
        wrapped.into_bytes()
    } else if ["binary", "8bit", "7bit"]
        .iter()
        .any(|plain| encoding.eq_ignore_ascii_case(plain))
    {
        decoded
    } else {
        return Err(As2Error::Configuration(format!(
            "unsupported content transfer encoding '{encoding}'"
        )));
    };

    let mut encoded = MimeBody::from_parts(body.headers().clone(), content);
    encoded.set_header(CONTENT_TRANSFER_ENCODING, encoding);
    Ok(encoded)
}
