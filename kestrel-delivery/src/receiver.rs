//! Inbound message handling.
//!
//! ```text
//! identify partner -> unsecure -> validate -> store -> MDN (sync | async | none)
//! ```
//!
//! Every failure with a disposition reason still produces an error receipt
//! for the partner, and is returned in [`ReceiptOutcome::status`] for the
//! caller to log.

use std::{net::SocketAddr, sync::Arc};

use kestrel_common::{
    Disposition, DispositionError, Headers, Message, MessageMdn, MimeBody, Partnership,
    attributes::{DESTINATION_IP, DESTINATION_PORT, SOURCE_IP, SOURCE_PORT},
    audit::AuditLog,
    headers::{
        AS2_FROM, AS2_TO, CONTENT_TRANSFER_ENCODING, DISPOSITION_NOTIFICATION_TO, MESSAGE_ID,
        RECEIPT_DELIVERY_OPTION, unquote_as2_name,
    },
    incoming, internal,
    message::generate_message_id,
    partnership::{attrs, ids},
};
use kestrel_mdn::{MdnEngine, default_text};
use kestrel_partnership::{PartnershipError, PartnershipStore};
use kestrel_security::SecurityService;
use kestrel_spool::{Reconciler, Reconciliation};

use crate::{
    action::{Action, ActionHandlers},
    error::As2Error,
    hooks::{HookError, ValidationHook},
    transport::{HttpResponse, entity_headers, request_for},
};

/// A POST as handed over by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: Headers,
    pub body: Vec<u8>,
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

#[derive(Debug)]
pub enum ReceiptStatus {
    Processed,
    /// Processing stopped with a warning. Not a failure.
    Warning(As2Error),
    Error(As2Error),
}

impl ReceiptStatus {
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Processed => Disposition::processed(),
            Self::Warning(err) | Self::Error(err) => err.disposition(),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug)]
pub enum MdnDelivery {
    /// Returned as the HTTP response body.
    Sync(Box<MessageMdn>),
    /// Posted to the requester's `Receipt-Delivery-Option` URL.
    Async { url: String },
    /// Error receipts are blocked for this partnership.
    Blocked,
    /// The requester asked for no receipt.
    None,
}

#[derive(Debug)]
pub struct ReceiptOutcome {
    pub message: Message,
    pub status: ReceiptStatus,
    pub mdn: MdnDelivery,
}

impl ReceiptOutcome {
    /// Failures are reported by status code only when no receipt carries
    /// them back to the partner.
    #[must_use]
    pub fn http_status(&self) -> (u16, &'static str) {
        match (&self.status, &self.mdn) {
            (ReceiptStatus::Error(_), MdnDelivery::Blocked | MdnDelivery::None) => {
                (500, "Internal Server Error")
            }
            _ => (200, "OK"),
        }
    }

    /// HTTP response for the request, carrying the synchronous receipt if
    /// there is one.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        let (status, reason) = self.http_status();
        let mut response = HttpResponse::status(status, reason);

        if let MdnDelivery::Sync(mdn) = self.mdn
            && let Some(body) = &mdn.body
        {
            let request = request_for(&mdn.headers, body);
            response.headers = request.headers;
            response.body = request.body;
        }

        response
    }
}

#[derive(Debug, Clone)]
pub struct Receiver {
    security: Arc<SecurityService>,
    partnerships: Arc<PartnershipStore>,
    mdn: Arc<MdnEngine>,
    handlers: Arc<ActionHandlers>,
    reconciler: Reconciler,
    validation: Option<Arc<dyn ValidationHook>>,
    audit: AuditLog,
}

impl Receiver {
    #[must_use]
    pub fn new(
        security: Arc<SecurityService>,
        partnerships: Arc<PartnershipStore>,
        mdn: Arc<MdnEngine>,
        handlers: Arc<ActionHandlers>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            security,
            partnerships,
            mdn,
            handlers,
            reconciler,
            validation: None,
            audit: AuditLog::default(),
        }
    }

    #[must_use]
    pub fn with_validation(mut self, hook: Arc<dyn ValidationHook>) -> Self {
        self.validation = Some(hook);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Process an inbound AS2 message.
    ///
    /// # Errors
    /// Only when the receipt itself cannot be produced. Processing failures
    /// are reported in [`ReceiptOutcome::status`].
    #[tracing::instrument(skip_all)]
    pub async fn receive(&self, request: InboundRequest) -> Result<ReceiptOutcome, As2Error> {
        let size = request.body.len();
        let mut message = Self::message_from(request);

        incoming!(
            level = INFO,
            "Received {} ({size} bytes) from {} to {}",
            message.message_id,
            message.headers.get(AS2_FROM).unwrap_or("<none>"),
            message.headers.get(AS2_TO).unwrap_or("<none>")
        );

        let (status, mic_source) = match self.process(&mut message).await {
            Ok(mic_source) => (ReceiptStatus::Processed, mic_source),
            Err(err) if err.is_warning() => {
                incoming!(level = WARN, "{} processed with warning: {err}", message.log_id());
                (ReceiptStatus::Warning(err), None)
            }
            Err(err) => {
                incoming!(level = ERROR, "Processing {} failed: {err}", message.log_id());
                (ReceiptStatus::Error(err), None)
            }
        };
        let disposition = status.disposition();

        self.audit.message_received(
            &message.message_id,
            message.headers.get(AS2_FROM).unwrap_or_default(),
            message.headers.get(AS2_TO).unwrap_or_default(),
            &disposition.to_string(),
            size,
        );

        let mdn = self
            .respond(&message, mic_source.as_ref(), &status, &disposition)
            .await?;

        Ok(ReceiptOutcome {
            message,
            status,
            mdn,
        })
    }

    /// Process an asynchronous receipt for a message we sent.
    ///
    /// # Errors
    /// If the sending partner is unknown, the receipt does not verify or
    /// parse, or the pending store fails.
    #[tracing::instrument(skip_all)]
    pub async fn receive_mdn(&self, request: InboundRequest) -> Result<Reconciliation, As2Error> {
        let headers = request.headers;
        let as2_from = headers.get(AS2_FROM).map(unquote_as2_name).unwrap_or_default();
        let as2_to = headers.get(AS2_TO).map(unquote_as2_name).unwrap_or_default();

        // The receipt travels against the original message.
        let mut partnership = Partnership::between(as2_to, as2_from);
        self.partnerships
            .resolve(&mut partnership)
            .map_err(|source| As2Error::AuthenticationFailed {
                from: as2_from.to_string(),
                to: as2_to.to_string(),
                source,
            })?;

        let mut mdn = MessageMdn {
            message_id: headers.get(MESSAGE_ID).unwrap_or_default().to_string(),
            body: Some(MimeBody::from_parts(entity_headers(&headers), request.body)),
            headers,
            partnership,
            ..MessageMdn::default()
        };

        self.mdn.parse(&mut mdn)?;
        Ok(self.reconciler.reconcile(&mdn).await?)
    }

    fn message_from(request: InboundRequest) -> Message {
        let body = MimeBody::from_parts(entity_headers(&request.headers), request.body);
        let mut message = Message {
            message_id: request
                .headers
                .get(MESSAGE_ID)
                .map_or_else(|| generate_message_id("unknown"), ToString::to_string),
            headers: request.headers,
            body: Some(body),
            ..Message::default()
        };

        if let Some(source) = request.source {
            message.attributes.set(SOURCE_IP, source.ip().to_string());
            message.attributes.set(SOURCE_PORT, source.port().to_string());
        }
        if let Some(destination) = request.destination {
            message
                .attributes
                .set(DESTINATION_IP, destination.ip().to_string());
            message
                .attributes
                .set(DESTINATION_PORT, destination.port().to_string());
        }

        message
    }

    /// Returns the entity the receipt MIC covers.
    async fn process(&self, message: &mut Message) -> Result<Option<MimeBody>, As2Error> {
        let as2_from = message.headers.get(AS2_FROM).map(unquote_as2_name);
        let as2_to = message.headers.get(AS2_TO).map(unquote_as2_name);
        let (Some(as2_from), Some(as2_to)) = (as2_from, as2_to) else {
            return Err(As2Error::AuthenticationFailed {
                from: as2_from.unwrap_or_default().to_string(),
                to: as2_to.unwrap_or_default().to_string(),
                source: PartnershipError::MissingIdentity(format!(
                    "{AS2_FROM} and {AS2_TO} are required"
                )),
            });
        };

        message.partnership = Partnership::between(as2_from, as2_to);
        if let Err(source) = self.partnerships.resolve_message(message, false) {
            return Err(As2Error::AuthenticationFailed {
                from: message.partnership.sender_id(ids::AS2_ID).unwrap_or_default().to_string(),
                to: message.partnership.receiver_id(ids::AS2_ID).unwrap_or_default().to_string(),
                source,
            });
        }

        if let Some(encoding) = message
            .partnership
            .attribute(attrs::CONTENT_TRANSFER_ENCODING_RECEIVE)
            .map(ToString::to_string)
            && let Some(body) = &mut message.body
            && body.content_transfer_encoding().is_none()
        {
            internal!(
                level = DEBUG,
                "Assuming {encoding} transfer encoding for {}",
                message.message_id
            );
            body.set_header(CONTENT_TRANSFER_ENCODING, encoding);
        }

        let unsecured = self.security.unsecure(message)?;

        if let Some(validation) = &self.validation {
            match validation.validate(message) {
                Ok(()) => {}
                Err(HookError::Warning(description)) => {
                    return Err(DispositionError::new(Disposition::warning(description)).into());
                }
                Err(HookError::Failed(source)) => return Err(As2Error::ValidationFailed(source)),
            }
        } else {
            internal!(level = DEBUG, "No validation hook installed");
        }

        self.handlers
            .dispatch(Action::Store(Box::new(message.clone())))
            .await?;

        Ok(Some(unsecured.mic_source))
    }

    async fn respond(
        &self,
        message: &Message,
        mic_source: Option<&MimeBody>,
        status: &ReceiptStatus,
        disposition: &Disposition,
    ) -> Result<MdnDelivery, As2Error> {
        if !message.headers.contains(DISPOSITION_NOTIFICATION_TO) {
            internal!(level = DEBUG, "No MDN requested for {}", message.message_id);
            return Ok(MdnDelivery::None);
        }

        if status.is_error() && message.partnership.flag(attrs::BLOCKED_ERROR_MDN) {
            incoming!(
                level = INFO,
                "Error MDNs are blocked for {}, reporting by status code only",
                message.partnership.label()
            );
            return Ok(MdnDelivery::Blocked);
        }

        let text = default_text(message, disposition);
        let mdn = self.mdn.build(message, mic_source, disposition, &text)?;

        let Some(url) = message.headers.get(RECEIPT_DELIVERY_OPTION) else {
            return Ok(MdnDelivery::Sync(Box::new(mdn)));
        };

        let url = url.trim().to_string();
        if let Err(err) = self
            .handlers
            .dispatch(Action::SendAsyncMdn {
                mdn: Box::new(mdn),
                url: url.clone(),
            })
            .await
        {
            internal!(
                level = ERROR,
                "Unable to deliver asynchronous MDN for {} to {url}: {err}",
                message.message_id
            );
        }

        Ok(MdnDelivery::Async { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ReceiptStatus, mdn: MdnDelivery) -> ReceiptOutcome {
        ReceiptOutcome {
            message: Message::default(),
            status,
            mdn,
        }
    }

    #[test]
    fn test_http_status() {
        let failed = || ReceiptStatus::Error(As2Error::Unexpected("boom".into()));

        assert_eq!(
            outcome(ReceiptStatus::Processed, MdnDelivery::None).http_status().0,
            200
        );
        assert_eq!(outcome(failed(), MdnDelivery::Blocked).http_status().0, 500);
        assert_eq!(outcome(failed(), MdnDelivery::None).http_status().0, 500);
        assert_eq!(
            outcome(
                failed(),
                MdnDelivery::Async {
                    url: "http://a/mdn".into()
                }
            )
            .http_status()
            .0,
            200
        );
    }

    #[test]
    fn test_status_disposition() {
        assert!(ReceiptStatus::Processed.disposition().is_success());

        let warning = ReceiptStatus::Warning(As2Error::Disposition(DispositionError::new(
            Disposition::warning("duplicate-document"),
        )));
        assert!(warning.disposition().is_warning());
        assert!(!warning.is_error());
    }
}
