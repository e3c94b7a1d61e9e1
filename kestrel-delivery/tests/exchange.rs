#![allow(clippy::unwrap_used)]

use std::{
    io,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use kestrel_common::{
    DispositionReason, Message, MimeBody, Partnership,
    audit::AuditLog,
    headers::{AS2_FROM, AS2_TO, DISPOSITION_NOTIFICATION_TO, MESSAGE_ID},
    partnership::{attrs, ids},
};
use kestrel_delivery::{
    Action, ActionHandlers, ActionOutcome, As2Error, BoxedSource, ErrorKind, HookError,
    HttpRequest, HttpResponse, InboundRequest, MdnDelivery, MockTransport, ReceiptStatus,
    Receiver, ResendConfig, ResendQueue, RetryCoordinator, SendOutcome, Sender, SenderConfig,
    StorageHook, Transport, ValidationHook,
};
use kestrel_mdn::{MdnConfig, MdnEngine};
use kestrel_partnership::PartnershipStore;
use kestrel_security::{
    Certificate, MemoryCertificateStore, MockSmimeProvider, PrivateKey, SecurityDefaults,
    SecurityService,
};
use kestrel_spool::{LoggingCallbacks, MemoryPendingStore, PendingStore, Reconciler};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const SIGNED_OPTIONS: &str = "signed-receipt-protocol=optional, pkcs7-signature; \
                              signed-receipt-micalg=optional, sha-256";
const GLOBEX_URL: &str = "http://globex.example/as2";
const ACME_MDN_URL: &str = "http://acme.example/mdn";

#[derive(Debug, Default)]
struct StoredMessages(Mutex<Vec<Message>>);

#[async_trait]
impl StorageHook for StoredMessages {
    async fn store(&self, message: &Message) -> Result<(), BoxedSource> {
        self.0.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Debug)]
struct WarnAll;

impl ValidationHook for WarnAll {
    fn validate(&self, _message: &Message) -> Result<(), HookError> {
        Err(HookError::Warning("duplicate-document".to_string()))
    }
}

/// Hands every POST straight to a receiver, optionally corrupting the body
/// on the way.
#[derive(Debug)]
struct Loopback {
    receiver: Receiver,
    tamper: bool,
}

#[async_trait]
impl Transport for Loopback {
    async fn post(&self, _url: &str, request: HttpRequest) -> io::Result<HttpResponse> {
        let mut body = request.body;
        if self.tamper {
            body.extend_from_slice(b"~tampered");
        }

        let outcome = self
            .receiver
            .receive(InboundRequest {
                headers: request.headers,
                body,
                ..InboundRequest::default()
            })
            .await
            .map_err(io::Error::other)?;
        Ok(outcome.into_response())
    }
}

struct Side {
    sender: Arc<Sender>,
    receiver: Receiver,
    handlers: Arc<ActionHandlers>,
    queue: Arc<ResendQueue>,
    pending: Arc<MemoryPendingStore>,
    stored: Arc<StoredMessages>,
}

fn certificates() -> Arc<MemoryCertificateStore> {
    let store = MemoryCertificateStore::new();
    for alias in ["acme", "globex"] {
        store.insert_certificate(Certificate::new(alias, format!("cert-{alias}").into_bytes()));
        store.insert_private_key(PrivateKey::new(alias, format!("key-{alias}").into_bytes()));
    }
    Arc::new(store)
}

fn identities() -> Partnership {
    let mut partnership = Partnership::between("ACME", "GLOBEX");
    partnership
        .sender
        .insert(ids::X509_ALIAS.to_string(), "acme".to_string());
    partnership
        .receiver
        .insert(ids::X509_ALIAS.to_string(), "globex".to_string());
    partnership
}

fn outbound(secured: bool) -> Partnership {
    let mut partnership = identities();
    partnership.set_attribute(attrs::AS2_URL, GLOBEX_URL);
    partnership.set_attribute(attrs::AS2_MDN_TO, "edi@acme.example");
    if secured {
        partnership.set_attribute(attrs::AS2_MDN_OPTIONS, SIGNED_OPTIONS);
        partnership.set_attribute(attrs::SIGN, "sha-256");
        partnership.set_attribute(attrs::ENCRYPT, "aes256");
        partnership.set_attribute(attrs::COMPRESSION, "zlib");
    }
    partnership
}

fn side(host: &str, partnerships: Vec<Partnership>, transport: Arc<dyn Transport>) -> Side {
    let security = Arc::new(SecurityService::new(
        Arc::new(MockSmimeProvider::new()),
        certificates(),
        SecurityDefaults::default(),
    ));
    let partnerships = Arc::new(PartnershipStore::with_partnerships(partnerships, false).unwrap());
    let mdn = Arc::new(MdnEngine::new(
        Arc::clone(&security),
        Arc::clone(&partnerships),
        MdnConfig {
            hostname: host.to_string(),
            ..MdnConfig::default()
        },
    ));

    let config = ResendConfig {
        base_delay_secs: 0,
        max_delay_secs: 0,
        jitter_factor: 0.0,
        ..ResendConfig::default()
    };
    let queue = Arc::new(ResendQueue::new(config.clone()));
    let retry = RetryCoordinator::new(queue.clone(), AuditLog::default(), config);
    let pending = Arc::new(MemoryPendingStore::new());

    let sender = Arc::new(Sender::new(
        Arc::clone(&security),
        Arc::clone(&partnerships),
        Arc::clone(&mdn),
        pending.clone(),
        transport,
        retry,
        SenderConfig {
            hostname: host.to_string(),
            ..SenderConfig::default()
        },
    ));
    let stored = Arc::new(StoredMessages::default());
    let handlers = Arc::new(ActionHandlers::new(
        Arc::clone(&sender),
        Some(stored.clone() as Arc<dyn StorageHook>),
    ));
    let reconciler = Reconciler::new(
        pending.clone(),
        Arc::new(LoggingCallbacks::new(AuditLog::default())),
    );
    let receiver = Receiver::new(security, partnerships, mdn, Arc::clone(&handlers), reconciler);

    Side {
        sender,
        receiver,
        handlers,
        queue,
        pending,
        stored,
    }
}

/// GLOBEX receives; its own outbound posts (async receipts) are recorded.
fn globex(inbound: Partnership) -> (Side, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    (side("globex.example", vec![inbound], transport.clone()), transport)
}

fn document() -> MimeBody {
    MimeBody::new(
        "application/edi-x12",
        b"ISA*00*          *00*~\r\nIEA*1*000000001~\r\n".as_slice(),
    )
}

fn message() -> Message {
    Message::new(Partnership::between("ACME", "GLOBEX"), document())
}

#[tokio::test]
async fn secured_message_gets_signed_sync_mdn() {
    let (globex, _) = globex(identities());
    let acme = side(
        "acme.example",
        vec![outbound(true)],
        Arc::new(Loopback {
            receiver: globex.receiver.clone(),
            tamper: false,
        }),
    );

    let outcome = acme.sender.send(message()).await.unwrap();

    let SendOutcome::Delivered { mdn: Some(mdn) } = outcome else {
        panic!("expected a synchronous receipt, got {outcome:?}");
    };
    assert!(mdn.disposition.as_ref().unwrap().is_success());
    assert!(mdn.attributes.flag(kestrel_common::attributes::WAS_SIGNED));
    assert!(mdn.received_mic.as_deref().unwrap().ends_with(", sha-256"));

    let stored = globex.stored.0.lock();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body.as_ref().unwrap().content(), document().content());
    assert!(stored[0].attributes.flag(kestrel_common::attributes::WAS_ENCRYPTED));
}

#[tokio::test]
async fn tampered_body_is_a_mic_mismatch() {
    let (globex, _) = globex(identities());
    let acme = side(
        "acme.example",
        vec![outbound(false)],
        Arc::new(Loopback {
            receiver: globex.receiver.clone(),
            tamper: true,
        }),
    );

    let err = acme.sender.send(message()).await.unwrap_err();
    assert!(matches!(err, As2Error::MicMismatch { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailed);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn async_mdn_reconciles_pending_record() {
    let (globex, globex_transport) = globex(identities());
    let mut partnership = outbound(true);
    partnership.set_attribute(attrs::AS2_RECEIPT_OPTION, ACME_MDN_URL);
    let acme = side(
        "acme.example",
        vec![partnership],
        Arc::new(Loopback {
            receiver: globex.receiver.clone(),
            tamper: false,
        }),
    );

    let outcome = acme.sender.send(message()).await.unwrap();
    let SendOutcome::AwaitingAsyncMdn { message_id, mic } = outcome else {
        panic!("expected to await an asynchronous receipt, got {outcome:?}");
    };
    assert_eq!(
        acme.pending.load(&message_id).await.unwrap().unwrap().mic,
        mic
    );

    let posts = globex_transport.requests();
    assert_eq!(posts.len(), 1);
    let (url, receipt) = posts.into_iter().next().unwrap();
    assert_eq!(url, ACME_MDN_URL);

    let reconciliation = acme
        .receiver
        .receive_mdn(InboundRequest {
            headers: receipt.headers,
            body: receipt.body,
            ..InboundRequest::default()
        })
        .await
        .unwrap();

    assert!(reconciliation.is_matched(), "{reconciliation:?}");
    assert!(acme.pending.is_empty());
}

#[tokio::test]
async fn transport_failure_schedules_resend_and_drops_pending() {
    let transport = Arc::new(MockTransport::new());
    transport.fail(io::ErrorKind::ConnectionRefused, "connection refused");

    let mut partnership = outbound(false);
    partnership.set_attribute(attrs::AS2_RECEIPT_OPTION, ACME_MDN_URL);
    let acme = side("acme.example", vec![partnership], transport.clone());

    let outcome = acme.sender.send(message()).await.unwrap();
    assert!(matches!(outcome, SendOutcome::ResendScheduled));
    assert!(acme.pending.is_empty());
    assert_eq!(acme.queue.len(), 1);

    let due = acme.queue.due(SystemTime::now() + Duration::from_secs(1));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].tries_left, 4);
    assert_eq!(due[0].action_name(), "send");
    assert!(due[0].cause.contains("connection refused"));
}

#[tokio::test]
async fn resend_redelivers_with_same_message_id() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(HttpResponse::status(503, "Service Unavailable"));

    let mut partnership = outbound(false);
    partnership.attributes.remove(attrs::AS2_MDN_TO);
    let acme = side("acme.example", vec![partnership], transport.clone());

    let outcome = acme.sender.send(message()).await.unwrap();
    assert!(matches!(outcome, SendOutcome::ResendScheduled));

    let request = acme
        .queue
        .due(SystemTime::now() + Duration::from_secs(1))
        .pop()
        .unwrap();
    let outcome = acme.handlers.dispatch(Action::Resend(request)).await.unwrap();
    assert!(matches!(
        outcome,
        ActionOutcome::Sent(sent) if matches!(*sent, SendOutcome::Delivered { mdn: None })
    ));

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].1.headers.get(MESSAGE_ID),
        requests[1].1.headers.get(MESSAGE_ID)
    );
    assert!(acme.queue.is_empty());
}

#[tokio::test]
async fn exhausted_retries_surface_the_failure() {
    let transport = Arc::new(MockTransport::new());
    transport.fail(io::ErrorKind::TimedOut, "read timed out");

    let mut partnership = outbound(false);
    partnership.set_attribute(attrs::RESEND_MAX_RETRIES, "0");
    let acme = side("acme.example", vec![partnership], transport);

    let err = acme.sender.send(message()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportIo);
    assert!(acme.queue.is_empty());
}

#[tokio::test]
async fn carried_retry_count_never_exceeds_partnership_budget() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(HttpResponse::status(503, "Service Unavailable"));

    let mut partnership = outbound(false);
    partnership.set_attribute(attrs::RESEND_MAX_RETRIES, "2");
    let acme = side("acme.example", vec![partnership], transport);

    let mut resent = message();
    resent
        .attributes
        .set(kestrel_common::attributes::RESEND_TRIES_LEFT, "5");
    let outcome = acme.sender.send(resent).await.unwrap();
    assert!(matches!(outcome, SendOutcome::ResendScheduled));

    let due = acme.queue.due(SystemTime::now() + Duration::from_secs(1));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].tries_left, 1);
}

#[tokio::test]
async fn missing_url_fails_before_any_io() {
    let transport = Arc::new(MockTransport::new());
    let mut partnership = outbound(true);
    partnership.attributes.remove(attrs::AS2_URL);
    let acme = side("acme.example", vec![partnership], transport.clone());

    let err = acme.sender.send(message()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(!err.is_retryable());
    assert_eq!(transport.request_count(), 0);
    assert!(acme.queue.is_empty());
}

#[tokio::test]
async fn unknown_partner_gets_authentication_failed_mdn() {
    let (globex, _) = globex(identities());

    let mut headers = kestrel_common::Headers::new();
    headers.set(AS2_FROM, "INITECH");
    headers.set(AS2_TO, "GLOBEX");
    headers.set(MESSAGE_ID, "<1@initech>");
    headers.set(DISPOSITION_NOTIFICATION_TO, "edi@initech.example");
    headers.set("Content-Type", "application/edi-x12");

    let outcome = globex
        .receiver
        .receive(InboundRequest {
            headers,
            body: b"ISA*00*~".to_vec(),
            ..InboundRequest::default()
        })
        .await
        .unwrap();

    let ReceiptStatus::Error(err) = &outcome.status else {
        panic!("expected an error status, got {:?}", outcome.status);
    };
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

    let MdnDelivery::Sync(mdn) = &outcome.mdn else {
        panic!("expected a synchronous receipt");
    };
    assert_eq!(
        mdn.disposition.as_ref().unwrap().description(),
        Some(DispositionReason::AuthenticationFailed.as_str())
    );
    assert_eq!(outcome.http_status().0, 200);
    assert!(globex.stored.0.lock().is_empty());
}

#[tokio::test]
async fn blocked_error_mdn_reports_by_status_only() {
    let mut inbound = identities();
    inbound.set_attribute(attrs::FORCE_DECRYPT, "true");
    inbound.set_attribute(attrs::BLOCKED_ERROR_MDN, "true");
    let (globex, _) = globex(inbound);

    let acme = side(
        "acme.example",
        vec![outbound(false)],
        Arc::new(Loopback {
            receiver: globex.receiver.clone(),
            tamper: false,
        }),
    );

    let outcome = acme.sender.send(message()).await.unwrap();
    assert!(matches!(outcome, SendOutcome::ResendScheduled));

    let due = acme.queue.due(SystemTime::now() + Duration::from_secs(1));
    assert_eq!(due.len(), 1);
    assert!(due[0].cause.contains("HTTP 500"), "{}", due[0].cause);
    assert!(globex.stored.0.lock().is_empty());
}

#[tokio::test]
async fn validation_warning_stops_before_storage() {
    let (globex, _) = globex(identities());
    let receiver = globex.receiver.clone().with_validation(Arc::new(WarnAll));

    let acme = side(
        "acme.example",
        vec![outbound(true)],
        Arc::new(Loopback {
            receiver,
            tamper: false,
        }),
    );

    let outcome = acme.sender.send(message()).await.unwrap();
    let SendOutcome::Warning { mdn } = outcome else {
        panic!("expected a warning receipt, got {outcome:?}");
    };
    assert_eq!(
        mdn.disposition.as_ref().unwrap().description(),
        Some("duplicate-document")
    );
    assert!(globex.stored.0.lock().is_empty());
}
