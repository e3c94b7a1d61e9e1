#![allow(clippy::unwrap_used)]

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use kestrel::{Kestrel, KestrelConfig};
use kestrel_common::{
    Headers, Message, MimeBody, Partnership,
    headers::{AS2_FROM, AS2_TO, CONTENT_TYPE, MESSAGE_ID},
};
use kestrel_delivery::{
    BoxedSource, HttpResponse, InboundRequest, MdnDelivery, MockTransport, ReceiptStatus,
    SendOutcome, StorageHook,
};
use kestrel_security::{Certificate, MemoryCertificateStore, MockSmimeProvider, PrivateKey};
use parking_lot::Mutex;

const CONFIG: &str = r#"(
    partnerships: [
        (
            name: "acme-to-globex",
            sender: { "as2_id": "ACME", "x509_alias": "acme" },
            receiver: { "as2_id": "GLOBEX", "x509_alias": "globex" },
            attributes: { "as2_url": "http://globex.example/as2" },
        ),
        (
            name: "globex-to-acme",
            sender: { "as2_id": "GLOBEX", "x509_alias": "globex" },
            receiver: { "as2_id": "ACME", "x509_alias": "acme" },
        ),
    ],
    pending: Memory,
    resend: (max_retries: 2, base_delay_secs: 0, max_delay_secs: 0, jitter_factor: 0.0),
    sender: (hostname: "acme.example"),
)"#;

#[derive(Debug, Default)]
struct Inbox(Mutex<Vec<Message>>);

#[async_trait]
impl StorageHook for Inbox {
    async fn store(&self, message: &Message) -> Result<(), BoxedSource> {
        self.0.lock().push(message.clone());
        Ok(())
    }
}

fn certificates() -> Arc<MemoryCertificateStore> {
    let store = MemoryCertificateStore::new();
    for alias in ["acme", "globex"] {
        store.insert_certificate(Certificate::new(alias, alias.as_bytes().to_vec()));
        store.insert_private_key(PrivateKey::new(alias, alias.as_bytes().to_vec()));
    }
    Arc::new(store)
}

fn kestrel(transport: Arc<MockTransport>, inbox: Arc<Inbox>) -> Kestrel {
    Kestrel::builder(KestrelConfig::parse(CONFIG).unwrap())
        .provider(Arc::new(MockSmimeProvider::new()))
        .transport(transport)
        .certificates(certificates())
        .storage(inbox)
        .build()
        .unwrap()
}

fn document() -> MimeBody {
    MimeBody::new("application/edi-x12", b"ISA*00*~IEA*1*1~".as_slice())
}

#[test]
fn build_requires_provider_and_transport() {
    let config = KestrelConfig::parse(CONFIG).unwrap();
    let err = Kestrel::builder(config.clone())
        .transport(Arc::new(MockTransport::new()))
        .certificates(certificates())
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("S/MIME provider"), "{err}");

    let err = Kestrel::builder(config)
        .provider(Arc::new(MockSmimeProvider::new()))
        .certificates(certificates())
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("transport"), "{err}");
}

#[test]
fn build_rejects_invalid_config() {
    let mut config = KestrelConfig::parse(CONFIG).unwrap();
    config.resend.jitter_factor = 2.0;

    let result = Kestrel::builder(config)
        .provider(Arc::new(MockSmimeProvider::new()))
        .transport(Arc::new(MockTransport::new()))
        .certificates(certificates())
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn failed_send_is_resent_when_due() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(HttpResponse::status(503, "Service Unavailable"));
    let kestrel = kestrel(transport.clone(), Arc::default());
    assert_eq!(kestrel.partnerships().len(), 2);

    let message = Message::new(Partnership::between("ACME", "GLOBEX"), document());
    let outcome = kestrel.sender().send(message).await.unwrap();
    assert!(matches!(outcome, SendOutcome::ResendScheduled));
    assert_eq!(kestrel.queue().len(), 1);

    let attempted = kestrel
        .process_due_resends(SystemTime::now() + Duration::from_secs(1))
        .await;
    assert_eq!(attempted, 1);
    assert!(kestrel.queue().is_empty());
    assert_eq!(transport.request_count(), 2);

    let requests = transport.requests();
    assert_eq!(
        requests[0].1.headers.get(MESSAGE_ID),
        requests[1].1.headers.get(MESSAGE_ID)
    );
}

#[tokio::test]
async fn nothing_due_does_nothing() {
    let transport = Arc::new(MockTransport::new());
    let kestrel = kestrel(transport.clone(), Arc::default());

    assert_eq!(kestrel.process_due_resends(SystemTime::now()).await, 0);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn plain_inbound_message_is_stored_without_receipt() {
    let inbox = Arc::new(Inbox::default());
    let kestrel = kestrel(Arc::new(MockTransport::new()), inbox.clone());

    let headers: Headers = [
        (AS2_FROM, "GLOBEX"),
        (AS2_TO, "ACME"),
        (MESSAGE_ID, "<invoice-7@globex.example>"),
        (CONTENT_TYPE, "application/edi-x12"),
    ]
    .into_iter()
    .collect();

    let outcome = kestrel
        .receiver()
        .receive(InboundRequest {
            headers,
            body: document().content().to_vec(),
            ..InboundRequest::default()
        })
        .await
        .unwrap();

    assert!(matches!(outcome.status, ReceiptStatus::Processed));
    assert!(matches!(outcome.mdn, MdnDelivery::None));
    assert_eq!(outcome.http_status().0, 200);

    let stored = inbox.0.lock();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message_id, "<invoice-7@globex.example>");
    assert_eq!(
        stored[0].body.as_ref().unwrap().content(),
        document().content()
    );
}
