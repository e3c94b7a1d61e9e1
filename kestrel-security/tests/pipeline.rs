#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use kestrel_common::{
    DispositionReason, Message, MimeBody, Partnership,
    attributes::{DUMPED_TO, WAS_COMPRESSED, WAS_ENCRYPTED, WAS_SIGNED},
    headers::CONTENT_TRANSFER_ENCODING,
    partnership::{attrs, ids},
};
use kestrel_security::{
    Certificate, CompressionType, DigestAlgorithm, MemoryCertificateStore, Mic,
    EncryptionAlgorithm, MockSmimeProvider, PrivateKey, SecurityDefaults, SecurityError,
    SecurityService, SmimeProvider, UnsecuredBody,
};
use pretty_assertions::assert_eq;

fn certificates() -> Arc<MemoryCertificateStore> {
    let store = MemoryCertificateStore::new();
    for alias in ["acme", "globex"] {
        store.insert_certificate(Certificate::new(alias, format!("cert-{alias}").into_bytes()));
        store.insert_private_key(PrivateKey::new(alias, format!("key-{alias}").into_bytes()));
    }
    Arc::new(store)
}

fn service(defaults: SecurityDefaults) -> SecurityService {
    SecurityService::new(Arc::new(MockSmimeProvider::new()), certificates(), defaults)
}

fn outbound_partnership() -> Partnership {
    let mut partnership = Partnership::between("ACME", "GLOBEX");
    partnership
        .sender
        .insert(ids::X509_ALIAS.to_string(), "acme".to_string());
    partnership
        .receiver
        .insert(ids::X509_ALIAS.to_string(), "globex".to_string());
    partnership
}

/// The same partnership as seen by the receiving side.
fn inbound_view(outbound: &Partnership) -> Partnership {
    let mut partnership = outbound.clone();
    partnership.attributes.retain(|key, _| {
        ![attrs::SIGN, attrs::ENCRYPT, attrs::COMPRESSION, attrs::COMPRESSION_MODE]
            .contains(&key.as_str())
    });
    partnership
}

fn document() -> MimeBody {
    let mut body = MimeBody::new("application/edi-x12", b"ISA*00*~\r\nIEA*1~\r\n".as_slice());
    body.set_header(CONTENT_TRANSFER_ENCODING, "binary");
    body
}

fn receive(
    service: &SecurityService,
    partnership: Partnership,
    body: MimeBody,
) -> (Message, Result<UnsecuredBody, SecurityError>) {
    let mut message = Message::new(partnership, body);
    message.message_id = "<rx-1@globex>".to_string();
    let result = service.unsecure(&mut message);
    (message, result)
}

#[test]
fn unsecured_partnership_passes_body_through() {
    let service = service(SecurityDefaults::default());
    let partnership = outbound_partnership();

    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();
    assert_eq!(secured.body, document());
    assert_eq!(secured.body_of_record, document());
    assert!(!secured.signed && !secured.encrypted && !secured.compressed);

    let (message, result) = receive(&service, inbound_view(&partnership), secured.body);
    let unsecured = result.unwrap();
    assert_eq!(unsecured.body, document());
    assert_eq!(message.body, Some(document()));
    assert!(!unsecured.include_headers_in_mic());
    assert!(!message.attributes.flag(WAS_SIGNED));
}

#[test]
fn full_pipeline_round_trip_with_matching_mic() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    partnership.set_attribute(attrs::ENCRYPT, "aes256");
    partnership.set_attribute(attrs::COMPRESSION, "zlib");

    let secured = service
        .secure(&partnership, &document(), |_| panic!("no body-of-record change"))
        .unwrap();
    assert!(secured.body.is_encrypted());
    let sent_mic =
        SecurityService::compute_mic(&secured.body_of_record, DigestAlgorithm::Sha256, &partnership);

    let (message, result) = receive(&service, inbound_view(&partnership), secured.body);
    let unsecured = result.unwrap();

    assert_eq!(unsecured.body, document());
    assert!(message.attributes.flag(WAS_ENCRYPTED));
    assert!(message.attributes.flag(WAS_SIGNED));
    assert!(message.attributes.flag(WAS_COMPRESSED));
    assert_eq!(unsecured.mic(DigestAlgorithm::Sha256), sent_mic);
}

#[test]
fn compress_before_signing_changes_body_of_record() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha1");
    partnership.set_attribute(attrs::COMPRESSION, "zlib");
    partnership.set_attribute(attrs::COMPRESSION_MODE, attrs::COMPRESS_BEFORE_SIGNING);

    let mut recorded = None;
    let secured = service
        .secure(&partnership, &document(), |body| recorded = Some(body.clone()))
        .unwrap();

    let recorded = recorded.unwrap();
    assert!(recorded.is_compressed());
    assert_eq!(secured.body_of_record, recorded);
    assert!(secured.body.is_signed());

    let sent_mic = SecurityService::compute_mic(&recorded, DigestAlgorithm::Sha1, &partnership);
    let (_, result) = receive(&service, inbound_view(&partnership), secured.body);
    let unsecured = result.unwrap();
    assert_eq!(unsecured.body, document());
    assert_eq!(unsecured.mic_source, recorded);
    assert_eq!(unsecured.mic(DigestAlgorithm::Sha1), sent_mic);
}

#[test]
fn missing_key_material_fails_before_any_step() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    partnership
        .sender
        .insert(ids::X509_ALIAS.to_string(), "unknown".to_string());

    let err = service.secure(&partnership, &document(), |_| {}).unwrap_err();
    assert!(err.is_configuration());

    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::ENCRYPT, "aes128");
    partnership.receiver.remove(ids::X509_ALIAS);
    assert!(matches!(
        service.secure(&partnership, &document(), |_| {}),
        Err(SecurityError::MissingAlias("receiver"))
    ));

    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::ENCRYPT, "rot13");
    assert!(service.secure(&partnership, &document(), |_| {}).unwrap_err().is_configuration());
}

#[test]
fn double_compression_is_rejected() {
    let service = service(SecurityDefaults::default());
    let provider = MockSmimeProvider::new();

    let once = provider.compress(&document(), CompressionType::Zlib).unwrap();
    let twice = provider.compress(&once, CompressionType::Zlib).unwrap();

    let (message, result) = receive(&service, inbound_view(&outbound_partnership()), twice);
    let err = result.unwrap_err();
    assert!(matches!(err, SecurityError::DoubleCompression));
    assert_eq!(err.disposition_reason(), DispositionReason::DecompressionFailed);
    assert!(!message.attributes.flag(WAS_COMPRESSED));
}

#[test]
fn decryption_with_wrong_recipient_fails() {
    let service = service(SecurityDefaults::default());
    let provider = MockSmimeProvider::new();
    let encrypted = provider
        .encrypt(
            &document(),
            &Certificate::new("acme", b"cert-acme".to_vec()),
            EncryptionAlgorithm::Aes256,
        )
        .unwrap();

    let (_, result) = receive(&service, inbound_view(&outbound_partnership()), encrypted);
    assert_eq!(
        result.unwrap_err().disposition_reason(),
        DispositionReason::DecryptionFailed
    );
}

#[test]
fn missing_own_key_reports_decryption_failed() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::ENCRYPT, "aes256");
    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();

    let mut inbound = inbound_view(&partnership);
    inbound
        .receiver
        .insert(ids::X509_ALIAS.to_string(), "nobody".to_string());
    let (_, result) = receive(&service, inbound, secured.body);
    assert_eq!(
        result.unwrap_err().disposition_reason(),
        DispositionReason::DecryptionFailed
    );
}

#[test]
fn bad_signature_reports_integrity_check_failed() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();

    let mut inbound = inbound_view(&partnership);
    inbound
        .sender
        .insert(ids::X509_ALIAS.to_string(), "globex".to_string());
    let (_, result) = receive(&service, inbound, secured.body);
    assert_eq!(
        result.unwrap_err().disposition_reason(),
        DispositionReason::IntegrityCheckFailed
    );
}

#[test]
fn body_certificate_is_used_when_configured() {
    let defaults = SecurityDefaults {
        verify_use_certificate_in_body: true,
        ..SecurityDefaults::default()
    };
    let service = service(defaults);
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();

    // Configured certificate is wrong, embedded one is right: mismatch is
    // only logged.
    let mut inbound = inbound_view(&partnership);
    inbound
        .sender
        .insert(ids::X509_ALIAS.to_string(), "globex".to_string());
    let (message, result) = receive(&service, inbound, secured.body);
    assert!(result.is_ok());
    assert!(message.attributes.flag(WAS_SIGNED));
}

#[test]
fn disabled_stages_are_skipped() {
    let service = service(SecurityDefaults::default());
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();

    let mut inbound = inbound_view(&partnership);
    inbound.set_attribute(attrs::DISABLE_VERIFY, "true");
    let (message, result) = receive(&service, inbound, secured.body.clone());
    let unsecured = result.unwrap();
    assert!(unsecured.body.is_signed());
    assert!(!message.attributes.flag(WAS_SIGNED));
}

#[test]
fn decrypted_payload_is_dumped() {
    let directory = tempfile::tempdir().unwrap();
    let service = service(SecurityDefaults {
        dump_decrypted: Some(directory.path().to_path_buf()),
        ..SecurityDefaults::default()
    });
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::ENCRYPT, "3des");
    let secured = service.secure(&partnership, &document(), |_| {}).unwrap();

    let (message, result) = receive(&service, inbound_view(&partnership), secured.body);
    result.unwrap();

    let dumped = directory.path().join("rx-1@globex.decrypted");
    assert_eq!(std::fs::read(&dumped).unwrap(), document().to_bytes());
    assert_eq!(
        message.attributes.get(DUMPED_TO),
        Some(dumped.display().to_string().as_str())
    );
}

#[test]
fn legacy_digest_names_flow_into_mic_text() {
    let mut partnership = outbound_partnership();
    partnership.set_attribute(attrs::SIGN, "sha-256");
    partnership.set_attribute(attrs::RENAME_DIGEST_TO_OLD_NAME, "true");

    let mic = SecurityService::compute_mic(&document(), DigestAlgorithm::Sha256, &partnership);
    assert!(mic.to_string().ends_with(", sha256"));

    let modern: Mic = mic.to_string().replace("sha256", "sha-256").parse().unwrap();
    assert_eq!(modern, mic);
}
