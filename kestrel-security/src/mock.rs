//! Deterministic [`SmimeProvider`] for tests and dry runs.
//!
//! Produces structurally faithful S/MIME entities (`multipart/signed` with a
//! detached `application/pkcs7-signature` part, `application/pkcs7-mime`
//! enveloped and compressed data) without real CMS. "Signatures" are
//! SHA-256 over the signer's certificate fingerprint and the signed entity,
//! "encryption" records the recipient fingerprint and base64 encodes the
//! inner entity. Nothing here is secret.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use kestrel_common::{
    MimeBody,
    headers::{CONTENT_DISPOSITION, CONTENT_TRANSFER_ENCODING},
    mime::{APPLICATION_PKCS7_SIGNATURE, MULTIPART_SIGNED},
};
use sha2::{Digest, Sha256};

use crate::{
    algorithm::{CompressionType, EncryptionAlgorithm},
    certificate::{Certificate, PrivateKey},
    error::SmimeError,
    smime::{SignOptions, SmimeProvider},
};

const SIGNATURE_MAGIC: &str = "kestrel-mock-signature";
const ENVELOPED_MAGIC: &str = "kestrel-mock-enveloped";
const COMPRESSED_MAGIC: &str = "kestrel-mock-compressed";

#[derive(Debug, Default, Clone, Copy)]
pub struct MockSmimeProvider;

impl MockSmimeProvider {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn signature_value(fingerprint: &str, signed: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(signed);
    hex::encode(hasher.finalize())
}

fn base64_lines(data: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38);
    for (index, chunk) in encoded.as_bytes().chunks(76).enumerate() {
        if index > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(chunk);
    }
    out
}

fn decode_base64(content: &[u8]) -> Result<Vec<u8>, SmimeError> {
    let compact: Vec<u8> = content
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(STANDARD.decode(compact)?)
}

fn attachment(content_type: &str, filename: &str, payload: &[u8]) -> MimeBody {
    let mut body = MimeBody::new(content_type, base64_lines(payload));
    body.set_header(CONTENT_TRANSFER_ENCODING, "base64");
    body.set_header(
        CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\""),
    );
    body
}

/// `magic\nkey: value\n...\n\n<payload>`
fn envelope(magic: &str, fields: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{magic}\n");
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(payload);
    bytes
}

fn open_envelope(
    magic: &str,
    data: &[u8],
) -> Result<(BTreeMap<String, String>, Vec<u8>), SmimeError> {
    let split = data
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| SmimeError::Malformed(format!("{magic} header not terminated")))?;

    let header = String::from_utf8_lossy(&data[..split]);
    let mut lines = header.lines();
    if lines.next() != Some(magic) {
        return Err(SmimeError::Malformed(format!("expected {magic}")));
    }

    let fields = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Ok((fields, data[split + 2..].to_vec()))
}

fn signed_parts(body: &MimeBody) -> Result<(MimeBody, BTreeMap<String, String>), SmimeError> {
    if body.mime_type() != MULTIPART_SIGNED {
        return Err(SmimeError::Malformed(format!(
            "expected {MULTIPART_SIGNED}, got {}",
            body.mime_type()
        )));
    }

    let mut parts = body.parts()?;
    if parts.len() != 2 {
        return Err(SmimeError::Malformed(format!(
            "signed entity has {} parts",
            parts.len()
        )));
    }

    let signature = parts.remove(1);
    let content = parts.remove(0);
    if signature.mime_type() != APPLICATION_PKCS7_SIGNATURE {
        return Err(SmimeError::Malformed(format!(
            "unexpected signature type {}",
            signature.mime_type()
        )));
    }

    let (fields, _) = open_envelope(SIGNATURE_MAGIC, &decode_base64(signature.content())?)?;
    Ok((content, fields))
}

impl SmimeProvider for MockSmimeProvider {
    fn sign(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        key: &PrivateKey,
        options: SignOptions,
    ) -> Result<MimeBody, SmimeError> {
        if key.alias() != certificate.alias() {
            return Err(SmimeError::Malformed(format!(
                "private key '{}' does not belong to certificate '{}'",
                key.alias(),
                certificate.alias()
            )));
        }

        let fingerprint = certificate.fingerprint();
        let value = signature_value(&fingerprint, &body.to_bytes());
        let label = options.digest.label(options.legacy_names);
        let embedded = format!("{}:{}", certificate.alias(), STANDARD.encode(certificate.der()));

        let mut fields = vec![
            ("signer", fingerprint.as_str()),
            ("digest", label),
            ("value", value.as_str()),
        ];
        if options.include_certificate {
            fields.push(("certificate", embedded.as_str()));
        }

        let signature = attachment(
            "application/pkcs7-signature; name=smime.p7s",
            "smime.p7s",
            &envelope(SIGNATURE_MAGIC, &fields, &[]),
        );

        Ok(MimeBody::multipart(
            &format!("{MULTIPART_SIGNED}; protocol=\"{APPLICATION_PKCS7_SIGNATURE}\"; micalg={label}"),
            &[body.clone(), signature],
        ))
    }

    fn embedded_certificate(&self, body: &MimeBody) -> Result<Option<Certificate>, SmimeError> {
        let (_, fields) = signed_parts(body)?;
        let Some(embedded) = fields.get("certificate") else {
            return Ok(None);
        };

        let (alias, der) = embedded
            .split_once(':')
            .ok_or_else(|| SmimeError::Malformed("embedded certificate".to_string()))?;
        Ok(Some(Certificate::new(alias, STANDARD.decode(der)?)))
    }

    fn verify(&self, body: &MimeBody, certificate: &Certificate) -> Result<MimeBody, SmimeError> {
        let (content, fields) = signed_parts(body)?;
        let fingerprint = certificate.fingerprint();

        let signer_matches = fields.get("signer") == Some(&fingerprint);
        let value_matches =
            fields.get("value") == Some(&signature_value(&fingerprint, &content.to_bytes()));

        if signer_matches && value_matches {
            Ok(content)
        } else {
            Err(SmimeError::BadSignature(certificate.alias().to_string()))
        }
    }

    fn encrypt(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        algorithm: EncryptionAlgorithm,
    ) -> Result<MimeBody, SmimeError> {
        let fingerprint = certificate.fingerprint();
        Ok(attachment(
            "application/pkcs7-mime; smime-type=enveloped-data; name=smime.p7m",
            "smime.p7m",
            &envelope(
                ENVELOPED_MAGIC,
                &[("algorithm", algorithm.label()), ("recipient", fingerprint.as_str())],
                &body.to_bytes(),
            ),
        ))
    }

    fn decrypt(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        key: &PrivateKey,
    ) -> Result<MimeBody, SmimeError> {
        if !body.is_encrypted() {
            return Err(SmimeError::Malformed(format!(
                "not enveloped data: {}",
                body.mime_type()
            )));
        }

        let (fields, inner) = open_envelope(ENVELOPED_MAGIC, &decode_base64(body.content())?)?;
        if fields.get("recipient") != Some(&certificate.fingerprint())
            || key.alias() != certificate.alias()
        {
            return Err(SmimeError::NotRecipient(certificate.alias().to_string()));
        }

        Ok(MimeBody::parse(&inner)?)
    }

    fn compress(
        &self,
        body: &MimeBody,
        compression: CompressionType,
    ) -> Result<MimeBody, SmimeError> {
        Ok(attachment(
            "application/pkcs7-mime; smime-type=compressed-data; name=smime.p7z",
            "smime.p7z",
            &envelope(
                COMPRESSED_MAGIC,
                &[("algorithm", compression.label())],
                &body.to_bytes(),
            ),
        ))
    }

    fn decompress(&self, body: &MimeBody) -> Result<MimeBody, SmimeError> {
        if !body.is_compressed() {
            return Err(SmimeError::Malformed(format!(
                "not compressed data: {}",
                body.mime_type()
            )));
        }

        let (_, inner) = open_envelope(COMPRESSED_MAGIC, &decode_base64(body.content())?)?;
        Ok(MimeBody::parse(&inner)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::algorithm::DigestAlgorithm;

    fn identity(alias: &str) -> (Certificate, PrivateKey) {
        (
            Certificate::new(alias, alias.as_bytes().to_vec()),
            PrivateKey::new(alias, vec![0xAA]),
        )
    }

    fn document() -> MimeBody {
        let mut body = MimeBody::new("application/edi-x12", b"ISA*00*\r\nGS*PO~\r\n".as_slice());
        body.set_header(CONTENT_TRANSFER_ENCODING, "binary");
        body
    }

    const OPTIONS: SignOptions = SignOptions {
        digest: DigestAlgorithm::Sha256,
        include_certificate: true,
        legacy_names: false,
    };

    #[test]
    fn test_sign_then_verify() {
        let provider = MockSmimeProvider::new();
        let (cert, key) = identity("acme");

        let signed = provider.sign(&document(), &cert, &key, OPTIONS).unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.content_type_param("micalg").as_deref(), Some("sha-256"));

        assert_eq!(provider.verify(&signed, &cert).unwrap(), document());
        assert_eq!(provider.embedded_certificate(&signed).unwrap(), Some(cert));
    }

    #[test]
    fn test_verify_with_wrong_certificate() {
        let provider = MockSmimeProvider::new();
        let (cert, key) = identity("acme");
        let (other, _) = identity("globex");

        let signed = provider.sign(&document(), &cert, &key, OPTIONS).unwrap();
        assert!(matches!(
            provider.verify(&signed, &other),
            Err(SmimeError::BadSignature(_))
        ));
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let provider = MockSmimeProvider::new();
        let (cert, key) = identity("acme");

        let signed = provider.sign(&document(), &cert, &key, OPTIONS).unwrap();
        let tampered_content = String::from_utf8_lossy(signed.content()).replace("GS*PO", "GS*IN");
        let tampered = MimeBody::from_parts(signed.headers().clone(), tampered_content.into_bytes());

        assert!(provider.verify(&tampered, &cert).is_err());
    }

    #[test]
    fn test_sign_without_embedded_certificate() {
        let provider = MockSmimeProvider::new();
        let (cert, key) = identity("acme");
        let options = SignOptions {
            include_certificate: false,
            legacy_names: true,
            ..OPTIONS
        };

        let signed = provider.sign(&document(), &cert, &key, options).unwrap();
        assert_eq!(signed.content_type_param("micalg").as_deref(), Some("sha256"));
        assert_eq!(provider.embedded_certificate(&signed).unwrap(), None);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let provider = MockSmimeProvider::new();
        let (cert, key) = identity("globex");
        let (other_cert, other_key) = identity("acme");

        let encrypted = provider
            .encrypt(&document(), &cert, EncryptionAlgorithm::Aes256)
            .unwrap();
        assert!(encrypted.is_encrypted());

        assert_eq!(provider.decrypt(&encrypted, &cert, &key).unwrap(), document());
        assert!(matches!(
            provider.decrypt(&encrypted, &other_cert, &other_key),
            Err(SmimeError::NotRecipient(_))
        ));
    }

    #[test]
    fn test_compress_decompress() {
        let provider = MockSmimeProvider::new();
        let compressed = provider.compress(&document(), CompressionType::Zlib).unwrap();
        assert!(compressed.is_compressed());
        assert_eq!(provider.decompress(&compressed).unwrap(), document());
        assert!(provider.decompress(&document()).is_err());
    }
}
