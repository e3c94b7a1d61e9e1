//! Security pipeline
//!
//! Outbound, per RFC 4130 / RFC 5402 ordering:
//!
//! ```text
//! [compress (before signing)] -> [sign] -> [compress (after signing)] -> [encrypt]
//! ```
//!
//! Inbound, as a state machine over a single message:
//!
//! ```text
//! decrypt -> decompress #1 -> verify -> decompress #2
//! ```
//!
//! Compression is removed at most once. A second compression layer after
//! decompress #1 is a protocol violation, never silently unwrapped.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use kestrel_common::{
    Message, MimeBody, Partnership,
    attributes::{DUMPED_TO, WAS_COMPRESSED, WAS_ENCRYPTED, WAS_SIGNED},
    incoming, internal,
    message::safe_filename,
    partnership::{attrs, ids},
};
use serde::{Deserialize, Serialize};

use crate::{
    algorithm::{CompressionType, DigestAlgorithm, EncryptionAlgorithm},
    certificate::{Certificate, CertificateStore},
    error::{InboundStage, SecurityError},
    mic::Mic,
    smime::{SignOptions, SmimeProvider},
};

/// Process-wide defaults consulted when a partnership leaves a tri-state
/// attribute unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityDefaults {
    /// Embed the signer certificate in signatures.
    pub include_certificate_in_signed_content: bool,
    /// Verify with the certificate embedded in the signature rather than the
    /// one configured for the partner.
    pub verify_use_certificate_in_body: bool,
    /// Directory decrypted entities are written to, for troubleshooting.
    pub dump_decrypted: Option<PathBuf>,
}

impl Default for SecurityDefaults {
    fn default() -> Self {
        Self {
            include_certificate_in_signed_content: true,
            verify_use_certificate_in_body: false,
            dump_decrypted: None,
        }
    }
}

/// Writes decrypted entities to a directory as `<message-id>.decrypted`.
#[derive(Debug, Clone)]
pub struct DumpSink {
    directory: PathBuf,
}

impl DumpSink {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// # Errors
    /// If the directory cannot be created or the file written.
    pub fn write(&self, message_id: &str, body: &MimeBody) -> Result<PathBuf, SecurityError> {
        let path = self
            .directory
            .join(format!("{}.decrypted", safe_filename(message_id)));

        std::fs::create_dir_all(&self.directory)
            .and_then(|()| std::fs::write(&path, body.to_bytes()))
            .map_err(|source| SecurityError::Dump {
                path: path.display().to_string(),
                source,
            })?;

        Ok(path)
    }
}

/// Result of the outbound pipeline.
#[derive(Debug, Clone)]
pub struct SecuredBody {
    /// Entity to put on the wire.
    pub body: MimeBody,
    /// Entity the MIC is computed over.
    pub body_of_record: MimeBody,
    pub signed: bool,
    pub encrypted: bool,
    pub compressed: bool,
}

impl SecuredBody {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.body.content_type()
    }
}

/// Result of the inbound pipeline.
#[derive(Debug, Clone)]
pub struct UnsecuredBody {
    /// Fully unwrapped business document.
    pub body: MimeBody,
    /// Entity the MIC is computed over: the signed content when a signature
    /// was verified, otherwise the final body.
    pub mic_source: MimeBody,
    pub decrypted: bool,
    pub verified: bool,
    pub decompressed: bool,
}

impl UnsecuredBody {
    /// Headers take part in the MIC when any protection was present.
    #[must_use]
    pub const fn include_headers_in_mic(&self) -> bool {
        self.decrypted || self.verified || self.decompressed
    }

    /// MIC for the receipt, computed with `algorithm`.
    #[must_use]
    pub fn mic(&self, algorithm: DigestAlgorithm) -> Mic {
        Mic::compute(&self.mic_source, algorithm, self.include_headers_in_mic())
    }
}

fn alias<'a>(
    identity: &'a BTreeMap<String, String>,
    side: &'static str,
) -> Result<&'a str, SecurityError> {
    identity
        .get(ids::X509_ALIAS)
        .map(String::as_str)
        .ok_or(SecurityError::MissingAlias(side))
}

fn in_stage(stage: InboundStage) -> impl FnOnce(SecurityError) -> SecurityError {
    move |source| SecurityError::Stage {
        stage,
        source: Box::new(source),
    }
}

/// Explicit service object for all S/MIME work.
///
/// Constructed once at startup and shared by reference between the sender,
/// the receiver and the MDN engine.
#[derive(Debug, Clone)]
pub struct SecurityService {
    provider: Arc<dyn SmimeProvider>,
    certificates: Arc<dyn CertificateStore>,
    defaults: SecurityDefaults,
    dump: Option<DumpSink>,
}

impl SecurityService {
    #[must_use]
    pub fn new(
        provider: Arc<dyn SmimeProvider>,
        certificates: Arc<dyn CertificateStore>,
        defaults: SecurityDefaults,
    ) -> Self {
        let dump = defaults.dump_decrypted.clone().map(DumpSink::new);
        Self {
            provider,
            certificates,
            defaults,
            dump,
        }
    }

    #[must_use]
    pub const fn defaults(&self) -> &SecurityDefaults {
        &self.defaults
    }

    #[must_use]
    pub fn certificates(&self) -> &dyn CertificateStore {
        self.certificates.as_ref()
    }

    /// Sign `body` with the key and certificate stored under `alias`.
    ///
    /// # Errors
    /// If the key material is missing or signing fails.
    pub fn sign(
        &self,
        body: &MimeBody,
        alias: &str,
        digest: DigestAlgorithm,
        include_certificate: bool,
        legacy_names: bool,
    ) -> Result<MimeBody, SecurityError> {
        let certificate = self.certificates.require_certificate(alias)?;
        let key = self.certificates.require_private_key(alias)?;

        self.provider
            .sign(
                body,
                &certificate,
                &key,
                SignOptions {
                    digest,
                    include_certificate,
                    legacy_names,
                },
            )
            .map_err(SecurityError::Sign)
    }

    /// Verify a `multipart/signed` entity and return its content.
    ///
    /// With `use_body_certificate`, the certificate embedded in the signature
    /// is preferred; a difference from the configured certificate is logged
    /// and otherwise ignored.
    ///
    /// # Errors
    /// If no usable certificate exists or the signature does not verify.
    pub fn verify(
        &self,
        body: &MimeBody,
        signer_alias: Option<&str>,
        use_body_certificate: bool,
    ) -> Result<MimeBody, SecurityError> {
        let configured = signer_alias.and_then(|alias| self.certificates.certificate(alias));

        let embedded = if use_body_certificate {
            self.provider
                .embedded_certificate(body)
                .map_err(SecurityError::Verify)?
        } else {
            None
        };

        let certificate: Certificate = match (embedded, configured) {
            (Some(embedded), Some(configured)) => {
                if embedded.der() != configured.der() {
                    internal!(
                        level = WARN,
                        "Certificate in signature differs from configured certificate '{}'",
                        configured.alias()
                    );
                }
                embedded
            }
            (Some(embedded), None) => embedded,
            (None, Some(configured)) => configured,
            (None, None) => {
                return Err(SecurityError::MissingCertificate(
                    signer_alias.unwrap_or("<none>").to_string(),
                ));
            }
        };

        self.provider
            .verify(body, &certificate)
            .map_err(SecurityError::Verify)
    }

    /// MIC over `body` for a partnership, honouring its legacy naming flag.
    #[must_use]
    pub fn compute_mic(
        body: &MimeBody,
        algorithm: DigestAlgorithm,
        partnership: &Partnership,
    ) -> Mic {
        Mic::compute(body, algorithm, partnership.is_secured())
            .with_legacy_label(partnership.flag(attrs::RENAME_DIGEST_TO_OLD_NAME))
    }

    /// Run the outbound pipeline.
    ///
    /// Every policy precondition is checked before the first step runs, so a
    /// misconfigured partnership fails without any work being done.
    /// `on_body_of_record` is invoked when compression before signing changes
    /// which entity the MIC covers.
    ///
    /// # Errors
    /// On configuration problems, or if a provider step fails.
    #[tracing::instrument(skip_all, fields(partnership = %partnership.label()))]
    pub fn secure(
        &self,
        partnership: &Partnership,
        body: &MimeBody,
        mut on_body_of_record: impl FnMut(&MimeBody),
    ) -> Result<SecuredBody, SecurityError> {
        let compression = partnership
            .compression_type()
            .map(str::parse::<CompressionType>)
            .transpose()?;
        let sign = partnership
            .sign_algorithm()
            .map(str::parse::<DigestAlgorithm>)
            .transpose()?;
        let encrypt = partnership
            .encrypt_algorithm()
            .map(str::parse::<EncryptionAlgorithm>)
            .transpose()?;

        let signer = match sign {
            Some(_) => {
                let alias = alias(&partnership.sender, "sender")?;
                self.certificates.require_certificate(alias)?;
                self.certificates.require_private_key(alias)?;
                Some(alias)
            }
            None => None,
        };
        let recipient = match encrypt {
            Some(_) => Some(
                self.certificates
                    .require_certificate(alias(&partnership.receiver, "receiver")?)?,
            ),
            None => None,
        };

        let before_signing = partnership.compress_before_signing();
        let mut current = body.clone();
        let mut body_of_record = body.clone();

        if let Some(compression) = compression
            && before_signing
        {
            current = self
                .provider
                .compress(&current, compression)
                .map_err(SecurityError::Compress)?;
            body_of_record = current.clone();
            on_body_of_record(&body_of_record);
            internal!("Compressed body before signing ({compression})");
        }

        if let (Some(digest), Some(alias)) = (sign, signer) {
            let include_certificate = partnership
                .tri_state(attrs::INCLUDE_CERT_IN_SIGNED_CONTENT)
                .unwrap_or(self.defaults.include_certificate_in_signed_content);
            current = self.sign(
                &current,
                alias,
                digest,
                include_certificate,
                partnership.flag(attrs::RENAME_DIGEST_TO_OLD_NAME),
            )?;
            internal!("Signed body with {digest} as '{alias}'");
        }

        if let Some(compression) = compression
            && !before_signing
        {
            current = self
                .provider
                .compress(&current, compression)
                .map_err(SecurityError::Compress)?;
            internal!("Compressed body after signing ({compression})");
        }

        if let (Some(algorithm), Some(certificate)) = (encrypt, recipient) {
            current = self
                .provider
                .encrypt(&current, &certificate, algorithm)
                .map_err(SecurityError::Encrypt)?;
            internal!(
                "Encrypted body with {algorithm} for '{}'",
                certificate.alias()
            );
        }

        Ok(SecuredBody {
            body: current,
            body_of_record,
            signed: sign.is_some(),
            encrypted: encrypt.is_some(),
            compressed: compression.is_some(),
        })
    }

    /// Run the inbound pipeline over `message.body`.
    ///
    /// On success the message body is replaced with the unwrapped document
    /// and `was_encrypted` / `was_signed` / `was_compressed` are recorded.
    ///
    /// # Errors
    /// Failures carry the disposition reason of the stage that failed.
    #[tracing::instrument(skip_all, fields(message_id = %message.message_id))]
    pub fn unsecure(&self, message: &mut Message) -> Result<UnsecuredBody, SecurityError> {
        let partnership = &message.partnership;
        let mut current = message.body.clone().ok_or(SecurityError::MissingBody)?;
        let mut decrypted = false;
        let mut verified = false;
        let mut decompressed = false;
        let mut verified_content = None;
        let mut dumped_to = None;

        // Decrypt
        let claims_encryption = current.is_encrypted();
        if partnership.flag(attrs::DISABLE_DECRYPT) {
            if claims_encryption {
                incoming!(
                    level = INFO,
                    "Decryption disabled for {}, leaving encrypted content as is",
                    partnership.label()
                );
            }
        } else if claims_encryption || partnership.flag(attrs::FORCE_DECRYPT) {
            current = self.decrypt(partnership, &current)?;
            decrypted = true;
            incoming!("Decrypted message {}", message.message_id);

            if let Some(dump) = &self.dump {
                match dump.write(&message.message_id, &current) {
                    Ok(path) => dumped_to = Some(path),
                    Err(err) => internal!(level = ERROR, "{err}"),
                }
            }
        }

        // Decompress #1, for compress-then-encrypt ordering
        if current.is_compressed() && !self.decompression_disabled(partnership) {
            current = self.decompress(&current)?;
            decompressed = true;
            incoming!("Decompressed message {} before verification", message.message_id);
        }

        // Verify
        if partnership.flag(attrs::DISABLE_VERIFY) {
            if current.is_signed() {
                incoming!(
                    level = INFO,
                    "Verification disabled for {}, skipping signature",
                    partnership.label()
                );
            }
        } else if current.is_signed() || partnership.flag(attrs::FORCE_VERIFY) {
            let use_body_certificate = partnership
                .tri_state(attrs::VERIFY_USE_CERT_IN_BODY)
                .unwrap_or(self.defaults.verify_use_certificate_in_body);

            current = self
                .verify(
                    &current,
                    partnership.sender_id(ids::X509_ALIAS),
                    use_body_certificate,
                )
                .map_err(|err| match err {
                    SecurityError::Verify(_) => err,
                    other => in_stage(InboundStage::Verify)(other),
                })?;
            verified = true;
            verified_content = Some(current.clone());
            incoming!("Verified signature on message {}", message.message_id);
        }

        // Decompress #2, for compress-then-sign ordering
        if current.is_compressed() && !self.decompression_disabled(partnership) {
            if decompressed {
                return Err(SecurityError::DoubleCompression);
            }
            current = self.decompress(&current)?;
            decompressed = true;
            incoming!("Decompressed message {} after verification", message.message_id);
        }

        message.attributes.set_flag(WAS_ENCRYPTED, decrypted);
        message.attributes.set_flag(WAS_SIGNED, verified);
        message.attributes.set_flag(WAS_COMPRESSED, decompressed);
        if let Some(path) = dumped_to {
            message
                .attributes
                .set(DUMPED_TO, path.display().to_string());
        }
        message.body = Some(current.clone());

        Ok(UnsecuredBody {
            mic_source: verified_content.unwrap_or_else(|| current.clone()),
            body: current,
            decrypted,
            verified,
            decompressed,
        })
    }

    fn decompression_disabled(&self, partnership: &Partnership) -> bool {
        let disabled = partnership.flag(attrs::DISABLE_DECOMPRESS);
        if disabled {
            internal!(
                level = DEBUG,
                "Decompression disabled for {}",
                partnership.label()
            );
        }
        disabled
    }

    fn decrypt(
        &self,
        partnership: &Partnership,
        body: &MimeBody,
    ) -> Result<MimeBody, SecurityError> {
        let stage = || in_stage(InboundStage::Decrypt);

        let alias = alias(&partnership.receiver, "receiver").map_err(stage())?;
        let certificate = self.certificates.require_certificate(alias).map_err(stage())?;
        let key = self.certificates.require_private_key(alias).map_err(stage())?;

        self.provider
            .decrypt(body, &certificate, &key)
            .map_err(SecurityError::Decrypt)
    }

    fn decompress(&self, body: &MimeBody) -> Result<MimeBody, SecurityError> {
        self.provider
            .decompress(body)
            .map_err(SecurityError::Decompress)
    }
}
