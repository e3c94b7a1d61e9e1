//! The S/MIME codec seam.
//!
//! The pipeline decides *what* to do and in which order; an [`SmimeProvider`]
//! does the CMS work. All operations take and return MIME entities in wire
//! form and block the calling worker for their duration.

use std::fmt;

use crate::{
    algorithm::{CompressionType, DigestAlgorithm, EncryptionAlgorithm},
    certificate::{Certificate, PrivateKey},
    error::SmimeError,
};
use kestrel_common::MimeBody;

/// Options for producing a `multipart/signed` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignOptions {
    pub digest: DigestAlgorithm,
    /// Embed the signer certificate in the signature.
    pub include_certificate: bool,
    /// Write the RFC 3851 `micalg` label.
    pub legacy_names: bool,
}

pub trait SmimeProvider: Send + Sync + fmt::Debug {
    /// Wrap `body` in a `multipart/signed` entity.
    ///
    /// # Errors
    /// If the signature cannot be produced.
    fn sign(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        key: &PrivateKey,
        options: SignOptions,
    ) -> Result<MimeBody, SmimeError>;

    /// Signer certificate embedded in a `multipart/signed` entity, if any.
    ///
    /// # Errors
    /// If the entity is not a well-formed signed structure.
    fn embedded_certificate(&self, body: &MimeBody) -> Result<Option<Certificate>, SmimeError>;

    /// Check the signature and return the signed content.
    ///
    /// # Errors
    /// If the structure is malformed or the signature does not verify.
    fn verify(&self, body: &MimeBody, certificate: &Certificate) -> Result<MimeBody, SmimeError>;

    /// Envelope `body` for the holder of `certificate`.
    ///
    /// # Errors
    /// If encryption fails.
    fn encrypt(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        algorithm: EncryptionAlgorithm,
    ) -> Result<MimeBody, SmimeError>;

    /// Open an enveloped entity.
    ///
    /// # Errors
    /// If the entity is malformed or not addressed to `certificate`.
    fn decrypt(
        &self,
        body: &MimeBody,
        certificate: &Certificate,
        key: &PrivateKey,
    ) -> Result<MimeBody, SmimeError>;

    /// # Errors
    /// If compression fails.
    fn compress(
        &self,
        body: &MimeBody,
        compression: CompressionType,
    ) -> Result<MimeBody, SmimeError>;

    /// # Errors
    /// If the entity is not valid compressed data.
    fn decompress(&self, body: &MimeBody) -> Result<MimeBody, SmimeError>;
}
