//! Certificate and private key lookup by alias.
//!
//! Partnerships name their certificates through the `x509_alias` identity
//! attribute. The store hands out DER material; what a provider does with it
//! is its own business.

use std::{fmt, io::BufReader, path::Path, sync::Arc};

use ahash::AHashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::SecurityError;

/// DER encoded X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    alias: String,
    der: Arc<[u8]>,
}

impl Certificate {
    #[must_use]
    pub fn new(alias: &str, der: impl Into<Arc<[u8]>>) -> Self {
        Self {
            alias: alias.to_string(),
            der: der.into(),
        }
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Hex SHA-256 over the DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }
}

/// DER encoded private key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    alias: String,
    der: Arc<[u8]>,
}

impl PrivateKey {
    #[must_use]
    pub fn new(alias: &str, der: impl Into<Arc<[u8]>>) -> Self {
        Self {
            alias: alias.to_string(),
            der: der.into(),
        }
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("alias", &self.alias)
            .field("der", &"[REDACTED]")
            .finish()
    }
}

pub trait CertificateStore: Send + Sync + fmt::Debug {
    fn certificate(&self, alias: &str) -> Option<Certificate>;

    fn private_key(&self, alias: &str) -> Option<PrivateKey>;

    /// # Errors
    /// [`SecurityError::MissingCertificate`] when absent.
    fn require_certificate(&self, alias: &str) -> Result<Certificate, SecurityError> {
        self.certificate(alias)
            .ok_or_else(|| SecurityError::MissingCertificate(alias.to_string()))
    }

    /// # Errors
    /// [`SecurityError::MissingPrivateKey`] when absent.
    fn require_private_key(&self, alias: &str) -> Result<PrivateKey, SecurityError> {
        self.private_key(alias)
            .ok_or_else(|| SecurityError::MissingPrivateKey(alias.to_string()))
    }
}

#[derive(Debug, Default, Clone)]
struct Entry {
    certificate: Option<Certificate>,
    private_key: Option<PrivateKey>,
}

/// In-memory certificate store.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    entries: RwLock<AHashMap<String, Entry>>,
}

impl MemoryCertificateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_certificate(&self, certificate: Certificate) {
        let alias = certificate.alias.clone();
        self.entries.write().entry(alias).or_default().certificate = Some(certificate);
    }

    pub fn insert_private_key(&self, key: PrivateKey) {
        let alias = key.alias.clone();
        self.entries.write().entry(alias).or_default().private_key = Some(key);
    }

    /// Load the first certificate and, if present, the private key from PEM
    /// text.
    ///
    /// # Errors
    /// If the PEM is unreadable or holds no certificate.
    pub fn load_pem(&self, alias: &str, pem: &[u8]) -> Result<(), SecurityError> {
        let load_error = |source| SecurityError::CertificateLoad {
            alias: alias.to_string(),
            source,
        };

        let certificate = rustls_pemfile::certs(&mut BufReader::new(pem))
            .next()
            .transpose()
            .map_err(load_error)?
            .ok_or_else(|| {
                load_error(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "no certificate in PEM",
                ))
            })?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(pem)).map_err(load_error)?;

        self.insert_certificate(Certificate::new(alias, certificate.as_ref().to_vec()));
        if let Some(key) = key {
            self.insert_private_key(PrivateKey::new(alias, key.secret_der().to_vec()));
        }

        Ok(())
    }

    /// [`Self::load_pem`] from a file.
    ///
    /// # Errors
    /// If the file cannot be read or holds no certificate.
    pub fn load_pem_file(&self, alias: &str, path: &Path) -> Result<(), SecurityError> {
        let pem = std::fs::read(path).map_err(|source| SecurityError::CertificateLoad {
            alias: alias.to_string(),
            source,
        })?;

        self.load_pem(alias, &pem)
    }

    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<_> = self.entries.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn certificate(&self, alias: &str) -> Option<Certificate> {
        self.entries
            .read()
            .get(alias)
            .and_then(|entry| entry.certificate.clone())
    }

    fn private_key(&self, alias: &str) -> Option<PrivateKey> {
        self.entries
            .read()
            .get(alias)
            .and_then(|entry| entry.private_key.clone())
    }
}
