//! MIC engine and S/MIME security pipeline for kestrel.
//!
//! The pipeline itself lives in [`pipeline::SecurityService`]; the CMS codec
//! is supplied through [`smime::SmimeProvider`].

pub mod algorithm;
pub mod certificate;
pub mod error;
pub mod mic;
pub mod mock;
pub mod pipeline;
pub mod smime;

pub use algorithm::{CompressionType, DigestAlgorithm, EncryptionAlgorithm};
pub use certificate::{Certificate, CertificateStore, MemoryCertificateStore, PrivateKey};
pub use error::{InboundStage, MicError, SecurityError, SmimeError};
pub use mic::{Mic, mic_matches};
pub use mock::MockSmimeProvider;
pub use pipeline::{DumpSink, SecuredBody, SecurityDefaults, SecurityService, UnsecuredBody};
pub use smime::{SignOptions, SmimeProvider};
