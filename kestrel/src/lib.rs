//! Configuration and service wiring for the kestrel AS2 engine.

pub mod config;
pub mod service;

pub use config::{CertificateEntry, KestrelConfig, find_config_file};
pub use service::{Kestrel, KestrelBuilder};
