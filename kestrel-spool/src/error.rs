//! Error types for the kestrel-spool crate.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No pending record for the message.
    #[error("No pending record for {0}")]
    NotFound(String),

    /// A pending record for the message is already outstanding.
    #[error("Pending record already exists for {0}")]
    AlreadyExists(String),

    /// Record file is not the expected two-line form.
    #[error("Corrupted pending record {path}: {reason}")]
    Corrupted { path: String, reason: &'static str },

    #[error("Pending store validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Pending directory validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Pending path cannot contain '..' components: {0}")]
    ParentDirectory(String),

    #[error("Pending path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Pending path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Pending path is not a directory: {0}")]
    NotDirectory(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;
