//! Message Disposition Notification engine for kestrel.
//!
//! [`MdnEngine::build`] turns a processed message and its verdict into a
//! receipt; [`MdnEngine::parse`] reverses it on the sending side.

pub mod engine;
pub mod error;
pub mod options;

pub use engine::{MdnConfig, MdnEngine, default_text};
pub use error::MdnError;
pub use options::{DispositionOptions, Importance};
