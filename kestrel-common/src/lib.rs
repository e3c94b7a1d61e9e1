//! Shared types for the kestrel AS2 engine.
//!
//! Everything that more than one pipeline stage needs to agree on lives here:
//! the in-flight [`message::Message`] and its receipt [`message::MessageMdn`],
//! the [`mime::MimeBody`] entity model, the [`partnership::Partnership`]
//! policy record, and the [`disposition::Disposition`] verdict grammar.

pub mod attributes;
pub mod audit;
pub mod disposition;
pub mod error;
pub mod headers;
pub mod log;
pub mod logging;
pub mod message;
pub mod mime;
pub mod partnership;

pub use attributes::Attributes;
pub use disposition::{Disposition, DispositionModifier, DispositionReason};
pub use error::{DispositionError, MimeError};
pub use headers::Headers;
pub use message::{Message, MessageMdn};
pub use mime::MimeBody;
pub use partnership::Partnership;
pub use tracing;

/// Name reported in `Server`/`User-Agent` style headers and the MDN
/// `Reporting-UA` field unless configuration overrides it.
pub const PRODUCT_NAME: &str = concat!("kestrel/", env!("CARGO_PKG_VERSION"));
