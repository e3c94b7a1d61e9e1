//! Partnership policy resolution for kestrel.
//!
//! See [`PartnershipStore`] for the lookup rules.

pub mod error;
pub mod store;
pub mod subject;

pub use error::PartnershipError;
pub use store::PartnershipStore;
pub use subject::render_subject;
