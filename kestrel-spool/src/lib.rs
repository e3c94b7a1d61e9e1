//! Pending-receipt store and asynchronous MDN reconciliation for kestrel.
//!
//! When an asynchronous receipt is requested, the sender persists the MIC it
//! computed and a copy of the body it sent through a [`PendingStore`]. The
//! [`Reconciler`] later matches incoming receipts against those records.

pub mod backends;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod store;

pub use backends::{FilePendingStore, MemoryPendingStore};
pub use config::PendingConfig;
pub use error::{Result, SpoolError, ValidationError};
pub use reconcile::{LoggingCallbacks, ReconcileCallbacks, Reconciler, Reconciliation};
pub use record::PendingRecord;
pub use store::PendingStore;
