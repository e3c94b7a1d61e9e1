use std::fmt::Debug;

use async_trait::async_trait;

use crate::{Result, record::PendingRecord};

/// Durable storage for receipts we are still waiting on.
///
/// Records are keyed by the outbound message id; implementations derive
/// their own storage key from it. A record is only considered pending once
/// [`PendingStore::save`] has returned.
#[async_trait]
pub trait PendingStore: Send + Sync + Debug {
    /// Persist `mic` and a retained copy of `body` for `message_id`.
    ///
    /// # Errors
    /// If the record or body cannot be stored.
    async fn save(&self, message_id: &str, mic: &str, body: &[u8]) -> Result<PendingRecord>;

    /// `Ok(None)` when nothing is pending for `message_id`.
    ///
    /// # Errors
    /// If the record exists but cannot be read.
    async fn load(&self, message_id: &str) -> Result<Option<PendingRecord>>;

    /// The retained body a record refers to.
    ///
    /// # Errors
    /// If the body is missing or unreadable.
    async fn read_body(&self, record: &PendingRecord) -> Result<Vec<u8>>;

    /// Remove the record and its retained body.
    ///
    /// # Errors
    /// If the record does not exist or cannot be removed.
    async fn delete(&self, message_id: &str) -> Result<()>;

    /// Storage keys of all outstanding records, sorted.
    ///
    /// # Errors
    /// If the store cannot be enumerated.
    async fn list(&self) -> Result<Vec<String>>;
}
