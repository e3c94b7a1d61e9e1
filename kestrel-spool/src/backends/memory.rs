use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use kestrel_common::message::safe_filename;
use parking_lot::RwLock;

use crate::{Result, SpoolError, record::PendingRecord, store::PendingStore};

/// In-memory pending store.
///
/// Not crash durable; intended for tests and for deployments that never
/// request asynchronous receipts. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryPendingStore {
    records: Arc<RwLock<AHashMap<String, (PendingRecord, Arc<[u8]>)>>>,
}

impl MemoryPendingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn save(&self, message_id: &str, mic: &str, body: &[u8]) -> Result<PendingRecord> {
        let key = safe_filename(message_id);
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(SpoolError::AlreadyExists(message_id.to_string()));
        }

        let record = PendingRecord::new(mic, key.as_str());
        records.insert(key, (record.clone(), Arc::from(body)));
        Ok(record)
    }

    async fn load(&self, message_id: &str) -> Result<Option<PendingRecord>> {
        Ok(self
            .records
            .read()
            .get(&safe_filename(message_id))
            .map(|(record, _)| record.clone()))
    }

    async fn read_body(&self, record: &PendingRecord) -> Result<Vec<u8>> {
        self.records
            .read()
            .get(&record.body)
            .map(|(_, body)| body.to_vec())
            .ok_or_else(|| SpoolError::NotFound(record.body.clone()))
    }

    async fn delete(&self, message_id: &str) -> Result<()> {
        self.records
            .write()
            .remove(&safe_filename(message_id))
            .map(|_| ())
            .ok_or_else(|| SpoolError::NotFound(message_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys: Vec<_> = self.records.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryPendingStore::new();
        let record = store.save("<1@x>", "abc=, sha-256", b"body").await.unwrap();

        assert_eq!(store.load("<1@x>").await.unwrap(), Some(record.clone()));
        assert_eq!(store.read_body(&record).await.unwrap(), b"body");
        assert_eq!(store.list().await.unwrap(), vec!["1@x".to_string()]);
        assert!(matches!(
            store.save("<1@x>", "other", b"").await,
            Err(SpoolError::AlreadyExists(_))
        ));

        store.delete("<1@x>").await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.load("<1@x>").await.unwrap(), None);
        assert!(matches!(
            store.delete("<1@x>").await,
            Err(SpoolError::NotFound(_))
        ));
    }
}
