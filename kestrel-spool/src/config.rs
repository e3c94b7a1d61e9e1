use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    Result,
    backends::{FilePendingStore, MemoryPendingStore},
    store::PendingStore,
};

/// Selection of the pending-receipt store.
///
/// File-backed store in RON config:
/// ```ron
/// pending: File(
///     path: "/var/spool/kestrel/pending",
/// ),
/// ```
///
/// Memory-backed store for testing:
/// ```ron
/// pending: Memory,
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum PendingConfig {
    File { path: PathBuf },
    Memory,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self::File {
            path: FilePendingStore::default().path().to_path_buf(),
        }
    }
}

impl PendingConfig {
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Build and initialise the configured store.
    ///
    /// # Errors
    /// If the path is invalid or the directory cannot be prepared.
    pub fn into_store(self) -> Result<Arc<dyn PendingStore>> {
        match self {
            Self::File { path } => {
                let store = FilePendingStore::new(path)?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory => Ok(Arc::new(MemoryPendingStore::new())),
        }
    }
}
