//! Optional collaborators invoked on receive.
//!
//! Neither hook has to be installed. A missing hook is a logged no-op.

use std::fmt::Debug;

use async_trait::async_trait;
use kestrel_common::Message;
use thiserror::Error;

use crate::error::BoxedSource;

#[derive(Debug, Error)]
pub enum HookError {
    /// Reported to the partner as a warning disposition.
    #[error("{0}")]
    Warning(String),

    #[error(transparent)]
    Failed(BoxedSource),
}

/// Inspects an unsecured inbound message before it is stored.
pub trait ValidationHook: Send + Sync + Debug {
    /// # Errors
    /// [`HookError::Warning`] to accept with a warning,
    /// [`HookError::Failed`] to reject.
    fn validate(&self, message: &Message) -> Result<(), HookError>;
}

/// Persists an unsecured inbound message.
#[async_trait]
pub trait StorageHook: Send + Sync + Debug {
    /// # Errors
    /// Any failure to persist the message.
    async fn store(&self, message: &Message) -> Result<(), BoxedSource>;
}
