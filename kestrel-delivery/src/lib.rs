//! AS2 send and receive processing for kestrel.
//!
//! [`Sender`] secures and posts outbound messages, [`Receiver`] unwraps
//! inbound ones and answers with a receipt. Failed posts go through the
//! [`RetryCoordinator`] into a [`ResendScheduler`], by default the in-memory
//! [`ResendQueue`].

pub mod action;
pub mod error;
pub mod hooks;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod transport;

pub use action::{Action, ActionHandlers, ActionKind, ActionOutcome};
pub use error::{As2Error, BoxedSource, ErrorKind};
pub use hooks::{HookError, StorageHook, ValidationHook};
pub use queue::ResendQueue;
pub use receiver::{InboundRequest, MdnDelivery, ReceiptOutcome, ReceiptStatus, Receiver};
pub use retry::{
    DEFAULT_RESEND_RETRIES, ResendConfig, ResendRequest, ResendScheduler, RetryCoordinator,
    resolve_retry_count,
};
pub use sender::{SendOutcome, Sender, SenderConfig};
pub use transport::{HttpRequest, HttpResponse, MockTransport, Transport};
