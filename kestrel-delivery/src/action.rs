//! Deferred work produced while processing messages.
//!
//! Every action kind is a variant of [`Action`] and [`ActionHandlers`]
//! matches on all of them, so a new kind cannot go unhandled.

use std::sync::Arc;

use kestrel_common::{Message, MessageMdn, internal};

use crate::{
    error::As2Error,
    hooks::StorageHook,
    retry::{ResendRequest, record_tries_left},
    sender::{SendOutcome, Sender},
};

#[derive(Debug)]
pub enum Action {
    /// Secure and post a message to its partner.
    Send(Box<Message>),
    /// Hand an unsecured inbound message to the storage hook.
    Store(Box<Message>),
    /// Post a receipt to the URL the requester named in
    /// `Receipt-Delivery-Option`.
    SendAsyncMdn { mdn: Box<MessageMdn>, url: String },
    /// Re-run a previously failed action.
    Resend(ResendRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Send,
    Store,
    SendAsyncMdn,
    Resend,
}

impl Action {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Send(_) => ActionKind::Send,
            Self::Store(_) => ActionKind::Store,
            Self::SendAsyncMdn { .. } => ActionKind::SendAsyncMdn,
            Self::Resend(_) => ActionKind::Resend,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self.kind() {
            ActionKind::Send => "send",
            ActionKind::Store => "store",
            ActionKind::SendAsyncMdn => "send-async-mdn",
            ActionKind::Resend => "resend",
        }
    }
}

#[derive(Debug)]
pub enum ActionOutcome {
    Sent(Box<SendOutcome>),
    Stored,
    /// Storage hook not installed.
    Skipped,
    MdnDelivered,
    ResendScheduled,
}

#[derive(Debug, Clone)]
pub struct ActionHandlers {
    storage: Option<Arc<dyn StorageHook>>,
    sender: Arc<Sender>,
}

impl ActionHandlers {
    #[must_use]
    pub fn new(sender: Arc<Sender>, storage: Option<Arc<dyn StorageHook>>) -> Self {
        Self { storage, sender }
    }

    #[must_use]
    pub const fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    /// # Errors
    /// Whatever the handler for the action reports.
    pub async fn dispatch(&self, action: Action) -> Result<ActionOutcome, As2Error> {
        match action {
            Action::Send(message) => self.send(*message).await,
            Action::Store(message) => self.store(&message).await,
            Action::SendAsyncMdn { mdn, url } => self.send_mdn(*mdn, &url, None).await,
            Action::Resend(request) => self.redeliver(request).await,
        }
    }

    async fn send(&self, message: Message) -> Result<ActionOutcome, As2Error> {
        let outcome = self.sender.send(message).await?;
        Ok(if matches!(outcome, SendOutcome::ResendScheduled) {
            ActionOutcome::ResendScheduled
        } else {
            ActionOutcome::Sent(Box::new(outcome))
        })
    }

    async fn store(&self, message: &Message) -> Result<ActionOutcome, As2Error> {
        let Some(storage) = &self.storage else {
            internal!(
                level = DEBUG,
                "No storage hook installed, not storing {}",
                message.log_id()
            );
            return Ok(ActionOutcome::Skipped);
        };

        storage
            .store(message)
            .await
            .map_err(As2Error::StorageFailed)?;
        internal!("Stored {}", message.log_id());
        Ok(ActionOutcome::Stored)
    }

    async fn send_mdn(
        &self,
        mdn: MessageMdn,
        url: &str,
        tries_left: Option<u32>,
    ) -> Result<ActionOutcome, As2Error> {
        Ok(if self.sender.send_mdn(mdn, url, tries_left).await? {
            ActionOutcome::MdnDelivered
        } else {
            ActionOutcome::ResendScheduled
        })
    }

    /// Run the action inside a resend request with its remaining budget.
    async fn redeliver(&self, request: ResendRequest) -> Result<ActionOutcome, As2Error> {
        internal!(
            level = INFO,
            "Resending {} of {} ({} retries left), previous failure: {}",
            request.action_name(),
            request.message_id,
            request.tries_left,
            request.cause
        );

        match *request.action {
            Action::Send(mut message) => {
                record_tries_left(&mut message.attributes, request.tries_left);
                self.send(*message).await
            }
            Action::Store(message) => self.store(&message).await,
            Action::SendAsyncMdn { mdn, url } => {
                self.send_mdn(*mdn, &url, Some(request.tries_left)).await
            }
            Action::Resend(nested) => Err(As2Error::Unexpected(format!(
                "resend of {} wraps another resend",
                nested.message_id
            ))),
        }
    }
}
