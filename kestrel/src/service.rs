//! Wiring of the processing services from a [`KestrelConfig`].

use std::{sync::Arc, time::SystemTime};

use anyhow::Context;
use kestrel_common::{audit::AuditLog, internal};
use kestrel_delivery::{
    Action, ActionHandlers, ActionOutcome, Receiver, ResendQueue, RetryCoordinator, Sender,
    StorageHook, Transport, ValidationHook,
};
use kestrel_mdn::MdnEngine;
use kestrel_partnership::PartnershipStore;
use kestrel_security::{CertificateStore, SecurityService, SmimeProvider};
use kestrel_spool::{LoggingCallbacks, PendingStore, ReconcileCallbacks, Reconciler};

use crate::config::KestrelConfig;

/// A fully wired AS2 processor.
///
/// Listeners hand inbound requests to [`Self::receiver`]; outbound documents
/// go through [`Self::sender`]. Failed posts land in [`Self::queue`], which
/// [`Self::process_due_resends`] drains.
#[derive(Debug)]
pub struct Kestrel {
    partnerships: Arc<PartnershipStore>,
    pending: Arc<dyn PendingStore>,
    queue: Arc<ResendQueue>,
    sender: Arc<Sender>,
    handlers: Arc<ActionHandlers>,
    receiver: Receiver,
}

impl Kestrel {
    #[must_use]
    pub fn builder(config: KestrelConfig) -> KestrelBuilder {
        KestrelBuilder::new(config)
    }

    #[must_use]
    pub fn partnerships(&self) -> &PartnershipStore {
        &self.partnerships
    }

    #[must_use]
    pub fn pending(&self) -> &Arc<dyn PendingStore> {
        &self.pending
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<ResendQueue> {
        &self.queue
    }

    #[must_use]
    pub const fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    #[must_use]
    pub const fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Run every resend that is due at `now`.
    ///
    /// Failures are logged; a retryable one is queued again by the sender
    /// while tries remain. Returns how many resends were attempted.
    pub async fn process_due_resends(&self, now: SystemTime) -> usize {
        let due = self.queue.due(now);
        let attempted = due.len();

        for request in due {
            let message_id = request.message_id.clone();
            match self.handlers.dispatch(Action::Resend(request)).await {
                Ok(ActionOutcome::ResendScheduled) => {
                    internal!(level = DEBUG, "Resend of {message_id} queued again");
                }
                Ok(_) => {
                    self.queue.forget(&message_id);
                    internal!("Resend of {message_id} completed");
                }
                Err(err) => {
                    self.queue.forget(&message_id);
                    internal!(level = ERROR, "Resend of {message_id} failed: {err}");
                }
            }
        }

        attempted
    }
}

/// Assembles a [`Kestrel`].
///
/// The S/MIME provider and the HTTP transport are mandatory; everything else
/// has a default.
#[derive(Debug)]
pub struct KestrelBuilder {
    config: KestrelConfig,
    provider: Option<Arc<dyn SmimeProvider>>,
    transport: Option<Arc<dyn Transport>>,
    certificates: Option<Arc<dyn CertificateStore>>,
    pending: Option<Arc<dyn PendingStore>>,
    storage: Option<Arc<dyn StorageHook>>,
    validation: Option<Arc<dyn ValidationHook>>,
    callbacks: Option<Arc<dyn ReconcileCallbacks>>,
}

impl KestrelBuilder {
    #[must_use]
    pub const fn new(config: KestrelConfig) -> Self {
        Self {
            config,
            provider: None,
            transport: None,
            certificates: None,
            pending: None,
            storage: None,
            validation: None,
            callbacks: None,
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn SmimeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `certificates` instead of loading the configured PEM files.
    #[must_use]
    pub fn certificates(mut self, certificates: Arc<dyn CertificateStore>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// Use `pending` instead of the configured store.
    #[must_use]
    pub fn pending(mut self, pending: Arc<dyn PendingStore>) -> Self {
        self.pending = Some(pending);
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageHook>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn validation(mut self, validation: Arc<dyn ValidationHook>) -> Self {
        self.validation = Some(validation);
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: Arc<dyn ReconcileCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// # Errors
    /// If the configuration is invalid, a collaborator is missing, or a
    /// configured store cannot be initialised.
    pub fn build(self) -> anyhow::Result<Kestrel> {
        let config = self.config;
        config.validate()?;

        let provider = self.provider.context("No S/MIME provider configured")?;
        let transport = self.transport.context("No HTTP transport configured")?;

        let certificates = match self.certificates {
            Some(certificates) => certificates,
            None => Arc::new(config.certificate_store()?),
        };
        let pending = match self.pending {
            Some(pending) => pending,
            None => config
                .pending
                .clone()
                .into_store()
                .context("Failed to initialise pending store")?,
        };

        let audit = AuditLog::new(config.audit.clone());
        let security = Arc::new(SecurityService::new(
            provider,
            certificates,
            config.security.clone(),
        ));
        let partnerships = Arc::new(config.partnership_store()?);
        let mdn = Arc::new(MdnEngine::new(
            Arc::clone(&security),
            Arc::clone(&partnerships),
            config.mdn.clone(),
        ));

        let queue = Arc::new(ResendQueue::new(config.resend.clone()));
        let retry = RetryCoordinator::new(queue.clone(), audit.clone(), config.resend.clone());
        let sender = Arc::new(
            Sender::new(
                Arc::clone(&security),
                Arc::clone(&partnerships),
                Arc::clone(&mdn),
                Arc::clone(&pending),
                transport,
                retry,
                config.sender.clone(),
            )
            .with_audit(audit.clone()),
        );

        let handlers = Arc::new(ActionHandlers::new(Arc::clone(&sender), self.storage));
        let callbacks = self
            .callbacks
            .unwrap_or_else(|| Arc::new(LoggingCallbacks::new(audit.clone())));
        let reconciler = Reconciler::new(Arc::clone(&pending), callbacks);

        let mut receiver = Receiver::new(
            security,
            Arc::clone(&partnerships),
            mdn,
            Arc::clone(&handlers),
            reconciler,
        )
        .with_audit(audit);
        if let Some(validation) = self.validation {
            receiver = receiver.with_validation(validation);
        }

        internal!(
            "Processor ready with {} partnerships",
            partnerships.len()
        );

        Ok(Kestrel {
            partnerships,
            pending,
            queue,
            sender,
            handlers,
            receiver,
        })
    }
}
