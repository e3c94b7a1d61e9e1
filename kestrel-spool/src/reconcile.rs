//! Matching asynchronous receipts against what was sent.
//!
//! A pending record is only ever removed on a MIC match. On a mismatch the
//! record and its retained body stay where they are for an operator to
//! inspect or resend.

use std::{fmt::Debug, sync::Arc};

use kestrel_common::{MessageMdn, audit::AuditLog, incoming, internal};
use kestrel_security::mic_matches;

use crate::{Result, record::PendingRecord, store::PendingStore};

/// Outcome of reconciling one receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// MICs agree; the pending record has been removed.
    Matched(PendingRecord),
    /// MICs differ; the pending record was kept.
    Mismatched {
        record: PendingRecord,
        received: Option<String>,
    },
    /// The receipt does not refer to anything pending.
    Unmatched,
}

impl Reconciliation {
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Operator visible side effects of reconciliation.
pub trait ReconcileCallbacks: Send + Sync + Debug {
    fn matched(&self, mdn: &MessageMdn, record: &PendingRecord);

    fn mismatched(&self, mdn: &MessageMdn, record: &PendingRecord);
}

/// Default callbacks: log lines plus audit events.
#[derive(Debug, Clone)]
pub struct LoggingCallbacks {
    audit: AuditLog,
}

impl LoggingCallbacks {
    #[must_use]
    pub const fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

impl ReconcileCallbacks for LoggingCallbacks {
    fn matched(&self, mdn: &MessageMdn, _record: &PendingRecord) {
        let original = mdn.original_message_id.as_deref().unwrap_or_default();
        let disposition = mdn
            .disposition
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        incoming!(
            level = INFO,
            "Async MDN for {original} matched the sent MIC: {disposition}"
        );
        self.audit.mdn_received(original, &disposition, true);
    }

    fn mismatched(&self, mdn: &MessageMdn, record: &PendingRecord) {
        let original = mdn.original_message_id.as_deref().unwrap_or_default();
        let received = mdn.received_mic.as_deref().unwrap_or("<none>");

        incoming!(
            level = ERROR,
            "Async MDN for {original} reports MIC '{received}', expected '{}'; keeping {}",
            record.mic,
            record.body
        );
        self.audit.mdn_mic_mismatch(original, &record.mic, received);
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<dyn PendingStore>,
    callbacks: Arc<dyn ReconcileCallbacks>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn PendingStore>, callbacks: Arc<dyn ReconcileCallbacks>) -> Self {
        Self { store, callbacks }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PendingStore> {
        &self.store
    }

    /// Match `mdn` against its pending record.
    ///
    /// A receipt without `Original-Message-ID`, or one for which nothing is
    /// pending, is logged and reported as [`Reconciliation::Unmatched`].
    ///
    /// # Errors
    /// If the store fails for any reason other than the record being absent.
    #[tracing::instrument(skip_all, fields(message_id = %mdn.message_id))]
    pub async fn reconcile(&self, mdn: &MessageMdn) -> Result<Reconciliation> {
        let Some(original) = mdn.original_message_id.as_deref() else {
            incoming!(
                level = WARN,
                "Async MDN {} carries no Original-Message-ID",
                mdn.message_id
            );
            return Ok(Reconciliation::Unmatched);
        };

        let Some(record) = self.store.load(original).await? else {
            incoming!(
                level = WARN,
                "Async MDN {} refers to {original}, which has no pending record",
                mdn.message_id
            );
            return Ok(Reconciliation::Unmatched);
        };

        let matched = mdn
            .received_mic
            .as_deref()
            .is_some_and(|received| mic_matches(&record.mic, received));

        if matched {
            self.callbacks.matched(mdn, &record);
            self.store.delete(original).await?;
            internal!(level = DEBUG, "Removed pending record for {original}");
            Ok(Reconciliation::Matched(record))
        } else {
            self.callbacks.mismatched(mdn, &record);
            Ok(Reconciliation::Mismatched {
                record,
                received: mdn.received_mic.clone(),
            })
        }
    }
}
