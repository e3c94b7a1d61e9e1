//! In-memory resend queue polled by an external scheduler.

use std::time::SystemTime;

use ahash::AHashMap;
use kestrel_common::internal;
use parking_lot::Mutex;

use crate::retry::{ResendConfig, ResendRequest, ResendScheduler};

#[derive(Debug)]
struct Entry {
    request: ResendRequest,
    attempt: u32,
    next_attempt: SystemTime,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    /// Resends submitted so far per message id, driving the backoff.
    attempts: AHashMap<String, u32>,
}

/// Holds failed actions until their backoff elapses.
#[derive(Debug, Default)]
pub struct ResendQueue {
    config: ResendConfig,
    inner: Mutex<Inner>,
}

impl ResendQueue {
    #[must_use]
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            inner: Mutex::default(),
        }
    }

    /// Remove and return every request whose next attempt is at or before
    /// `now`, earliest first.
    pub fn due(&self, now: SystemTime) -> Vec<ResendRequest> {
        let mut inner = self.inner.lock();

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.entries)
            .into_iter()
            .partition(|entry| entry.next_attempt <= now);
        inner.entries = pending;
        drop(inner);

        due.sort_by_key(|entry| entry.next_attempt);
        due.into_iter().map(|entry| entry.request).collect()
    }

    /// When the earliest queued request becomes due.
    #[must_use]
    pub fn next_due(&self) -> Option<SystemTime> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|entry| entry.next_attempt)
            .min()
    }

    /// Number of resends already submitted for `message_id`.
    #[must_use]
    pub fn attempts(&self, message_id: &str) -> u32 {
        self.inner
            .lock()
            .attempts
            .get(message_id)
            .copied()
            .unwrap_or_default()
    }

    /// Drop the attempt history of a message that has been delivered.
    pub fn forget(&self, message_id: &str) {
        self.inner.lock().attempts.remove(message_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl ResendScheduler for ResendQueue {
    fn submit(&self, request: ResendRequest) {
        let mut inner = self.inner.lock();

        let attempt = inner
            .attempts
            .entry(request.message_id.clone())
            .and_modify(|attempt| *attempt += 1)
            .or_insert(1);
        let attempt = *attempt;
        let next_attempt = self.config.next_attempt(attempt);

        internal!(
            level = DEBUG,
            "Queued resend #{attempt} of {} ({})",
            request.message_id,
            request.action_name()
        );

        inner.entries.push(Entry {
            request,
            attempt,
            next_attempt,
        });
    }
}
