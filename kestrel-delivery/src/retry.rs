//! Resend budget resolution and hand-off.
//!
//! The coordinator never sleeps or loops. It decides whether a failed action
//! may be tried again and passes it to a [`ResendScheduler`]; an external
//! scheduler re-invokes the action later.

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime},
};

use kestrel_common::{
    Partnership, attributes::RESEND_TRIES_LEFT, audit::AuditLog, internal,
    partnership::attrs,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Applied when no configuration source yields a retry count.
pub const DEFAULT_RESEND_RETRIES: u32 = 5;

/// Resend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResendConfig {
    /// Processor wide retry count. Combined with the partnership and per-call
    /// values; the smallest wins.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Maximum delay between attempts (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,

    /// Delays are randomized within ±`jitter_factor`.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl ResendConfig {
    /// When the `attempt`th resend (1-indexed) should run.
    #[must_use]
    pub fn next_attempt(&self, attempt: u32) -> SystemTime {
        calculate_next_retry_time(
            attempt,
            self.base_delay_secs,
            self.max_delay_secs,
            self.jitter_factor,
        )
    }
}

mod defaults {
    pub const fn base_delay_secs() -> u64 {
        60
    }

    pub const fn max_delay_secs() -> u64 {
        3600
    }

    pub const fn jitter_factor() -> f64 {
        0.1
    }
}

/// Calculate the next retry time using exponential backoff with jitter
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
#[must_use]
pub fn calculate_next_retry_time(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> SystemTime {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_secs
    } else {
        base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(max_delay_secs)
    };

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered_delay = if jitter_factor > 0.0 {
        let jitter_range = (delay as f64) * jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    } else {
        delay
    };

    SystemTime::now() + Duration::from_secs(jittered_delay)
}

fn parse_count(source: &str, value: &str) -> Option<u32> {
    match value.trim().parse::<u32>() {
        Ok(count) => Some(count),
        Err(err) => {
            internal!(
                level = WARN,
                "Ignoring {source} retry count '{value}': {err}"
            );
            None
        }
    }
}

/// Effective retry budget.
///
/// Each of the per-call value, the partnership's `resend_max_retries`
/// attribute and the processor default is read independently as a
/// non-negative integer. The smallest valid value wins; with none,
/// [`DEFAULT_RESEND_RETRIES`] applies.
#[must_use]
pub fn resolve_retry_count(
    explicit: Option<&str>,
    partnership: &Partnership,
    processor_default: Option<u32>,
) -> u32 {
    [
        explicit.and_then(|value| parse_count("per-call", value)),
        partnership
            .attribute(attrs::RESEND_MAX_RETRIES)
            .and_then(|value| parse_count("partnership", value)),
        processor_default,
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(DEFAULT_RESEND_RETRIES)
}

/// Options bag handed to the scheduler with a failed action.
#[derive(Debug)]
pub struct ResendRequest {
    pub action: Box<Action>,
    pub message_id: String,
    pub cause: String,
    /// Attempts remaining after this resend.
    pub tries_left: u32,
}

impl ResendRequest {
    /// Name of the action being resent.
    #[must_use]
    pub fn action_name(&self) -> &'static str {
        self.action.name()
    }
}

/// Accepts failed actions for later re-invocation.
pub trait ResendScheduler: Send + Sync + Debug {
    fn submit(&self, request: ResendRequest);
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    scheduler: Arc<dyn ResendScheduler>,
    audit: AuditLog,
    config: ResendConfig,
}

impl RetryCoordinator {
    #[must_use]
    pub fn new(scheduler: Arc<dyn ResendScheduler>, audit: AuditLog, config: ResendConfig) -> Self {
        Self {
            scheduler,
            audit,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ResendConfig {
        &self.config
    }

    /// [`resolve_retry_count`] with this processor's default.
    #[must_use]
    pub fn resolve_retry_count(&self, explicit: Option<&str>, partnership: &Partnership) -> u32 {
        resolve_retry_count(explicit, partnership, self.config.max_retries)
    }

    /// Attempts remaining for a message. The count a resent message carries
    /// is the per-call source, so it never exceeds the configured budget.
    #[must_use]
    pub fn tries_left(&self, carried: Option<&str>, partnership: &Partnership) -> u32 {
        self.resolve_retry_count(carried, partnership)
    }

    /// Hand `action` to the scheduler with one attempt fewer.
    ///
    /// Returns `false` without scheduling anything when no attempts remain.
    pub fn schedule_resend(
        &self,
        action: Action,
        message_id: &str,
        cause: &str,
        tries_left: u32,
    ) -> bool {
        if tries_left == 0 {
            internal!(
                level = WARN,
                "Not resending {message_id}, retries exhausted: {cause}"
            );
            return false;
        }

        let remaining = tries_left - 1;
        internal!(
            level = INFO,
            "Scheduling {} resend of {message_id} ({remaining} retries left): {cause}",
            action.name()
        );
        self.audit.resend_scheduled(message_id, cause, remaining);

        self.scheduler.submit(ResendRequest {
            action: Box::new(action),
            message_id: message_id.to_string(),
            cause: cause.to_string(),
            tries_left: remaining,
        });

        true
    }
}

/// Marks a message with the attempts it has left.
pub(crate) fn record_tries_left(attributes: &mut kestrel_common::Attributes, tries_left: u32) {
    attributes.set(RESEND_TRIES_LEFT, tries_left.to_string());
}
