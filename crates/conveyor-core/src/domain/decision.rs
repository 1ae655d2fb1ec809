//! Decision model: where a failed envelope goes next.
//!
//! This module defines the Decision type (retry or dead-letter) and the Decider
//! trait. Deciders are pure: they build the next envelope, the consumer
//! publishes it.

use super::envelope::TaskEnvelope;

/// Bounded escalation policy for processing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Highest `retry_count` that may still go to the retry channel.
    pub max_retry: u32,
}

impl RetryPolicy {
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }

    /// Is this retry count past the budget?
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retry
    }

    /// Increment, then compare against `max_retry`.
    pub fn decide(&self, envelope: &TaskEnvelope, error: &str) -> Decision {
        let next = envelope.next_attempt();
        if self.is_exhausted(next.retry_count()) {
            Decision::DeadLetter {
                reason: format!(
                    "max retries exhausted ({}/{}): {error}",
                    next.retry_count(),
                    self.max_retry
                ),
                envelope: next,
            }
        } else {
            Decision::Retry {
                reason: format!("retry {}/{}: {error}", next.retry_count(), self.max_retry),
                envelope: next,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// The next hop of an envelope after a retryable failure.
///
/// Both variants carry the envelope with its `retry_count` already incremented.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry {
        envelope: TaskEnvelope,
        reason: String,
    },
    DeadLetter {
        envelope: TaskEnvelope,
        reason: String,
    },
}

impl Decision {
    pub fn envelope(&self) -> &TaskEnvelope {
        match self {
            Decision::Retry { envelope, .. } | Decision::DeadLetter { envelope, .. } => envelope,
        }
    }
}

/// Decides the next hop for a failed envelope.
pub trait Decider: Send + Sync {
    /// # Arguments
    /// * `envelope` - the envelope as it was delivered (retry count not yet bumped)
    /// * `error` - failure reported by the processor
    fn decide(&self, envelope: &TaskEnvelope, error: &str) -> Decision;
}

/// Decider backed by a `RetryPolicy`.
///
/// With `max_retry = 3` an item that always fails is retried with counts
/// 1, 2, 3 and dead-lettered with count 4.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, envelope: &TaskEnvelope, error: &str) -> Decision {
        self.policy.decide(envelope, error)
    }
}
