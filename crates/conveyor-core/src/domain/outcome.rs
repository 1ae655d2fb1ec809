//! Outcome model: what the processor reports, and what the consumer did.
//!
//! Processing results are explicit variants instead of exception types, so the
//! consumer's transition table is an exhaustive `match`.

use serde::{Deserialize, Serialize};

/// Result of one call to the processing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Work done; the item can be marked completed.
    Success,

    /// The item no longer exists upstream. The work is moot, not failed:
    /// acknowledge without retrying or dead-lettering.
    TerminalSkip(String),

    /// Recoverable failure; counts against `max_retry`.
    Retryable(String),

    /// Failure that retrying cannot fix; goes straight to dead-letter.
    Fatal(String),
}

impl ProcessOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn deleted(reason: impl Into<String>) -> Self {
        Self::TerminalSkip(reason.into())
    }
}

/// Why a delivery was left unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// No permit within the acquire timeout.
    Backpressure,

    /// Shutdown arrived while waiting for the retry delay or a permit.
    Abandoned,
}

/// Why an envelope ended up in the dead-letter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    /// Malformed envelope (missing type / taskId / required fields).
    Validation,

    /// `retry_count` went past `max_retry`.
    Exhausted,

    /// The processor reported a non-retryable failure.
    Fatal,

    /// Message bytes were not a task envelope at all.
    Undecodable,
}

/// Terminal state of one delivery attempt.
///
/// Every variant except `Deferred` acknowledges the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Idempotency store said the item is already completed.
    IdempotentSkip,

    /// Processed successfully. `batch_completed` is true for the one attempt
    /// that brought the task's counter to its expected total.
    Completed { batch_completed: bool },

    /// Item deleted upstream.
    TerminalSkip,

    /// Republished to the retry channel after a processing failure.
    RetryScheduled { retry_count: u32 },

    /// Republished to the retry channel because the item was in flight elsewhere.
    Rechecked { recheck_count: u32 },

    /// Published to the dead-letter channel.
    DeadLettered { kind: DeadLetterKind, retry_count: u32 },

    /// Not acknowledged; the broker will redeliver.
    Deferred(DeferReason),
}

impl AttemptOutcome {
    pub fn acknowledges(&self) -> bool {
        !matches!(self, AttemptOutcome::Deferred(_))
    }

    /// Short label for logs and counters.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::IdempotentSkip => "idempotent_skip",
            AttemptOutcome::Completed { .. } => "completed",
            AttemptOutcome::TerminalSkip => "terminal_skip",
            AttemptOutcome::RetryScheduled { .. } => "retry_scheduled",
            AttemptOutcome::Rechecked { .. } => "rechecked",
            AttemptOutcome::DeadLettered { .. } => "dead_lettered",
            AttemptOutcome::Deferred(_) => "deferred",
        }
    }
}
