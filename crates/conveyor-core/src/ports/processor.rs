//! Processing collaborator and batch-completion side effect.

use async_trait::async_trait;

use crate::domain::{ProcessOutcome, TaskEnvelope};

/// Performs the actual unit of work (LLM call, embedding, indexing, ...).
///
/// Failures are reported as `ProcessOutcome` variants. A panic is caught by
/// the consumer and treated as `Retryable`.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, envelope: &TaskEnvelope) -> ProcessOutcome;
}

/// Fired once when the last item of a task completes.
#[async_trait]
pub trait BatchCompletionHook: Send + Sync {
    async fn on_batch_completed(&self, task_id: &str, total: u64);
}

/// Default hook: just log.
pub struct LoggingBatchHook;

#[async_trait]
impl BatchCompletionHook for LoggingBatchHook {
    async fn on_batch_completed(&self, task_id: &str, total: u64) {
        tracing::info!(task_id, total, "batch completed");
    }
}
