//! ProgressTracker port - idempotency records and per-task batch counters.
//!
//! Shared by every consumer instance (Redis in production); all mutations
//! must be atomic per key because instances race on the same item / task
//! during rebalances and retries.

use async_trait::async_trait;

use crate::domain::{IdempotencyState, TrackerError};

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Atomically check and claim an item.
    ///
    /// Returns `FirstTime` only to the caller that moved the record from
    /// absent to processing.
    async fn check_idempotent(&self, item_id: &str) -> Result<IdempotencyState, TrackerError>;

    /// processing -> completed. Completed records never revert.
    async fn mark_completed(&self, item_id: &str) -> Result<(), TrackerError>;

    /// processing -> absent, so a later delivery can claim the item again.
    /// No-op for completed records.
    async fn release_processing(&self, item_id: &str) -> Result<(), TrackerError>;

    /// Atomically increment the completed-item counter of a task.
    async fn increment_consumed_count(&self, task_id: &str) -> Result<u64, TrackerError>;

    /// Expected number of items for a task; 0 when unknown.
    async fn get_expected_total(&self, task_id: &str) -> Result<u64, TrackerError>;

    async fn set_expected_total(&self, task_id: &str, total: u64) -> Result<(), TrackerError>;

    /// Drop the counter and expected total of a finished task.
    /// Item records are kept so late duplicates are still recognised.
    async fn clear_progress(&self, task_id: &str) -> Result<(), TrackerError>;
}
