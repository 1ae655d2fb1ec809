//! InMemoryProgressTracker - reference implementation of the tracker port.
//!
//! One mutex over all maps: every operation is a single critical section, so
//! check-and-claim and increment are atomic per key. Nothing awaits while the
//! lock is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::app::TrackerSettings;
use crate::domain::{IdempotencyState, TrackerError};
use crate::ports::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRecord {
    Processing { since: Instant },
    Completed,
}

#[derive(Debug, Default)]
struct TrackerState {
    items: HashMap<String, ItemRecord>,
    consumed: HashMap<String, u64>,
    expected: HashMap<String, u64>,
}

/// In-process tracker for development, tests and single-instance deployments.
pub struct InMemoryProgressTracker {
    state: Mutex<TrackerState>,

    /// Processing claims older than this count as absent (crashed consumer).
    processing_ttl: Option<Duration>,
}

impl InMemoryProgressTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            processing_ttl: None,
        }
    }

    /// Tracker configured from the `[tracker]` section (claim TTL).
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        let tracker = Self::new();
        match settings.processing_ttl() {
            Some(ttl) => tracker.with_processing_ttl(ttl),
            None => tracker,
        }
    }

    pub fn with_processing_ttl(mut self, ttl: Duration) -> Self {
        self.processing_ttl = Some(ttl);
        self
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an item as already completed (tests / migrations).
    pub fn preload_completed(&self, item_id: &str) {
        self.lock()
            .items
            .insert(item_id.to_string(), ItemRecord::Completed);
    }

    pub fn is_completed(&self, item_id: &str) -> bool {
        matches!(self.lock().items.get(item_id), Some(ItemRecord::Completed))
    }

    pub fn consumed_count(&self, task_id: &str) -> u64 {
        self.lock().consumed.get(task_id).copied().unwrap_or(0)
    }

    fn is_expired(&self, since: Instant, now: Instant) -> bool {
        self.processing_ttl
            .is_some_and(|ttl| now.saturating_duration_since(since) >= ttl)
    }
}

impl Default for InMemoryProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn check_idempotent(&self, item_id: &str) -> Result<IdempotencyState, TrackerError> {
        let now = Instant::now();
        let mut state = self.lock();
        match state.items.get(item_id).copied() {
            Some(ItemRecord::Completed) => Ok(IdempotencyState::Completed),
            Some(ItemRecord::Processing { since }) if !self.is_expired(since, now) => {
                Ok(IdempotencyState::Processing)
            }
            _ => {
                state
                    .items
                    .insert(item_id.to_string(), ItemRecord::Processing { since: now });
                Ok(IdempotencyState::FirstTime)
            }
        }
    }

    async fn mark_completed(&self, item_id: &str) -> Result<(), TrackerError> {
        self.lock()
            .items
            .insert(item_id.to_string(), ItemRecord::Completed);
        Ok(())
    }

    async fn release_processing(&self, item_id: &str) -> Result<(), TrackerError> {
        let mut state = self.lock();
        if matches!(state.items.get(item_id), Some(ItemRecord::Processing { .. })) {
            state.items.remove(item_id);
        }
        Ok(())
    }

    async fn increment_consumed_count(&self, task_id: &str) -> Result<u64, TrackerError> {
        let mut state = self.lock();
        let count = state.consumed.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get_expected_total(&self, task_id: &str) -> Result<u64, TrackerError> {
        Ok(self.lock().expected.get(task_id).copied().unwrap_or(0))
    }

    async fn set_expected_total(&self, task_id: &str, total: u64) -> Result<(), TrackerError> {
        self.lock().expected.insert(task_id.to_string(), total);
        Ok(())
    }

    async fn clear_progress(&self, task_id: &str) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.consumed.remove(task_id);
        state.expected.remove(task_id);
        Ok(())
    }
}
