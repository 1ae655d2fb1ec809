//! Status - パイプラインの集計
//!
//! Per-process counters of attempt outcomes. The tracker stays the source of
//! truth for item state; these only describe what this process did.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::AttemptOutcome;

/// Point-in-time copy of `PipelineStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounts {
    pub acked: u64,
    pub deferred: u64,
    pub skipped: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub terminal_skipped: u64,
    pub rechecked: u64,
    pub batches_completed: u64,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    acked: AtomicU64,
    deferred: AtomicU64,
    skipped: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    terminal_skipped: AtomicU64,
    rechecked: AtomicU64,
    batches_completed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &AttemptOutcome) {
        if outcome.acknowledges() {
            bump(&self.acked);
        }
        match outcome {
            AttemptOutcome::IdempotentSkip => bump(&self.skipped),
            AttemptOutcome::Completed { batch_completed } => {
                bump(&self.completed);
                if *batch_completed {
                    bump(&self.batches_completed);
                }
            }
            AttemptOutcome::TerminalSkip => bump(&self.terminal_skipped),
            AttemptOutcome::RetryScheduled { .. } => bump(&self.retried),
            AttemptOutcome::Rechecked { .. } => bump(&self.rechecked),
            AttemptOutcome::DeadLettered { .. } => bump(&self.dead_lettered),
            AttemptOutcome::Deferred(_) => bump(&self.deferred),
        }
    }

    pub fn snapshot(&self) -> PipelineCounts {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineCounts {
            acked: load(&self.acked),
            deferred: load(&self.deferred),
            skipped: load(&self.skipped),
            completed: load(&self.completed),
            retried: load(&self.retried),
            dead_lettered: load(&self.dead_lettered),
            terminal_skipped: load(&self.terminal_skipped),
            rechecked: load(&self.rechecked),
            batches_completed: load(&self.batches_completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeadLetterKind, DeferReason};

    #[test]
    fn records_each_outcome_once() {
        let stats = PipelineStats::new();
        stats.record(&AttemptOutcome::Completed { batch_completed: false });
        stats.record(&AttemptOutcome::Completed { batch_completed: true });
        stats.record(&AttemptOutcome::RetryScheduled { retry_count: 1 });
        stats.record(&AttemptOutcome::DeadLettered {
            kind: DeadLetterKind::Exhausted,
            retry_count: 4,
        });
        stats.record(&AttemptOutcome::Deferred(DeferReason::Backpressure));
        stats.record(&AttemptOutcome::IdempotentSkip);

        let counts = stats.snapshot();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.batches_completed, 1);
        assert_eq!(counts.retried, 1);
        assert_eq!(counts.dead_lettered, 1);
        assert_eq!(counts.deferred, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.acked, 5);
    }

    #[test]
    fn counts_serialize_as_flat_json() {
        let counts = PipelineCounts {
            acked: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["acked"], 3);
        assert_eq!(json["batches_completed"], 0);
    }
}
