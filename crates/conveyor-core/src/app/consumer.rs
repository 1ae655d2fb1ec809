//! Consumer - one delivery, one attempt.
//!
//! ```text
//! RECEIVED → PERMIT_ACQUIRED → IDEMPOTENT_SKIP | PROCESSED_OK
//!                             | PROCESSED_FATAL | PROCESSED_RETRYABLE → ACK | NO_ACK
//! ```
//!
//! Every failure on the processing path ends as an `AttemptOutcome`; the only
//! thing the broker sees is ack or nack. Republishes are spawned and the
//! original delivery is acked without waiting for them (a crash in between
//! loses the retry).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{Instrument, debug, error, field, info, info_span, warn};

use super::config::ConsumerSettings;
use super::limiter::ConcurrencyLimiter;
use super::producer::Producer;
use super::status::PipelineStats;
use crate::domain::{
    AttemptOutcome, Channel, DeadLetterKind, DeadLetterRecord, Decider, Decision,
    DefaultDecider, DeferReason, EnvelopeValidator, IdempotencyState, ProcessOutcome,
    TaskEnvelope, TrackerError,
};
use crate::ports::{
    BatchCompletionHook, BrokerRecord, Delivery, LoggingBatchHook, ProgressTracker, TaskProcessor,
};

/// Shared by every listener task of a pipeline.
pub struct Consumer {
    limiter: Arc<ConcurrencyLimiter>,
    tracker: Arc<dyn ProgressTracker>,
    processor: Arc<dyn TaskProcessor>,
    hook: Arc<dyn BatchCompletionHook>,
    decider: Arc<dyn Decider>,
    validator: Arc<EnvelopeValidator>,
    producer: Producer,
    settings: ConsumerSettings,
    stats: Arc<PipelineStats>,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    pub fn new(
        limiter: Arc<ConcurrencyLimiter>,
        tracker: Arc<dyn ProgressTracker>,
        processor: Arc<dyn TaskProcessor>,
        producer: Producer,
        settings: ConsumerSettings,
    ) -> Self {
        // sender dropped: shutdown never fires until `with_shutdown`
        let (_, shutdown) = watch::channel(false);
        Self {
            limiter,
            tracker,
            processor,
            hook: Arc::new(LoggingBatchHook),
            decider: Arc::new(DefaultDecider::new(settings.retry_policy())),
            validator: Arc::new(EnvelopeValidator::default()),
            producer,
            settings,
            stats: Arc::new(PipelineStats::new()),
            shutdown,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn BatchCompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_validator(mut self, validator: Arc<EnvelopeValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Run one attempt for `delivery` and settle it: ack unless deferred.
    pub async fn handle_delivery(
        &self,
        channel: Channel,
        delivery: Box<dyn Delivery>,
    ) -> AttemptOutcome {
        let record = delivery.record();
        let span = info_span!(
            "attempt",
            %channel,
            key = %record.key,
            delivery = record.delivery_count,
            task_id = field::Empty,
            item_id = field::Empty,
            retry_count = field::Empty,
        );
        let outcome = self.attempt(channel, record).instrument(span.clone()).await;
        self.stats.record(&outcome);
        settle(delivery, &outcome).instrument(span).await;
        outcome
    }

    async fn attempt(&self, channel: Channel, record: &BrokerRecord) -> AttemptOutcome {
        let envelope = match TaskEnvelope::from_bytes(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable delivery");
                let dead = DeadLetterRecord::undecodable(&record.payload, e.to_string(), channel);
                drop(self.producer.publish_dead_letter(&dead));
                return AttemptOutcome::DeadLettered {
                    kind: DeadLetterKind::Undecodable,
                    retry_count: 0,
                };
            }
        };

        let span = tracing::Span::current();
        span.record("task_id", envelope.task_id());
        span.record("item_id", envelope.item_id().unwrap_or(""));
        span.record("retry_count", envelope.retry_count());

        if channel == Channel::Retry && !self.settings.retry_delay().is_zero() {
            let delay = tokio::time::sleep(self.settings.retry_delay());
            tokio::select! {
                _ = delay => {}
                _ = self.shutdown_requested() => {
                    info!("shutdown during retry delay; abandoning");
                    return AttemptOutcome::Deferred(DeferReason::Abandoned);
                }
            }
        }

        let acquired = tokio::select! {
            permit = self.limiter.try_acquire(self.settings.acquire_timeout()) => permit,
            _ = self.shutdown_requested() => {
                info!("shutdown while waiting for a permit; abandoning");
                return AttemptOutcome::Deferred(DeferReason::Abandoned);
            }
        };
        let Some(_permit) = acquired else {
            warn!(
                timeout_ms = self.settings.acquire_timeout_ms,
                "no processing permit; leaving delivery for redelivery"
            );
            return AttemptOutcome::Deferred(DeferReason::Backpressure);
        };

        if !self.settings.process_interval().is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.process_interval()) => {}
                _ = self.shutdown_requested() => {
                    return AttemptOutcome::Deferred(DeferReason::Abandoned);
                }
            }
        }

        self.run(channel, envelope).await
    }

    /// Everything after the permit: idempotency, validation, processing.
    async fn run(&self, channel: Channel, envelope: TaskEnvelope) -> AttemptOutcome {
        let item_id = envelope.item_id().map(str::to_owned);

        if let Some(item_id) = item_id.as_deref() {
            match self.tracker.check_idempotent(item_id).await {
                Ok(IdempotencyState::Completed) => {
                    info!("item already completed; skipping");
                    return AttemptOutcome::IdempotentSkip;
                }
                Ok(IdempotencyState::Processing) => return self.recheck(channel, envelope),
                Ok(IdempotencyState::FirstTime) => {}
                Err(e) => {
                    warn!(error = %e, "idempotency check failed");
                    return self.schedule_retry(channel, &envelope, &format!("tracker: {e}"));
                }
            }
        }

        if let Err(e) = self.validator.validate(&envelope) {
            warn!(error = %e, "invalid envelope");
            self.release(item_id.as_deref()).await;
            return self.dead_letter(channel, envelope, DeadLetterKind::Validation, e.to_string());
        }

        match self.invoke_processor(&envelope).await {
            ProcessOutcome::Success => {
                let batch_completed = self.complete(&envelope, item_id.as_deref()).await;
                AttemptOutcome::Completed { batch_completed }
            }
            ProcessOutcome::TerminalSkip(reason) => {
                info!(%reason, "item gone upstream; nothing to do");
                self.release(item_id.as_deref()).await;
                AttemptOutcome::TerminalSkip
            }
            ProcessOutcome::Retryable(err) => {
                warn!(error = %err, "processing failed");
                self.release(item_id.as_deref()).await;
                self.schedule_retry(channel, &envelope, &err)
            }
            ProcessOutcome::Fatal(err) => {
                error!(error = %err, "processing failed permanently");
                self.release(item_id.as_deref()).await;
                self.dead_letter(channel, envelope, DeadLetterKind::Fatal, err)
            }
        }
    }

    /// Runs the processor on its own task so a panic is caught at the join.
    async fn invoke_processor(&self, envelope: &TaskEnvelope) -> ProcessOutcome {
        let processor = Arc::clone(&self.processor);
        let owned = envelope.clone();
        let task = tokio::spawn(async move { processor.process(&owned).await }.in_current_span());

        match task.await {
            Ok(outcome) => outcome,
            Err(join) if join.is_panic() => {
                error!(error = %join, "processor panicked");
                ProcessOutcome::retryable(format!("processor panicked: {join}"))
            }
            Err(join) => ProcessOutcome::retryable(format!("processor task cancelled: {join}")),
        }
    }

    /// Mark the item done and advance the batch counter. Returns whether this
    /// attempt completed the batch.
    async fn complete(&self, envelope: &TaskEnvelope, item_id: Option<&str>) -> bool {
        if let Some(item_id) = item_id {
            if let Err(e) = self.tracker.mark_completed(item_id).await {
                error!(error = %e, "failed to mark item completed");
            }
        }

        match self.advance_batch(envelope.task_id()).await {
            Ok(done) => {
                info!(batch_completed = done, "item processed");
                done
            }
            Err(e) => {
                error!(error = %e, "failed to update batch progress");
                false
            }
        }
    }

    async fn advance_batch(&self, task_id: &str) -> Result<bool, TrackerError> {
        let count = self.tracker.increment_consumed_count(task_id).await?;
        let expected = self.tracker.get_expected_total(task_id).await?;
        debug!(count, expected, "batch progress");

        if expected == 0 || count != expected {
            return Ok(false);
        }
        self.hook.on_batch_completed(task_id, expected).await;
        self.tracker.clear_progress(task_id).await?;
        Ok(true)
    }

    /// Another consumer holds the item. Bounce it through the retry channel
    /// without spending a retry, unless either budget is already used up.
    fn recheck(&self, channel: Channel, envelope: TaskEnvelope) -> AttemptOutcome {
        if self.settings.retry_policy().is_exhausted(envelope.retry_count()) {
            let reason = format!(
                "retry count {} already past max {}",
                envelope.retry_count(),
                self.settings.max_retry
            );
            return self.dead_letter(channel, envelope, DeadLetterKind::Exhausted, reason);
        }

        let next = envelope.next_recheck();
        if next.recheck_count() > self.settings.max_recheck {
            let reason = format!(
                "item still processing elsewhere after {} rechecks",
                envelope.recheck_count()
            );
            return self.dead_letter(channel, envelope, DeadLetterKind::Exhausted, reason);
        }

        info!(
            recheck_count = next.recheck_count(),
            "item in flight elsewhere; rechecking via retry channel"
        );
        drop(self.producer.publish(Channel::Retry, &next));
        AttemptOutcome::Rechecked {
            recheck_count: next.recheck_count(),
        }
    }

    fn schedule_retry(&self, channel: Channel, envelope: &TaskEnvelope, err: &str) -> AttemptOutcome {
        match self.decider.decide(envelope, err) {
            Decision::Retry { envelope, reason } => {
                let retry_count = envelope.retry_count();
                info!(retry_count, %reason, "scheduling retry");
                drop(self.producer.publish(Channel::Retry, &envelope));
                AttemptOutcome::RetryScheduled { retry_count }
            }
            Decision::DeadLetter { envelope, reason } => {
                self.dead_letter(channel, envelope, DeadLetterKind::Exhausted, reason)
            }
        }
    }

    fn dead_letter(
        &self,
        channel: Channel,
        envelope: TaskEnvelope,
        kind: DeadLetterKind,
        reason: String,
    ) -> AttemptOutcome {
        let retry_count = envelope.retry_count();
        error!(?kind, retry_count, %reason, "dead-lettering");
        let record = DeadLetterRecord::for_envelope(envelope, kind, reason, channel);
        drop(self.producer.publish_dead_letter(&record));
        AttemptOutcome::DeadLettered { kind, retry_count }
    }

    async fn release(&self, item_id: Option<&str>) {
        let Some(item_id) = item_id else { return };
        if let Err(e) = self.tracker.release_processing(item_id).await {
            warn!(error = %e, "failed to release processing claim");
        }
    }

    /// Resolves once shutdown is requested; pends forever if the sender is gone.
    async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn settle(delivery: Box<dyn Delivery>, outcome: &AttemptOutcome) {
    let settled = if outcome.acknowledges() {
        delivery.ack().await
    } else {
        delivery.nack().await
    };
    match settled {
        Ok(()) => debug!(outcome = outcome.label(), "settled"),
        Err(e) => warn!(outcome = outcome.label(), error = %e, "failed to settle delivery"),
    }
}
