//! Producer - keyed, non-blocking publish to main / retry / dead-letter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use ulid::Ulid;

use super::config::TopicNames;
use crate::domain::{Channel, DeadLetterRecord, PipelineError, TaskEnvelope};
use crate::ports::{Broker, ProgressTracker};

/// Completion of a spawned publish. Dropping it does not cancel the publish.
pub struct PublishHandle {
    join: JoinHandle<Result<(), PipelineError>>,
}

impl PublishHandle {
    pub async fn wait(self) -> Result<(), PipelineError> {
        self.join
            .await
            .map_err(|e| PipelineError::Other(format!("publish task failed: {e}")))?
    }
}

/// Counts spawned publishes so `flush` can wait for them.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Publishes envelopes keyed by `partition_key` so that all attempts of one
/// item stay ordered relative to each other.
///
/// Publishing is asynchronous: the broker call runs on a spawned task and its
/// outcome is logged there. Callers only wait when they ask to (`wait`,
/// `flush`).
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    topics: TopicNames,
    in_flight: Arc<InFlight>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, topics: TopicNames) -> Self {
        Self {
            broker,
            topics,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    /// Publish an envelope to `channel`. Dead-letter publishes should go
    /// through `publish_dead_letter` so the error context is attached.
    pub fn publish(&self, channel: Channel, envelope: &TaskEnvelope) -> PublishHandle {
        let key = envelope.partition_key();
        match envelope.to_bytes() {
            Ok(bytes) => self.spawn_publish(channel, key, bytes),
            Err(e) => self.failed(channel, key, e.into()),
        }
    }

    pub fn publish_dead_letter(&self, record: &DeadLetterRecord) -> PublishHandle {
        let key = record
            .envelope
            .as_ref()
            .map(TaskEnvelope::partition_key)
            .unwrap_or_else(|| Ulid::new().to_string());
        match record.to_bytes() {
            Ok(bytes) => self.spawn_publish(Channel::DeadLetter, key, bytes),
            Err(e) => self.failed(Channel::DeadLetter, key, e.into()),
        }
    }

    /// Upstream entry point: publish a new envelope to the main channel.
    pub fn submit(&self, envelope: &TaskEnvelope) -> PublishHandle {
        self.publish(Channel::Main, envelope)
    }

    /// Register the expected item count of `task_id`, then publish every
    /// envelope to main and wait for all publishes.
    ///
    /// Every envelope needs an `itemId`: without one a redelivered duplicate
    /// cannot be recognised and would count twice toward the total.
    pub async fn submit_batch(
        &self,
        tracker: &dyn ProgressTracker,
        task_id: &str,
        envelopes: &[TaskEnvelope],
    ) -> Result<(), PipelineError> {
        if envelopes.iter().any(|env| env.item_id().is_none_or(str::is_empty)) {
            return Err(PipelineError::MissingItemId {
                task_id: task_id.to_string(),
            });
        }

        tracker
            .set_expected_total(task_id, envelopes.len() as u64)
            .await?;

        let handles: Vec<PublishHandle> = envelopes.iter().map(|env| self.submit(env)).collect();
        for handle in handles {
            handle.wait().await?;
        }
        Ok(())
    }

    /// Wait until every publish spawned so far has finished.
    pub async fn flush(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    fn spawn_publish(&self, channel: Channel, key: String, bytes: Vec<u8>) -> PublishHandle {
        let guard = InFlightGuard::new(&self.in_flight);
        let broker = Arc::clone(&self.broker);
        let topic = self.topics.topic(channel).to_string();

        let join = tokio::spawn(async move {
            let _guard = guard;
            match broker.publish(&topic, &key, bytes).await {
                Ok(()) => {
                    debug!(%channel, %topic, %key, "published");
                    Ok(())
                }
                Err(source) => {
                    if channel.is_recovery_path() {
                        error!(
                            %channel, %topic, %key, error = %source,
                            "publish failed; message has no further automatic recovery"
                        );
                    } else {
                        warn!(%channel, %topic, %key, error = %source, "publish failed");
                    }
                    Err(PipelineError::Publish { channel, source })
                }
            }
        });
        PublishHandle { join }
    }

    fn failed(&self, channel: Channel, key: String, err: PipelineError) -> PublishHandle {
        error!(%channel, %key, error = %err, "could not encode message for publish");
        PublishHandle {
            join: tokio::spawn(async move { Err(err) }),
        }
    }
}
