//! WorkerLoop - listener tasks for the main and retry channels.
//!
//! receive → Consumer::handle_delivery → (ack | nack), until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::consumer::Consumer;
use super::producer::Producer;
use crate::domain::Channel;
use crate::ports::Broker;

/// Listener group handle.
/// - `request_shutdown` でリスナーは新しい配信を受け取らなくなる
/// - `shutdown_and_join()` で全リスナーの終了と publish の完了を待てる
pub struct WorkerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<JoinHandle<()>>,
    producer: Producer,
}

/// Where a group of listeners reads from.
pub struct ListenerSpec {
    pub channel: Channel,
    pub topic: String,
    pub listeners: usize,
}

impl WorkerGroup {
    /// Spawn `spec.listeners` tasks per channel. All of them share `consumer`
    /// (and with it the concurrency limiter).
    pub fn spawn(
        specs: Vec<ListenerSpec>,
        broker: Arc<dyn Broker>,
        consumer: Arc<Consumer>,
        poll_timeout: Duration,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        let producer = consumer.producer().clone();
        let mut joins = Vec::new();

        for spec in specs {
            for listener_id in 0..spec.listeners {
                let listener = Listener {
                    id: listener_id,
                    channel: spec.channel,
                    topic: spec.topic.clone(),
                    broker: Arc::clone(&broker),
                    consumer: Arc::clone(&consumer),
                    poll_timeout,
                };
                let rx = shutdown_tx.subscribe();
                joins.push(tokio::spawn(listener.run(rx)));
            }
        }
        info!(listeners = joins.len(), "listeners started");

        Self {
            shutdown_tx,
            joins,
            producer,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new deliveries. Attempts waiting on a permit or a retry
    /// delay are abandoned; processor calls already running finish.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown, wait for every listener, then for pending publishes.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "listener task failed");
            }
        }
        self.producer.flush().await;
        info!("listeners stopped");
    }
}

struct Listener {
    id: usize,
    channel: Channel,
    topic: String,
    broker: Arc<dyn Broker>,
    consumer: Arc<Consumer>,
    poll_timeout: Duration,
}

impl Listener {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(listener = self.id, channel = %self.channel, topic = %self.topic, "listening");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // receive は待つ可能性があるので shutdown と競合させる
            let received = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.broker.receive(&self.topic, self.poll_timeout) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    self.consumer.handle_delivery(self.channel, delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(listener = self.id, topic = %self.topic, error = %e, "receive failed");
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }
        }
        debug!(listener = self.id, channel = %self.channel, "listener stopped");
    }
}
