//! Broker port - partitioned message broker (Kafka, Redis Streams, InMemory).
//!
//! The pipeline publishes keyed messages to named topics and consumes them as
//! `Delivery` leases that must be settled with `ack` or `nack`.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::BrokerError;

/// One message as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,

    /// Partition / ordering key.
    pub key: String,

    pub payload: Vec<u8>,

    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

/// A leased message.
/// The consumer owns this lease and must either `ack` or `nack`.
///
/// Dropping an unsettled delivery behaves like `nack`: the broker redelivers
/// it once its visibility delay has passed.
#[async_trait]
pub trait Delivery: Send {
    fn record(&self) -> &BrokerRecord;

    /// Done with this message; never deliver it again.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Leave the message unacknowledged so the broker redelivers it later.
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish one keyed message. Messages with the same key on the same
    /// topic are delivered in publish order.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message on `topic`.
    async fn receive(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, BrokerError>;
}
