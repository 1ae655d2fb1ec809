//! Errors - library error types.
//!
//! Processing failures are not errors here: they are `ProcessOutcome`
//! variants. These types cover the infrastructure around processing.

use super::channel::Channel;

/// Broker (publish / receive / ack) failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("topic '{0}' rejected the publish")]
    Rejected(String),

    #[error("broker operation failed: {0}")]
    OperationFailed(String),
}

/// Idempotency / progress store failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("progress store unavailable: {0}")]
    Unavailable(String),

    #[error("progress store operation failed: {0}")]
    OperationFailed(String),
}

/// Top-level pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("publish to {channel} channel failed: {source}")]
    Publish {
        channel: Channel,
        #[source]
        source: BrokerError,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("batch '{task_id}' has an envelope without itemId")]
    MissingItemId { task_id: String },

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
