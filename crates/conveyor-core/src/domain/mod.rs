//! Domain model (envelope, validation, outcomes, decisions, errors).

pub mod channel;
pub mod dead_letter;
pub mod decision;
pub mod envelope;
pub mod errors;
pub mod outcome;
pub mod state;
pub mod task_type;
pub mod validation;

pub use channel::Channel;
pub use dead_letter::DeadLetterRecord;
pub use decision::{Decider, Decision, DefaultDecider, RetryPolicy};
pub use envelope::TaskEnvelope;
pub use errors::{BrokerError, PipelineError, TrackerError};
pub use outcome::{AttemptOutcome, DeadLetterKind, DeferReason, ProcessOutcome};
pub use state::IdempotencyState;
pub use task_type::TaskType;
pub use validation::{EnvelopeValidator, ValidationError};
