//! State - idempotency record states.

use serde::{Deserialize, Serialize};

/// Answer of an idempotency check for one item.
///
/// State transitions of the record behind it:
/// - absent -> processing (claimed by the check that returns `FirstTime`)
/// - processing -> completed (after successful processing, never reverts)
/// - processing -> absent (attempt ended without success, or the claim expired)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyState {
    /// Not seen before; the caller now holds the processing claim.
    FirstTime,

    /// Another attempt holds the claim.
    Processing,

    /// Already processed; must not be processed again.
    Completed,
}
