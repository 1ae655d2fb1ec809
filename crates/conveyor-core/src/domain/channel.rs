//! Channel - the three logical destinations of an envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage an envelope is published to / consumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Main,
    Retry,
    /// Terminal. Never consumed by the pipeline itself.
    DeadLetter,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Main => "main",
            Channel::Retry => "retry",
            Channel::DeadLetter => "dead_letter",
        }
    }

    /// Publish failures here have no further automatic recovery.
    pub fn is_recovery_path(self) -> bool {
        matches!(self, Channel::Retry | Channel::DeadLetter)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
