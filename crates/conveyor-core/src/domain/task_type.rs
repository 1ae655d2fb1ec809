//! TaskType - selects the processing branch for an envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task type carried in the envelope's `type` field.
///
/// Kept as a string newtype (not a closed enum) so that unknown values survive
/// decoding and are rejected by validation instead of by the codec.
/// Domain-specific variants are registered on the validator / registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const DOCUMENT: &'static str = "document";
    pub const CODE_FILE: &'static str = "code_file";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn document() -> Self {
        Self::new(Self::DOCUMENT)
    }

    pub fn code_file() -> Self {
        Self::new(Self::CODE_FILE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Missing `type` decodes to an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
