//! DeadLetterRecord - what lands in the dead-letter channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::envelope::TaskEnvelope;
use super::outcome::DeadLetterKind;

/// Envelope plus the error context an operator needs to inspect it.
///
/// `envelope` is absent only for `Undecodable`, in which case the original
/// bytes are kept (lossy UTF-8) in `raw_payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<TaskEnvelope>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,

    pub kind: DeadLetterKind,
    pub reason: String,
    pub source_channel: Channel,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn for_envelope(
        envelope: TaskEnvelope,
        kind: DeadLetterKind,
        reason: impl Into<String>,
        source_channel: Channel,
    ) -> Self {
        Self {
            envelope: Some(envelope),
            raw_payload: None,
            kind,
            reason: reason.into(),
            source_channel,
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn undecodable(raw: &[u8], reason: impl Into<String>, source_channel: Channel) -> Self {
        Self {
            envelope: None,
            raw_payload: Some(String::from_utf8_lossy(raw).into_owned()),
            kind: DeadLetterKind::Undecodable,
            reason: reason.into(),
            source_channel,
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    #[test]
    fn wire_shape_carries_error_context() {
        let env = TaskEnvelope::new("T1", TaskType::document())
            .with_item_id("D1")
            .with_retry_count(4);
        let record =
            DeadLetterRecord::for_envelope(env, DeadLetterKind::Exhausted, "boom", Channel::Retry);

        let v: serde_json::Value = serde_json::from_slice(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(v["kind"], "exhausted");
        assert_eq!(v["sourceChannel"], "retry");
        assert_eq!(v["envelope"]["retryCount"], 4);
        assert!(v["deadLetteredAt"].is_string());
        assert!(v.get("rawPayload").is_none());
    }

    #[test]
    fn undecodable_keeps_raw_bytes() {
        let record = DeadLetterRecord::undecodable(b"not json", "expected value", Channel::Main);
        assert_eq!(record.envelope, None);
        assert_eq!(record.raw_payload.as_deref(), Some("not json"));
        assert_eq!(record.kind, DeadLetterKind::Undecodable);
    }
}
