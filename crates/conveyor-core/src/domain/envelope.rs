//! TaskEnvelope - the serializable unit of work and its retry metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use super::task_type::TaskType;

/// TaskType + payload + retry metadata, as carried on every channel.
///
/// Wire format is camelCase JSON. Decoding is forward compatible: unknown
/// fields are ignored, and a missing `taskId` / `type` decodes to an empty
/// value so that validation (not the codec) reports it.
///
/// Invariants:
/// - `retry_count` only ever grows, and only the consumer grows it.
/// - `item_id` is stable across every republish of the same logical item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    #[serde(default)]
    task_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_id: Option<String>,

    #[serde(rename = "type", default)]
    task_type: TaskType,

    #[serde(default)]
    payload: Map<String, Value>,

    #[serde(default)]
    retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,

    /// Number of times this item was bounced because another consumer held it.
    /// Tracked apart from `retry_count`: it is a delivery artifact, not a failure.
    #[serde(default, skip_serializing_if = "is_zero")]
    recheck_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl TaskEnvelope {
    pub fn new(task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.into(),
            item_id: None,
            task_type,
            payload: Map::new(),
            retry_count: 0,
            priority: None,
            recheck_count: 0,
        }
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Test/replay helper: start from a given retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn priority(&self) -> Option<&str> {
        self.priority.as_deref()
    }

    pub fn recheck_count(&self) -> u32 {
        self.recheck_count
    }

    /// Copy of this envelope for the next attempt after a processing failure.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = self.retry_count.saturating_add(1);
        next
    }

    /// Copy of this envelope bounced because the item was in flight elsewhere.
    /// `retry_count` is left as is.
    pub fn next_recheck(&self) -> Self {
        let mut next = self.clone();
        next.recheck_count = self.recheck_count.saturating_add(1);
        next
    }

    /// Broker partition / ordering key: item id, then task id, then a fresh ULID.
    pub fn partition_key(&self) -> String {
        if let Some(item_id) = self.item_id.as_deref().filter(|s| !s.is_empty()) {
            return item_id.to_string();
        }
        if !self.task_id.is_empty() {
            return self.task_id.clone();
        }
        Ulid::new().to_string()
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
    use serde_json::json;

    #[test]
    fn decodes_camel_case_and_ignores_unknown_fields() {
        let raw = json!({
            "taskId": "T1",
            "itemId": "D1",
            "type": "document",
            "payload": {"name": "a.md", "content": "hello"},
            "retryCount": 2,
            "priority": "high",
            "addedInV2": {"whatever": true}
        });
        let env = TaskEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap();
        assert_eq!(env.task_id(), "T1");
        assert_eq!(env.item_id(), Some("D1"));
        assert_eq!(env.task_type().as_str(), "document");
        assert_eq!(env.field_str("name"), Some("a.md"));
        assert_eq!(env.retry_count(), 2);
        assert_eq!(env.priority(), Some("high"));
    }

    #[test]
    fn missing_required_fields_decode_to_empty_values() {
        let env = TaskEnvelope::from_bytes(br#"{"payload": {}}"#).unwrap();
        assert!(env.task_id().is_empty());
        assert!(env.task_type().is_empty());
        assert_eq!(env.retry_count(), 0);
        assert_eq!(env.item_id(), None);
    }

    #[test]
    fn next_attempt_increments_only_retry_count() {
        let env = TaskEnvelope::new("T1", TaskType::document()).with_item_id("D1");
        let next = env.next_attempt().next_attempt();
        assert_eq!(next.retry_count(), 2);
        assert_eq!(next.recheck_count(), 0);
        assert_eq!(next.item_id(), Some("D1"));

        let bounced = next.next_recheck();
        assert_eq!(bounced.retry_count(), 2);
        assert_eq!(bounced.recheck_count(), 1);
    }

    #[test]
    fn partition_key_prefers_item_then_task() {
        let env = TaskEnvelope::new("T1", TaskType::document());
        assert_eq!(env.partition_key(), "T1");
        assert_eq!(env.clone().with_item_id("D1").partition_key(), "D1");

        let anonymous = TaskEnvelope::new("", TaskType::document());
        let k1 = anonymous.partition_key();
        let k2 = anonymous.partition_key();
        assert_eq!(k1.len(), 26);
        assert_ne!(k1, k2);
    }

    #[test]
    fn serializes_type_field_name() {
        let env = TaskEnvelope::new("T1", TaskType::code_file()).with_field("name", "main.rs");
        let v: Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(v["type"], "code_file");
        assert_eq!(v["taskId"], "T1");
        assert_eq!(v["retryCount"], 0);
        assert!(v.get("recheckCount").is_none());
    }
}
