//! Envelope validation: required-field presence per task type.

use std::collections::HashMap;

use serde_json::Value;

use super::envelope::TaskEnvelope;
use super::task_type::TaskType;

/// Why an envelope was rejected. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("envelope has no taskId")]
    MissingTaskId,

    #[error("envelope has no type")]
    MissingType,

    #[error("unknown task type '{0}'")]
    UnknownType(String),

    #[error("task type '{task_type}' is missing required fields: {missing:?}")]
    MissingFields {
        task_type: String,
        missing: Vec<String>,
    },
}

/// Per-type required-field schemas.
///
/// `document` and `code_file` are known out of the box; domain-specific
/// variants are added with `with_type`.
#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    schemas: HashMap<String, Vec<String>>,
}

impl EnvelopeValidator {
    /// Validator with no known types (every type is unknown).
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn with_type(mut self, task_type: &str, required: &[&str]) -> Self {
        self.register(task_type, required);
        self
    }

    /// Register (or replace) the schema of a task type.
    pub fn register(&mut self, task_type: &str, required: &[&str]) {
        self.schemas.insert(
            task_type.to_string(),
            required.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn knows(&self, task_type: &str) -> bool {
        self.schemas.contains_key(task_type)
    }

    pub fn validate(&self, envelope: &TaskEnvelope) -> Result<(), ValidationError> {
        if envelope.task_type().is_empty() {
            return Err(ValidationError::MissingType);
        }
        if envelope.task_id().trim().is_empty() {
            return Err(ValidationError::MissingTaskId);
        }

        let task_type = envelope.task_type().as_str();
        let required = self
            .schemas
            .get(task_type)
            .ok_or_else(|| ValidationError::UnknownType(task_type.to_string()))?;

        let missing: Vec<String> = required
            .iter()
            .filter(|field| !is_present(envelope.payload().get(field.as_str())))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingFields {
                task_type: task_type.to_string(),
                missing,
            })
        }
    }
}

impl Default for EnvelopeValidator {
    fn default() -> Self {
        Self::empty()
            .with_type(TaskType::DOCUMENT, &["name", "content"])
            .with_type(TaskType::CODE_FILE, &["name", "content"])
    }
}

/// Present = exists, not null, not a blank string.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn document() -> TaskEnvelope {
        TaskEnvelope::new("T1", TaskType::document())
            .with_item_id("D1")
            .with_field("name", "guide.md")
            .with_field("content", "# Guide")
    }

    #[test]
    fn accepts_complete_document() {
        assert_eq!(EnvelopeValidator::default().validate(&document()), Ok(()));
    }

    #[test]
    fn rejects_missing_type_before_task_id() {
        let env = TaskEnvelope::new("", TaskType::new(""));
        assert_eq!(
            EnvelopeValidator::default().validate(&env),
            Err(ValidationError::MissingType)
        );
    }

    #[test]
    fn rejects_missing_task_id() {
        let env = TaskEnvelope::new("  ", TaskType::document());
        assert_eq!(
            EnvelopeValidator::default().validate(&env),
            Err(ValidationError::MissingTaskId)
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let env = TaskEnvelope::new("T1", TaskType::new("spreadsheet"));
        assert_eq!(
            EnvelopeValidator::default().validate(&env),
            Err(ValidationError::UnknownType("spreadsheet".into()))
        );
    }

    #[rstest]
    #[case::no_content(serde_json::json!({"name": "a"}), vec!["content"])]
    #[case::null_name(serde_json::json!({"name": null, "content": "x"}), vec!["name"])]
    #[case::blank_both(serde_json::json!({"name": " ", "content": ""}), vec!["name", "content"])]
    fn rejects_code_file_with_missing_fields(
        #[case] payload: serde_json::Value,
        #[case] expected: Vec<&str>,
    ) {
        let env = TaskEnvelope::new("T1", TaskType::code_file())
            .with_payload(payload.as_object().cloned().unwrap());
        let err = EnvelopeValidator::default().validate(&env).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                task_type: "code_file".into(),
                missing: expected.into_iter().map(String::from).collect(),
            }
        );
    }

    #[test]
    fn domain_specific_types_can_be_registered() {
        let validator = EnvelopeValidator::default().with_type("memory_chunk", &["text"]);
        let env = TaskEnvelope::new("T9", TaskType::new("memory_chunk")).with_field("text", "hi");
        assert!(validator.knows("memory_chunk"));
        assert_eq!(validator.validate(&env), Ok(()));
    }
}
