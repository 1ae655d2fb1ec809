//! ProcessorRegistry - Handler の登録と `type` によるディスパッチ
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::{EnvelopeValidator, ProcessOutcome, TaskEnvelope};
use crate::ports::TaskProcessor;

/// ProcessorRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = ProcessorRegistry::new();
/// registry.register::<DocumentTask, _>(DocumentIndexer::new(store))?;
/// let validator = registry.validator();
/// ```
///
/// # 内部実装
/// - `register::<T, H>(handler)` で登録
/// - 内部的に TypedHandler でラップして DynHandler に変換
/// - HashMap<String, Arc<dyn DynHandler>> で管理
#[derive(Default)]
pub struct ProcessorRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

/// RegistryError は ProcessorRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let typed_handler = TypedHandler::new(handler);
        self.handlers.insert(task_type, Arc::new(typed_handler));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Sorted, so callers can compare and print it.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Validator requiring each registered task's `REQUIRED` fields.
    pub fn validator(&self) -> EnvelopeValidator {
        self.handlers
            .values()
            .fold(EnvelopeValidator::empty(), |validator, handler| {
                validator.with_type(handler.task_type(), handler.required_fields())
            })
    }
}

#[async_trait]
impl TaskProcessor for ProcessorRegistry {
    async fn process(&self, envelope: &TaskEnvelope) -> ProcessOutcome {
        let task_type = envelope.task_type().as_str();
        match self.handlers.get(task_type) {
            Some(handler) => handler.handle_dyn(envelope).await,
            None => ProcessOutcome::fatal(format!("no handler registered for task type '{task_type}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use crate::typed::task::{CodeFileTask, DocumentTask};

    struct DocOk;

    #[async_trait]
    impl Handler<DocumentTask> for DocOk {
        async fn handle(&self, _envelope: &TaskEnvelope, _task: DocumentTask) -> ProcessOutcome {
            ProcessOutcome::Success
        }
    }

    struct CodeRetry;

    #[async_trait]
    impl Handler<CodeFileTask> for CodeRetry {
        async fn handle(&self, _envelope: &TaskEnvelope, task: CodeFileTask) -> ProcessOutcome {
            ProcessOutcome::retryable(format!("parser busy for {}", task.name))
        }
    }

    fn registry() -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        registry.register::<DocumentTask, _>(DocOk).unwrap();
        registry.register::<CodeFileTask, _>(CodeRetry).unwrap();
        registry
    }

    fn envelope(task_type: TaskType) -> TaskEnvelope {
        TaskEnvelope::new("T1", task_type)
            .with_item_id("F1")
            .with_field("name", "main.rs")
            .with_field("content", "fn main() {}")
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry.register::<DocumentTask, _>(DocOk).unwrap();
        let result = registry.register::<DocumentTask, _>(DocOk);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == "document"));
    }

    #[test]
    fn registered_types_are_sorted() {
        assert_eq!(registry().registered_types(), vec!["code_file", "document"]);
    }

    #[tokio::test]
    async fn dispatches_by_type() {
        let registry = registry();
        assert_eq!(
            registry.process(&envelope(TaskType::document())).await,
            ProcessOutcome::Success
        );
        assert_eq!(
            registry.process(&envelope(TaskType::code_file())).await,
            ProcessOutcome::retryable("parser busy for main.rs")
        );
    }

    #[tokio::test]
    async fn unknown_type_is_fatal() {
        let outcome = registry().process(&envelope(TaskType::new("image"))).await;
        assert!(matches!(outcome, ProcessOutcome::Fatal(ref msg) if msg.contains("image")));
    }

    #[test]
    fn validator_covers_registered_types_only() {
        let validator = registry().validator();
        assert!(validator.knows("document"));
        assert!(validator.knows("code_file"));
        assert!(!validator.knows("image"));
        assert!(validator.validate(&envelope(TaskType::code_file())).is_ok());
    }
}
