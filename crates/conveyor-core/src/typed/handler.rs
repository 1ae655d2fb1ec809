//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::task::Task;
use crate::domain::{ProcessOutcome, TaskEnvelope};

/// Handler は Task を処理して ProcessOutcome を返す
///
/// # 使用例
/// ```ignore
/// struct Indexer;
///
/// #[async_trait]
/// impl Handler<DocumentTask> for Indexer {
///     async fn handle(&self, envelope: &TaskEnvelope, task: DocumentTask) -> ProcessOutcome {
///         match index(&task).await {
///             Ok(()) => ProcessOutcome::Success,
///             Err(e) => ProcessOutcome::retryable(e.to_string()),
///         }
///     }
/// }
/// ```
///
/// The envelope is passed alongside the decoded task for its ids and retry
/// count; the payload has already been decoded into `task`.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, envelope: &TaskEnvelope, task: T) -> ProcessOutcome;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T> を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, envelope: &TaskEnvelope) -> ProcessOutcome;
    fn task_type(&self) -> &'static str;
    fn required_fields(&self) -> &'static [&'static str];
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, envelope: &TaskEnvelope) -> ProcessOutcome {
        let payload = Value::Object(envelope.payload().clone());
        // A payload that cannot become `T` will not improve on retry.
        let task: T = match serde_json::from_value(payload) {
            Ok(task) => task,
            Err(e) => return ProcessOutcome::fatal(format!("payload decode ({}): {e}", T::TYPE)),
        };
        self.handler.handle(envelope, task).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn required_fields(&self) -> &'static [&'static str] {
        T::REQUIRED
    }
}
