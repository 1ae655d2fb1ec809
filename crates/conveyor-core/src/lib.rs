//! conveyor-core
//!
//! Building blocks for a broker-backed task pipeline: keyed publish, bounded
//! concurrent consumption, idempotent processing, retry and dead-letter
//! channels, and batch-completion tracking.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（envelope, validation, outcome, decision, dead letter, errors）
//! - **ports**: 抽象化レイヤー（Broker, ProgressTracker, TaskProcessor, BatchCompletionHook）
//! - **app**: アプリケーションロジック（builder, consumer, producer, limiter, worker_loop, config）
//! - **typed**: 型付き Task API（Task trait, Handler trait, ProcessorRegistry）
//! - **impls**: 実装（InMemoryBroker, InMemoryProgressTracker など開発用）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{Pipeline, PipelineBuilder, PipelineConfig};
pub use domain::{ProcessOutcome, TaskEnvelope, TaskType};
