//! Ports - 抽象化レイヤー
//!
//! Each trait is the seam to an external system (message broker, idempotency
//! store, the processing collaborator). Implementations live in `impls` (dev /
//! test) or in downstream crates (Kafka, Redis, ...).
//!
//! # Design principles
//! - The progress tracker is the single source of truth shared by all consumer
//!   instances; nothing authoritative is kept in process memory.
//! - The broker only moves bytes (key + serialized envelope).

pub mod broker;
pub mod processor;
pub mod tracker;

// 主要な trait を再エクスポート
pub use self::broker::{Broker, BrokerRecord, Delivery};
pub use self::processor::{BatchCompletionHook, LoggingBatchHook, TaskProcessor};
pub use self::tracker::ProgressTracker;
