//! Impls - 実装（開発用・テスト用）
//!
//! In-memory implementations of the ports.
//!
//! # 含まれる実装
//! - **InMemoryBroker**: per-topic FIFO with ack/nack leases and redelivery delay
//! - **InMemoryProgressTracker**: idempotency records and batch counters
//!
//! Production implementations (Kafka broker, Redis tracker) belong in
//! separate crates that depend on the ports only.

pub mod inmem_broker;
pub mod inmem_tracker;

pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_tracker::InMemoryProgressTracker;
