//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **Consumer**: 1 配信 = 1 attempt（permit → idempotency → validate → process → ack/retry/DLQ）
//! - **Producer**: keyed publish（main / retry / dead-letter）
//! - **WorkerGroup**: main / retry のリスナーループ
//! - **ConcurrencyLimiter**: プロセス内の同時処理数制限
//! - **PipelineStats**: attempt 結果の集計

pub mod builder;
pub mod config;
pub mod consumer;
pub mod limiter;
pub mod producer;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Pipeline, PipelineBuilder};
pub use self::config::{
    BrokerSettings, ConfigError, ConsumerSettings, LogFormat, LoggingSettings, PipelineConfig,
    TopicNames, TrackerSettings,
};
pub use self::consumer::Consumer;
pub use self::limiter::{ConcurrencyLimiter, Permit};
pub use self::producer::{Producer, PublishHandle};
pub use self::status::{PipelineCounts, PipelineStats};
pub use self::worker_loop::{ListenerSpec, WorkerGroup};
