//! PipelineBuilder - パイプラインの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use tokio::sync::watch;

use super::config::{ConfigError, PipelineConfig};
use super::consumer::Consumer;
use super::limiter::ConcurrencyLimiter;
use super::producer::Producer;
use super::status::{PipelineCounts, PipelineStats};
use super::worker_loop::{ListenerSpec, WorkerGroup};
use crate::domain::{Channel, Decider, EnvelopeValidator};
use crate::ports::{BatchCompletionHook, Broker, ProgressTracker, TaskProcessor};
use crate::typed::ProcessorRegistry;

/// PipelineBuilder はパイプラインを構築
///
/// # 使用例
/// ```ignore
/// let pipeline = PipelineBuilder::new(config)
///     .broker(broker)
///     .tracker(tracker)
///     .registry(registry)
///     .expect_types(&["document", "code_file"])
///     .build()?;
/// let workers = pipeline.start();
/// ```
///
/// # Fail-fast 設計
/// - config は build() でもう一度検証する
/// - broker / tracker / processor が無ければ BuildError
/// - expect_types() の集合 ⊆ 登録済み集合 でなければ BuildError
///
/// The tracker is used as given: `[tracker]` settings such as the claim TTL
/// belong to whoever constructs it (`InMemoryProgressTracker::from_settings`).
pub struct PipelineBuilder {
    config: PipelineConfig,
    broker: Option<Arc<dyn Broker>>,
    tracker: Option<Arc<dyn ProgressTracker>>,
    processor: Option<Arc<dyn TaskProcessor>>,
    registered_types: Option<Vec<String>>,
    hook: Option<Arc<dyn BatchCompletionHook>>,
    decider: Option<Arc<dyn Decider>>,
    validator: Option<EnvelopeValidator>,
    expected_types: Option<Vec<String>>,
}

/// BuildError はパイプライン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            broker: None,
            tracker: None,
            processor: None,
            registered_types: None,
            hook: None,
            decider: None,
            validator: None,
            expected_types: None,
        }
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Any processor. Validation falls back to `EnvelopeValidator::default()`.
    pub fn processor(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processor = Some(processor);
        self.registered_types = None;
        self
    }

    /// Typed handlers. Also supplies the validator unless one is set.
    pub fn registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registered_types = Some(registry.registered_types());
        if self.validator.is_none() {
            self.validator = Some(registry.validator());
        }
        self.processor = Some(Arc::new(registry));
        self
    }

    pub fn hook(mut self, hook: Arc<dyn BatchCompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn validator(mut self, validator: EnvelopeValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 期待される task type のリストを設定
    pub fn expect_types(mut self, task_types: &[&str]) -> Self {
        self.expected_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;

        let broker = self.broker.ok_or(BuildError::MissingCollaborator("broker"))?;
        let tracker = self.tracker.ok_or(BuildError::MissingCollaborator("tracker"))?;
        let processor = self
            .processor
            .ok_or(BuildError::MissingCollaborator("processor"))?;
        let validator = self.validator.unwrap_or_default();

        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| {
                    !validator.knows(t.as_str())
                        || self
                            .registered_types
                            .as_ref()
                            .is_some_and(|registered| !registered.contains(*t))
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let settings = self.config.pipeline.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PipelineStats::new());
        let producer = Producer::new(Arc::clone(&broker), self.config.topics.clone());
        let limiter = Arc::new(ConcurrencyLimiter::new(settings.max_concurrency));

        let mut consumer = Consumer::new(
            limiter,
            Arc::clone(&tracker),
            processor,
            producer.clone(),
            settings,
        )
        .with_validator(Arc::new(validator))
        .with_stats(Arc::clone(&stats))
        .with_shutdown(shutdown_rx);
        if let Some(hook) = self.hook {
            consumer = consumer.with_hook(hook);
        }
        if let Some(decider) = self.decider {
            consumer = consumer.with_decider(decider);
        }

        Ok(Pipeline {
            config: self.config,
            broker,
            tracker,
            producer,
            consumer: Arc::new(consumer),
            stats,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }
}

/// A wired pipeline. `start` spawns the listeners.
pub struct Pipeline {
    config: PipelineConfig,
    broker: Arc<dyn Broker>,
    tracker: Arc<dyn ProgressTracker>,
    producer: Producer,
    consumer: Arc<Consumer>,
    stats: Arc<PipelineStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Pipeline {
    /// Spawn `listeners_per_channel` listeners on main and on retry.
    pub fn start(&self) -> WorkerGroup {
        let listeners = self.config.pipeline.listeners_per_channel;
        let specs = [Channel::Main, Channel::Retry]
            .into_iter()
            .map(|channel| ListenerSpec {
                channel,
                topic: self.config.topics.topic(channel).to_string(),
                listeners,
            })
            .collect();

        WorkerGroup::spawn(
            specs,
            Arc::clone(&self.broker),
            Arc::clone(&self.consumer),
            self.config.pipeline.poll_timeout(),
            Arc::clone(&self.shutdown_tx),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn tracker(&self) -> &Arc<dyn ProgressTracker> {
        &self.tracker
    }

    pub fn consumer(&self) -> &Arc<Consumer> {
        &self.consumer
    }

    pub fn counts(&self) -> PipelineCounts {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessOutcome, TaskEnvelope};
    use crate::impls::{InMemoryBroker, InMemoryProgressTracker};
    use crate::typed::{DocumentTask, Handler};
    use async_trait::async_trait;

    struct DocOk;

    #[async_trait]
    impl Handler<DocumentTask> for DocOk {
        async fn handle(&self, _envelope: &TaskEnvelope, _task: DocumentTask) -> ProcessOutcome {
            ProcessOutcome::Success
        }
    }

    fn registry() -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        registry.register::<DocumentTask, _>(DocOk).unwrap();
        registry
    }

    fn builder() -> PipelineBuilder {
        PipelineBuilder::new(PipelineConfig::default())
            .broker(Arc::new(InMemoryBroker::default()))
            .tracker(Arc::new(InMemoryProgressTracker::new()))
    }

    #[test]
    fn builds_with_all_collaborators() {
        let pipeline = builder().registry(registry()).expect_types(&["document"]).build();
        assert!(pipeline.is_ok());
    }

    #[test]
    fn missing_processor_is_reported() {
        let result = builder().build();
        assert!(matches!(result, Err(BuildError::MissingCollaborator("processor"))));
    }

    #[test]
    fn missing_broker_is_reported() {
        let result = PipelineBuilder::new(PipelineConfig::default())
            .tracker(Arc::new(InMemoryProgressTracker::new()))
            .registry(registry())
            .build();
        assert!(matches!(result, Err(BuildError::MissingCollaborator("broker"))));
    }

    #[test]
    fn unregistered_expected_type_is_reported() {
        let result = builder()
            .registry(registry())
            .expect_types(&["document", "code_file"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["code_file".to_string()]
        ));
    }

    #[test]
    fn invalid_config_fails_fast() {
        let mut config = PipelineConfig::default();
        config.topics.retry = config.topics.main.clone();
        let result = PipelineBuilder::new(config)
            .broker(Arc::new(InMemoryBroker::default()))
            .tracker(Arc::new(InMemoryProgressTracker::new()))
            .registry(registry())
            .build();
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn start_spawns_listeners_per_channel() {
        let mut config = PipelineConfig::default();
        config.pipeline.listeners_per_channel = 3;
        config.pipeline.poll_timeout_ms = 10;
        let pipeline = PipelineBuilder::new(config)
            .broker(Arc::new(InMemoryBroker::default()))
            .tracker(Arc::new(InMemoryProgressTracker::new()))
            .registry(registry())
            .build()
            .unwrap();

        let workers = pipeline.start();
        assert_eq!(workers.len(), 6);
        workers.shutdown_and_join().await;
    }
}
