use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use conveyor_core::app::{LogFormat, LoggingSettings, PipelineCounts};
use conveyor_core::impls::{InMemoryBroker, InMemoryProgressTracker};
use conveyor_core::ports::BatchCompletionHook;
use conveyor_core::typed::{DocumentTask, Handler, ProcessorRegistry};
use conveyor_core::{PipelineBuilder, PipelineConfig, ProcessOutcome, TaskEnvelope, TaskType};

/// Run a demo document batch through the in-memory pipeline.
#[derive(Debug, Parser)]
#[command(name = "conveyor", version, about)]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Documents in the batch.
    #[arg(long, default_value_t = 5)]
    items: usize,

    /// Failed attempts per document before it succeeds.
    #[arg(long, default_value_t = 1)]
    fail_times: u32,

    /// Batch (task) id.
    #[arg(long, default_value = "demo-batch")]
    task_id: String,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

fn init_logging(settings: &LoggingSettings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries the JSON report
    match settings.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr);
            registry.with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr);
            registry.with(layer).init();
        }
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr);
            registry.with(layer).init();
        }
    }
}

/// Fails the first `fail_times` attempts of every document.
struct FlakyIndexer {
    fail_times: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl Handler<DocumentTask> for FlakyIndexer {
    async fn handle(&self, envelope: &TaskEnvelope, task: DocumentTask) -> ProcessOutcome {
        let key = envelope.partition_key();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let n = attempts.entry(key).or_insert(0);
            *n += 1;
            *n
        };

        if attempt <= self.fail_times {
            return ProcessOutcome::retryable(format!(
                "embedding service unavailable (attempt {attempt})"
            ));
        }
        info!(name = %task.name, bytes = task.content.len(), "document indexed");
        ProcessOutcome::Success
    }
}

/// Logs and wakes `main` when the batch completes.
#[derive(Default)]
struct BatchSignal {
    fired: AtomicBool,
    done: Notify,
}

impl BatchSignal {
    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchCompletionHook for BatchSignal {
    async fn on_batch_completed(&self, task_id: &str, total: u64) {
        info!(task_id, total, "batch completed");
        self.fired.store(true, Ordering::SeqCst);
        self.done.notify_one();
    }
}

#[derive(Serialize)]
struct Report<'a> {
    task_id: &'a str,
    items: usize,
    batch_completed: bool,
    counts: PipelineCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    init_logging(&config.logging);

    let broker = Arc::new(InMemoryBroker::new(config.broker.redelivery_delay()));
    let tracker = Arc::new(InMemoryProgressTracker::from_settings(&config.tracker));

    let mut registry = ProcessorRegistry::new();
    registry.register::<DocumentTask, _>(FlakyIndexer {
        fail_times: cli.fail_times,
        attempts: Mutex::new(HashMap::new()),
    })?;

    let signal = Arc::new(BatchSignal::default());
    let pipeline = PipelineBuilder::new(config)
        .broker(broker)
        .tracker(tracker.clone())
        .registry(registry)
        .hook(signal.clone())
        .expect_types(&[TaskType::DOCUMENT])
        .build()
        .context("building pipeline")?;

    let workers = pipeline.start();

    let envelopes: Vec<TaskEnvelope> = (0..cli.items)
        .map(|i| {
            TaskEnvelope::new(cli.task_id.as_str(), TaskType::document())
                .with_item_id(format!("{}-doc-{i}", cli.task_id))
                .with_field("name", format!("doc-{i}.md"))
                .with_field("content", format!("# Document {i}\n\nbody"))
        })
        .collect();
    pipeline
        .producer()
        .submit_batch(tracker.as_ref(), &cli.task_id, &envelopes)
        .await
        .context("submitting batch")?;
    info!(task_id = %cli.task_id, items = cli.items, "batch submitted");

    let deadline = Instant::now() + Duration::from_secs(cli.timeout_secs);
    while cli.items > 0 && !signal.fired() {
        tokio::select! {
            _ = signal.done.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                // every item either completed or was dead-lettered
                let counts = pipeline.counts();
                if (counts.completed + counts.dead_lettered) as usize >= cli.items {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("timed out waiting for the batch");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
        }
    }

    workers.shutdown_and_join().await;

    let report = Report {
        task_id: &cli.task_id,
        items: cli.items,
        batch_completed: signal.fired(),
        counts: pipeline.counts(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
