//! LearnHub Jobs — background-job orchestration daemon.
//!
//! Main entry point that wires the broker, job queue registry, cron
//! engine, and scheduler together and runs until a shutdown signal
//! arrives. Job processors are bound by the application services that
//! embed the registry; this daemon produces and administers jobs.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use learnhub_broker::{BrokerClient, MemoryBroker};
use learnhub_core::config::AppConfig;
use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_core::traits::cron::CronEngine;
use learnhub_entity::job::JobType;
use learnhub_worker::{JobQueueRegistry, QueueEventListener, Scheduler, TokioCronEngine};

#[tokio::main]
async fn main() {
    let env = std::env::var("LEARNHUB_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Daemon error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Listener that surfaces job lifecycle transitions in the daemon log.
#[derive(Debug)]
struct JobLogListener;

#[async_trait::async_trait]
impl QueueEventListener for JobLogListener {
    async fn on_completed(
        &self,
        queue: &str,
        job_id: Uuid,
        _result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        tracing::info!("Job {} completed in '{}'", job_id, queue);
        Ok(())
    }

    async fn on_failed(
        &self,
        queue: &str,
        job_id: Uuid,
        attempts_made: u32,
        reason: &str,
        retrying: bool,
    ) -> AppResult<()> {
        if retrying {
            tracing::warn!(
                "Job {} failed in '{}' (attempt {}): {}; retrying",
                job_id,
                queue,
                attempts_made,
                reason
            );
        } else {
            tracing::error!(
                "Job {} failed terminally in '{}' after {} attempts: {}",
                job_id,
                queue,
                attempts_made,
                reason
            );
        }
        Ok(())
    }

    async fn on_stalled(&self, queue: &str, job_id: Uuid, stalled_count: u32) -> AppResult<()> {
        tracing::warn!(
            "Job {} stalled in '{}' (stall #{})",
            job_id,
            queue,
            stalled_count
        );
        Ok(())
    }
}

/// Main daemon run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting LearnHub jobs daemon v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Broker + registry ────────────────────────────────
    let broker = Arc::new(MemoryBroker::new(&config.worker)) as Arc<dyn BrokerClient>;
    let registry = Arc::new(JobQueueRegistry::new(broker, config.queue.clone()));

    // ── Step 2: Lifecycle logging for every known queue ──────────
    let listener = Arc::new(JobLogListener);
    for job_type in JobType::ALL {
        registry.register_event_listener(
            &registry.queue_name(job_type),
            Arc::clone(&listener) as Arc<dyn QueueEventListener>,
        );
    }

    // ── Step 3: Cron engine + scheduler ──────────────────────────
    let engine = Arc::new(TokioCronEngine::new().await?) as Arc<dyn CronEngine>;
    let scheduler = Scheduler::new(Arc::clone(&registry), engine, config.scheduler.clone());

    if config.scheduler.enabled {
        scheduler.initialize().await?;
        tracing::info!("Scheduler initialized");
    } else {
        tracing::warn!("Scheduler disabled by configuration");
    }

    tracing::info!("LearnHub jobs daemon ready");

    // ── Step 4: Wait for shutdown signal ─────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    // ── Step 5: Ordered shutdown: scheduler, then registry ───────
    scheduler.shutdown().await;

    tracing::info!("LearnHub jobs daemon shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
