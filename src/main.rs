mod config;
mod core;
mod engine;
mod jobs;
mod languages;
mod redis_manager;
mod storage;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::engine::docker::DockerRuntime;
use crate::engine::{ExecutorResolver, SandboxManager};
use crate::jobs::JobContext;
use crate::languages::LanguageRegistry;
use crate::redis_manager::RedisQueue;
use crate::storage::StorageClient;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("judge=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Judge Worker...");

    let config = WorkerConfig::from_env()?;
    info!(
        "Worker config: max_concurrent_jobs={}, sandbox={:?}",
        config.max_concurrent_jobs, config.sandbox
    );

    let registry = LanguageRegistry::load(config.languages_config.as_deref())?;

    let runtime = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to Docker")?,
    );
    let sandbox = Arc::new(SandboxManager::new(runtime, config.sandbox.clone()));
    let resolver = ExecutorResolver::new(&registry, sandbox);
    info!("Supported languages: {}", resolver.supported_languages().join(", "));

    let storage = StorageClient::new(&config.storage);

    let queue = RedisQueue::connect(&config.redis_url).await?;

    let ctx = Arc::new(JobContext {
        resolver,
        store: Arc::new(storage),
        queue: Arc::new(queue),
        queues: config.queues.clone(),
    });

    let worker = Worker::new(ctx, config.max_concurrent_jobs);
    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, no longer accepting jobs");
        })
        .await?;

    info!("Judge Worker stopped");
    Ok(())
}
