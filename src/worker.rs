//! Job worker loop
//!
//! Waits on both inbound queues and hands each job to its pipeline in a
//! spawned task. A semaphore bounds how many jobs, and therefore sandboxes,
//! are in flight. A failed job is logged and dropped; it never stops the loop.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::jobs::{process_job, EvaluationPayload, JobContext, JobKind};

pub struct Worker {
    ctx: Arc<JobContext>,
    permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(ctx: Arc<JobContext>, max_concurrent_jobs: usize) -> Self {
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
        }
    }

    /// Consume jobs until `shutdown` resolves, then wait for in-flight jobs.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let inbound = self.ctx.queues.inbound();
        let mut jobs = JoinSet::new();
        let mut failure = None;

        info!("Waiting for jobs on {}...", inbound.join(", "));

        loop {
            while let Some(finished) = jobs.try_join_next() {
                if let Err(e) = finished {
                    error!("Job task panicked: {}", e);
                }
            }

            // Admission first, so a dequeued job never waits for a slot.
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.permits.clone().acquire_owned() => permit?,
            };

            let (queue, raw) = tokio::select! {
                _ = &mut shutdown => break,
                message = self.ctx.queue.dequeue(&inbound) => match message {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Failed to dequeue job: {:#}", e);
                        failure = Some(e);
                        break;
                    }
                },
            };

            let Some(kind) = self.ctx.queues.kind_of(&queue) else {
                warn!("Received message from unexpected queue {}, skipping", queue);
                continue;
            };

            let payload = match EvaluationPayload::from_json(&raw) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to parse {} job: {}. Data: {}", kind, e, raw);
                    continue;
                }
            };

            let ctx = self.ctx.clone();
            jobs.spawn(async move {
                let _permit = permit;
                handle_job(kind, payload, &ctx).await;
            });
        }

        if !jobs.is_empty() {
            info!("Waiting for {} in-flight job(s) to finish...", jobs.len());
        }
        while let Some(finished) = jobs.join_next().await {
            if let Err(e) = finished {
                error!("Job task panicked: {}", e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn handle_job(kind: JobKind, payload: EvaluationPayload, ctx: &JobContext) {
    let job = payload.describe();
    info!("Received {} job: {}", kind, job);

    match process_job(kind, &payload, ctx).await {
        Ok(verdict) => info!("{} job completed: {}, verdict={}", kind, job, verdict),
        Err(e) => error!("Failed to process {} job ({}): {}. Dropping job", kind, job, e),
    }
}
