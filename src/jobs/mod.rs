pub mod custom_run;
pub mod submission;

#[cfg(test)]
pub mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::QueueConfig;
use crate::core::Verdict;
use crate::engine::{ExecutorError, ExecutorResolver};
use crate::storage::ProblemStore;

pub use custom_run::CustomRunRequest;
pub use submission::SubmissionRequest;

/// Queue transport with at-least-once delivery
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait for the next message on any of `queues`.
    /// Returns the queue it came from and the raw message.
    async fn dequeue(&self, queues: &[&str]) -> anyhow::Result<(String, String)>;

    async fn enqueue(&self, queue: &str, payload: &str) -> anyhow::Result<()>;
}

/// Kind of evaluation job, decided by the inbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    CustomRun,
    Submission,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::CustomRun => write!(f, "custom_run"),
            JobKind::Submission => write!(f, "submission"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("no executor found for language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to fetch problem data: {0:#}")]
    Fetch(anyhow::Error),

    #[error(transparent)]
    Execution(#[from] ExecutorError),

    #[error("failed to publish verdict to {queue}: {cause:#}")]
    Publish { queue: String, cause: anyhow::Error },
}

/// A queue message, kept as the raw JSON object it arrived as.
///
/// Pipelines read typed views of it; the published message is the very same
/// object with a `result` field added.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPayload {
    fields: Map<String, Value>,
}

impl EvaluationPayload {
    pub fn from_json(raw: &str) -> Result<Self, JobError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(JobError::Payload("expected a JSON object".into())),
            Err(e) => Err(JobError::Payload(e.to_string())),
        }
    }

    pub fn view<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| JobError::Payload(e.to_string()))
    }

    /// Short identity for logs
    pub fn describe(&self) -> String {
        let field = |key: &str| match self.fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "-".to_string(),
        };
        format!(
            "problem={} user={} language={}",
            field("problemId"),
            field("userId"),
            field("language")
        )
    }

    pub fn with_result(&self, verdict: Verdict) -> Value {
        let mut fields = self.fields.clone();
        fields.insert("result".to_string(), Value::String(verdict.to_string()));
        Value::Object(fields)
    }
}

/// Everything a pipeline needs to evaluate and publish one job
pub struct JobContext {
    pub resolver: ExecutorResolver,
    pub store: Arc<dyn ProblemStore>,
    pub queue: Arc<dyn JobQueue>,
    pub queues: QueueConfig,
}

/// Evaluate one job and publish its verdict
pub async fn process_job(
    kind: JobKind,
    payload: &EvaluationPayload,
    ctx: &JobContext,
) -> Result<Verdict, JobError> {
    let verdict = match kind {
        JobKind::CustomRun => {
            let request: CustomRunRequest = payload.view()?;
            custom_run::process_custom_run(&request, &ctx.resolver, ctx.store.as_ref()).await?
        }
        JobKind::Submission => {
            let request: SubmissionRequest = payload.view()?;
            submission::process_submission(&request, &ctx.resolver, ctx.store.as_ref()).await?
        }
    };

    let queue = ctx.queues.result_queue(kind);
    let message = payload.with_result(verdict).to_string();
    ctx.queue
        .enqueue(queue, &message)
        .await
        .map_err(|cause| JobError::Publish {
            queue: queue.to_string(),
            cause,
        })?;

    Ok(verdict)
}
