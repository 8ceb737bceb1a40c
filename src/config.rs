//! Worker configuration
//!
//! Loaded once at startup from environment variables (after `.env`).

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::engine::runtime::SandboxLimits;
use crate::jobs::JobKind;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
const DEFAULT_MEMORY_MB: u32 = 1024;
const DEFAULT_CPUS: f64 = 0.5;
const DEFAULT_PIDS_LIMIT: u32 = 64;
const DEFAULT_OUTPUT_KB: u32 = 16 * 1024;

/// Connection settings of the MinIO/S3 problem store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".into(),
            port: 9000,
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            bucket: "codewar-problems".into(),
            use_ssl: false,
        }
    }
}

impl StorageConfig {
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.endpoint, self.port)
    }
}

/// Names of the inbound and outbound queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub custom_run: String,
    pub submission: String,
    pub custom_run_result: String,
    pub submission_result: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            custom_run: "customRunBeforeEvaluationQueue".into(),
            submission: "submissionBeforeEvaluationQueue".into(),
            custom_run_result: "customRunAfterEvaluationQueue".into(),
            submission_result: "submissionAfterEvaluationQueue".into(),
        }
    }
}

impl QueueConfig {
    /// Queues the worker consumes from
    pub fn inbound(&self) -> [&str; 2] {
        [&self.custom_run, &self.submission]
    }

    pub fn kind_of(&self, queue: &str) -> Option<JobKind> {
        if queue == self.custom_run {
            Some(JobKind::CustomRun)
        } else if queue == self.submission {
            Some(JobKind::Submission)
        } else {
            None
        }
    }

    pub fn result_queue(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::CustomRun => &self.custom_run_result,
            JobKind::Submission => &self.submission_result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub queues: QueueConfig,
    /// Upper bound on jobs, and therefore sandboxes, in flight at once
    pub max_concurrent_jobs: usize,
    pub sandbox: SandboxLimits,
    pub storage: StorageConfig,
    /// Overrides the embedded language table
    pub languages_config: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = QueueConfig::default();
        let queues = QueueConfig {
            custom_run: text("CUSTOM_RUN_QUEUE", &defaults.custom_run),
            submission: text("SUBMISSION_QUEUE", &defaults.submission),
            custom_run_result: text("CUSTOM_RUN_RESULT_QUEUE", &defaults.custom_run_result),
            submission_result: text("SUBMISSION_RESULT_QUEUE", &defaults.submission_result),
        };
        if queues.custom_run == queues.submission {
            bail!(
                "Custom run and submission queues must differ (both {})",
                queues.custom_run
            );
        }

        let max_concurrent_jobs = parse_or(&lookup, "MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)?;
        if max_concurrent_jobs == 0 {
            bail!("MAX_CONCURRENT_JOBS must be at least 1");
        }

        let memory_mb = parse_or(&lookup, "SANDBOX_MEMORY_MB", DEFAULT_MEMORY_MB)?;
        let cpus = parse_or(&lookup, "SANDBOX_CPUS", DEFAULT_CPUS)?;
        let pids_limit = parse_or(&lookup, "SANDBOX_PIDS_LIMIT", DEFAULT_PIDS_LIMIT)?;
        let output_kb = parse_or(&lookup, "SANDBOX_OUTPUT_KB", DEFAULT_OUTPUT_KB)?;
        if memory_mb == 0 || pids_limit == 0 || output_kb == 0 || cpus.is_nan() || cpus <= 0.0 {
            bail!("Sandbox limits must be positive");
        }

        let storage_defaults = StorageConfig::default();
        let storage = StorageConfig {
            endpoint: text("MINIO_ENDPOINT", &storage_defaults.endpoint),
            port: parse_or(&lookup, "MINIO_PORT", storage_defaults.port)?,
            access_key: text("MINIO_ACCESS_KEY", &storage_defaults.access_key),
            secret_key: text("MINIO_SECRET_KEY", &storage_defaults.secret_key),
            bucket: text("MINIO_BUCKET", &storage_defaults.bucket),
            use_ssl: lookup("MINIO_USE_SSL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(storage_defaults.use_ssl),
        };

        Ok(Self {
            redis_url: text("REDIS_URL", DEFAULT_REDIS_URL),
            queues,
            max_concurrent_jobs,
            sandbox: SandboxLimits::new(memory_mb, cpus, pids_limit, output_kb),
            storage,
            languages_config: lookup("LANGUAGES_CONFIG")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
