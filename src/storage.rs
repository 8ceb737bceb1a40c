//! Problem store backed by MinIO/S3
//!
//! Reference solutions and test cases are read-only JSON objects:
//! - `problems/{problem_id}/solution.json`  → `{ "language", "code" }`
//! - `problems/{problem_id}/testcases.json` → `[{ "input", "output", "isHidden" }]`

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StorageConfig;

/// A stored test case, in evaluation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
    #[serde(default, rename = "isHidden")]
    pub is_hidden: bool,
}

/// The reference solution of a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSolution {
    pub language: String,
    pub code: String,
}

/// Read-only access to the problem catalog
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn fetch_reference_solution(&self, problem_id: &str) -> Result<ReferenceSolution>;

    /// Test cases in their stored order
    async fn fetch_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>>;
}

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    pub fn new(settings: &StorageConfig) -> Self {
        let endpoint_url = settings.endpoint_url();
        info!(
            "Connecting to MinIO at {} (bucket {})",
            endpoint_url, settings.bucket
        );

        let credentials = Credentials::new(
            settings.access_key.as_str(),
            settings.secret_key.as_str(),
            None,
            None,
            "minio",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Download a file from S3/MinIO
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;

        let data = response.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    async fn download_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.download(key).await?;
        debug!("Downloaded {} ({} bytes)", key, bytes.len());
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", key))
    }
}

#[async_trait]
impl ProblemStore for StorageClient {
    async fn fetch_reference_solution(&self, problem_id: &str) -> Result<ReferenceSolution> {
        let key = solution_key(problem_id)?;
        self.download_json(&key)
            .await
            .with_context(|| format!("Failed to fetch reference solution of problem {}", problem_id))
    }

    async fn fetch_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>> {
        let key = testcases_key(problem_id)?;
        self.download_json(&key)
            .await
            .with_context(|| format!("Failed to fetch test cases of problem {}", problem_id))
    }
}

fn problem_prefix(problem_id: &str) -> Result<String> {
    if problem_id.is_empty() || problem_id.contains('/') || problem_id.contains("..") {
        bail!("Invalid problem id: {:?}", problem_id);
    }
    Ok(format!("problems/{}", problem_id))
}

fn solution_key(problem_id: &str) -> Result<String> {
    Ok(format!("{}/solution.json", problem_prefix(problem_id)?))
}

fn testcases_key(problem_id: &str) -> Result<String> {
    Ok(format!("{}/testcases.json", problem_prefix(problem_id)?))
}
