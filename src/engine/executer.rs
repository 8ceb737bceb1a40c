//! Language executors
//!
//! One `LanguageExecutor` per configured language. It makes sure the toolchain
//! image is present, hands user code and stdin to a fresh sandbox and
//! classifies what comes back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::classify::classify;
use super::runtime::{ContainerRuntime, RuntimeError, SandboxFile};
use super::sandbox::{SandboxError, SandboxManager, SandboxOutcome};
use crate::core::ExecutionResult;
use crate::languages::{LanguageConfig, INPUT_FILE};

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The toolchain could not be made available; no verdict may be derived
    #[error("toolchain image {image} is unavailable: {source}")]
    ImageUnavailable {
        image: String,
        #[source]
        source: RuntimeError,
    },
}

/// Runs source code against one stdin and reports a normalized result
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str, stdin: &str) -> Result<ExecutionResult, ExecutorError>;
}

/// Fetch-if-absent cache of toolchain images, shared by all executors.
///
/// Concurrent callers for the same image wait on a single pull. A failed pull
/// leaves the entry empty so a later call tries again.
pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
    images: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ImageCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            images: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ensure(&self, image: &str) -> Result<(), RuntimeError> {
        let cell = self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(image.to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            if !self.runtime.image_exists(image).await? {
                self.runtime.pull_image(image).await?;
            }
            Ok::<(), RuntimeError>(())
        })
        .await?;

        Ok(())
    }

    /// Forget that `image` is present so the next `ensure` checks again
    pub fn invalidate(&self, image: &str) {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(image);
    }
}

pub struct LanguageExecutor {
    config: LanguageConfig,
    sandbox: Arc<SandboxManager>,
    images: Arc<ImageCache>,
}

impl LanguageExecutor {
    pub fn new(config: LanguageConfig, sandbox: Arc<SandboxManager>, images: Arc<ImageCache>) -> Self {
        Self {
            config,
            sandbox,
            images,
        }
    }

    fn sandbox_files(&self, code: &str, stdin: &str) -> Vec<SandboxFile> {
        vec![
            SandboxFile::new(self.config.source_file.as_str(), code),
            SandboxFile::new(INPUT_FILE, stdin),
        ]
    }

    async fn ensure_image(&self) -> Result<(), ExecutorError> {
        self.images
            .ensure(&self.config.image)
            .await
            .map_err(|source| ExecutorError::ImageUnavailable {
                image: self.config.image.clone(),
                source,
            })
    }

    async fn run_sandbox(&self, files: &[SandboxFile]) -> Result<SandboxOutcome, SandboxError> {
        self.sandbox
            .run(
                &self.config.image,
                self.config.command(),
                files,
                self.config.timeout(),
            )
            .await
    }
}

#[async_trait]
impl CodeExecutor for LanguageExecutor {
    async fn execute(&self, code: &str, stdin: &str) -> Result<ExecutionResult, ExecutorError> {
        self.ensure_image().await?;

        debug!(
            "Executing {} code ({} bytes, stdin {} bytes)",
            self.config.name,
            code.len(),
            stdin.len()
        );

        let files = self.sandbox_files(code, stdin);
        let mut outcome = self.run_sandbox(&files).await;

        if matches!(
            outcome,
            Err(SandboxError::Runtime(RuntimeError::ImageNotFound(_)))
        ) {
            warn!(
                "Image {} vanished after the availability check, pulling again",
                self.config.image
            );
            self.images.invalidate(&self.config.image);
            self.ensure_image().await?;
            outcome = match self.run_sandbox(&files).await {
                Err(SandboxError::Runtime(source @ RuntimeError::ImageNotFound(_))) => {
                    return Err(ExecutorError::ImageUnavailable {
                        image: self.config.image.clone(),
                        source,
                    })
                }
                other => other,
            };
        }

        let result = classify(outcome);

        info!(
            "Executed {} code: status={:?}",
            self.config.name, result.status
        );
        Ok(result)
    }
}
