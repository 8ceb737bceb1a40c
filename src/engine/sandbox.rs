//! Sandbox lifecycle manager
//!
//! Runs one command in one fresh, resource-capped, network-isolated container:
//! - create the container, copy the input files in, start it
//! - collect the multiplexed output until the stream ends or the timeout fires
//! - kill on timeout or when the output ceiling is crossed
//! - detect OOM kills from the exit state
//! - remove the container on every exit path
//!
//! The manager does NOT know about languages or interpret stderr.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ContainerSpec, RuntimeError, SandboxFile, SandboxLimits};
use super::stream::{self, DecodedStreams, StreamError};

/// Working directory inside every sandbox
pub const SANDBOX_WORKDIR: &str = "/tmp";

/// Why a sandbox was stopped before it could exit on its own terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    OutOfMemory,
    OutputLimit,
}

/// Raw outcome of one sandbox run (no verdict interpretation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    NormalExit {
        streams: DecodedStreams,
        exit_code: i64,
    },
    Killed(KillReason),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to decode sandbox output: {0}")]
    Decode(#[from] StreamError),
}

pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    limits: SandboxLimits,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, limits: SandboxLimits) -> Self {
        Self { runtime, limits }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Run `command` in a fresh sandbox built from `image`, with `files`
    /// placed in the working directory.
    ///
    /// `timeout` bounds the time between container start and the end of its
    /// output stream.
    pub async fn run(
        &self,
        image: &str,
        command: Vec<String>,
        files: &[SandboxFile],
        timeout: Duration,
    ) -> Result<SandboxOutcome, SandboxError> {
        let spec = ContainerSpec {
            image: image.to_string(),
            command,
            working_dir: SANDBOX_WORKDIR.to_string(),
            limits: self.limits.clone(),
        };

        let id = self.runtime.create(&spec).await?;
        info!("Created sandbox {} from {}", short_id(&id), image);

        let guard = SandboxGuard::new(self.runtime.clone(), id);
        let outcome = self.supervise(&guard.id, files, timeout).await;
        guard.release().await;

        outcome
    }

    async fn supervise(
        &self,
        id: &str,
        files: &[SandboxFile],
        timeout: Duration,
    ) -> Result<SandboxOutcome, SandboxError> {
        self.runtime.upload(id, SANDBOX_WORKDIR, files).await?;
        self.runtime.start(id).await?;

        let mut buffer = Vec::new();
        let collected = tokio::time::timeout(
            timeout,
            collect_logs(
                self.runtime.as_ref(),
                id,
                &mut buffer,
                self.limits.output_bytes,
            ),
        )
        .await;

        let reason = match collected {
            Err(_) => {
                warn!(
                    "Sandbox {} exceeded {}ms, killing",
                    short_id(id),
                    timeout.as_millis()
                );
                Some(KillReason::Timeout)
            }
            Ok(Ok(Collected::Overflow)) => {
                warn!(
                    "Sandbox {} wrote more than {} bytes of output, killing",
                    short_id(id),
                    self.limits.output_bytes
                );
                Some(KillReason::OutputLimit)
            }
            Ok(Ok(Collected::Complete)) => None,
            Ok(Err(e)) => return Err(e.into()),
        };

        if let Some(reason) = reason {
            if let Err(e) = self.runtime.kill(id).await {
                // The container may have exited before the kill
                warn!("Failed to kill sandbox {}: {}", short_id(id), e);
            }
            return Ok(SandboxOutcome::Killed(reason));
        }

        let state = self.runtime.inspect(id).await?;
        if state.is_oom() {
            info!(
                "Sandbox {} was OOM killed (exit code {})",
                short_id(id),
                state.exit_code
            );
            return Ok(SandboxOutcome::Killed(KillReason::OutOfMemory));
        }

        let streams = stream::decode(&buffer)?;
        debug!(
            "Sandbox {} exited with code {} (stdout {} bytes, stderr {} bytes)",
            short_id(id),
            state.exit_code,
            streams.stdout.len(),
            streams.stderr.len()
        );

        Ok(SandboxOutcome::NormalExit {
            streams,
            exit_code: state.exit_code,
        })
    }
}

enum Collected {
    Complete,
    Overflow,
}

/// Append the log stream to `buffer` until it ends or exceeds `limit` bytes
async fn collect_logs(
    runtime: &dyn ContainerRuntime,
    id: &str,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> Result<Collected, RuntimeError> {
    let mut logs = runtime.attach_logs(id);
    while let Some(chunk) = logs.next().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Ok(Collected::Overflow);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Collected::Complete)
}

/// Removes the container when dropped unless it was released explicitly.
/// Covers the case where the job future is cancelled mid-run.
struct SandboxGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    released: bool,
}

impl SandboxGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, id: String) -> Self {
        Self {
            runtime,
            id,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        remove_sandbox(self.runtime.as_ref(), &self.id).await;
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_sandbox(runtime.as_ref(), &id).await;
                });
            }
            Err(_) => warn!("No runtime to remove abandoned sandbox {}", short_id(&id)),
        }
    }
}

async fn remove_sandbox(runtime: &dyn ContainerRuntime, id: &str) {
    match runtime.remove(id).await {
        Ok(()) => info!("Removed sandbox {}", short_id(id)),
        Err(e) => warn!("Failed to remove sandbox {}: {}", short_id(id), e),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeRuntime;

    fn manager(runtime: &Arc<FakeRuntime>) -> SandboxManager {
        SandboxManager::new(runtime.clone(), SandboxLimits::default())
    }

    fn command() -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), "true".into()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_exit_decodes_streams() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .stdout("hello ")
                .stderr("careful")
                .stdout("world")
                .run_for(Duration::from_millis(200)),
        );

        let outcome = manager(&runtime)
            .run("python:3.8-slim", command(), &[], Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SandboxOutcome::NormalExit {
                streams: DecodedStreams {
                    stdout: "hello world".into(),
                    stderr: "careful".into(),
                },
                exit_code: 0,
            }
        );
        assert_eq!(
            runtime.events(),
            vec!["create", "upload", "start", "inspect", "remove"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_kills_and_removes() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .stdout("partial output")
                .run_for(Duration::from_secs(30)),
        );

        let outcome = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(outcome, SandboxOutcome::Killed(KillReason::Timeout));
        assert_eq!(
            runtime.events(),
            vec!["create", "upload", "start", "kill", "remove"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oom_exit_code_wins_over_output() {
        let runtime = Arc::new(FakeRuntime::new().stdout("allocated").exit_code(137));

        let outcome = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(outcome, SandboxOutcome::Killed(KillReason::OutOfMemory));
        assert!(runtime.events().contains(&"remove"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oom_flag_detected() {
        let runtime = Arc::new(FakeRuntime::new().exit_code(1).oom_killed());

        let outcome = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(outcome, SandboxOutcome::Killed(KillReason::OutOfMemory));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_still_removes() {
        let runtime = Arc::new(FakeRuntime::new().raw_chunk(vec![1, 0, 0, 0, 0, 0, 0, 9, b'x']));

        let result = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await;

        assert!(matches!(result, Err(SandboxError::Decode(_))));
        assert_eq!(runtime.events().last(), Some(&"remove"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_still_removes() {
        let runtime = Arc::new(FakeRuntime::new().failing_start());

        let result = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await;

        assert!(matches!(result, Err(SandboxError::Runtime(_))));
        assert_eq!(runtime.events(), vec!["create", "upload", "start", "remove"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_never_starts() {
        let runtime = Arc::new(FakeRuntime::new().failing_upload());

        let result = manager(&runtime)
            .run("gcc:latest", command(), &[], Duration::from_secs(2))
            .await;

        assert!(matches!(result, Err(SandboxError::Runtime(_))));
        assert_eq!(runtime.events(), vec!["create", "upload", "remove"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_over_limit_is_killed() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .stdout(&"y\n".repeat(64))
                .stdout(&"y\n".repeat(64))
                .run_for(Duration::from_secs(30)),
        );
        let limits = SandboxLimits {
            output_bytes: 100,
            ..SandboxLimits::default()
        };

        let outcome = SandboxManager::new(runtime.clone(), limits)
            .run("python:3.8-slim", command(), &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(outcome, SandboxOutcome::Killed(KillReason::OutputLimit));
        assert_eq!(
            runtime.events(),
            vec!["create", "upload", "start", "kill", "remove"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_at_limit_is_kept() {
        let runtime = Arc::new(FakeRuntime::new().stdout("12345678"));
        let limits = SandboxLimits {
            output_bytes: 16,
            ..SandboxLimits::default()
        };

        let outcome = SandboxManager::new(runtime.clone(), limits)
            .run("python:3.8-slim", command(), &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert!(matches!(outcome, SandboxOutcome::NormalExit { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spec_carries_limits_argv_and_files() {
        let runtime = Arc::new(FakeRuntime::new());
        let limits = SandboxLimits::new(256, 1.0, 32, 1024);
        let manager = SandboxManager::new(runtime.clone(), limits.clone());
        let files = vec![
            SandboxFile::new("main.py", "print(input())"),
            SandboxFile::new("input.txt", "hi"),
        ];

        manager
            .run("python:3.8-slim", command(), &files, Duration::from_secs(1))
            .await
            .unwrap();

        let spec = runtime.last_spec().unwrap();
        assert_eq!(spec.image, "python:3.8-slim");
        assert_eq!(spec.command, command());
        assert_eq!(spec.working_dir, SANDBOX_WORKDIR);
        assert_eq!(spec.limits, limits);
        assert_eq!(
            runtime.uploaded(),
            Some((SANDBOX_WORKDIR.to_string(), files))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_removes_sandbox() {
        let runtime = Arc::new(FakeRuntime::new().run_for(Duration::from_secs(60)));
        let manager = manager(&runtime);

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            manager.run("gcc:latest", command(), &[], Duration::from_secs(30)),
        )
        .await;
        assert!(cancelled.is_err());

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(runtime.events().contains(&"remove"));
        assert!(!runtime.events().contains(&"kill"));
    }
}
