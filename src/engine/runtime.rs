//! Container runtime abstraction
//!
//! The sandbox lifecycle manager only talks to this trait. `DockerRuntime`
//! is the production implementation; tests provide scripted fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Exit code the kernel OOM killer leaves behind (128 + SIGKILL)
pub const OOM_EXIT_CODE: i64 = 137;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("failed to build sandbox archive: {0}")]
    Archive(#[from] std::io::Error),

    /// The image disappeared between the availability check and create
    #[error("image {0} is not present")]
    ImageNotFound(String),

    #[error("container {0} has no exit state")]
    MissingState(String),

    #[error("{0}")]
    Other(String),
}

/// Resource limits applied to every sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    /// Hard memory ceiling in bytes (swap included)
    pub memory_bytes: i64,
    /// CPU share in units of 1e-9 CPUs
    pub nano_cpus: i64,
    /// Maximum number of processes
    pub pids_limit: i64,
    /// Ceiling on collected output, stdout and stderr together
    pub output_bytes: usize,
}

impl SandboxLimits {
    pub fn new(memory_mb: u32, cpus: f64, pids_limit: u32, output_kb: u32) -> Self {
        Self {
            memory_bytes: memory_mb as i64 * 1024 * 1024,
            nano_cpus: (cpus * 1_000_000_000.0) as i64,
            pids_limit: pids_limit as i64,
            output_bytes: output_kb as usize * 1024,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::new(1024, 0.5, 64, 16 * 1024)
    }
}

/// A file placed in the sandbox working directory before start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxFile {
    /// Path relative to the working directory
    pub name: String,
    pub contents: Vec<u8>,
}

impl SandboxFile {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Everything needed to create one sandbox
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    /// Argument vector, never passed through a host shell
    pub command: Vec<String>,
    pub working_dir: String,
    pub limits: SandboxLimits,
}

/// Terminal state of an exited container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    pub exit_code: i64,
    pub oom_killed: bool,
}

impl ExitState {
    pub fn is_oom(&self) -> bool {
        self.oom_killed || self.exit_code == OOM_EXIT_CODE
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a sandbox and return its id. Network is always disabled.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Copy `files` into directory `dir` of a created, not yet started, sandbox
    async fn upload(&self, id: &str, dir: &str, files: &[SandboxFile]) -> Result<(), RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Follow the combined output as multiplexed frames. The stream ends when
    /// the container exits.
    fn attach_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>>;

    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ExitState, RuntimeError>;
}
