//! Execution engine
//!
//! - `stream`: multiplexed output decoding
//! - `runtime` / `docker`: container runtime seam and its Docker implementation
//! - `sandbox`: single-use sandbox lifecycle
//! - `classify`: raw outcome to execution status
//! - `executer` / `resolver`: per-language executors and lookup

pub mod classify;
pub mod docker;
pub mod executer;
pub mod resolver;
pub mod runtime;
pub mod sandbox;
pub mod stream;

#[cfg(test)]
pub mod testing;

pub use executer::{CodeExecutor, ExecutorError};
pub use resolver::ExecutorResolver;
pub use sandbox::SandboxManager;
