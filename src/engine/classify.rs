//! Run classification
//!
//! Maps a raw sandbox outcome onto exactly one execution status. Order of
//! precedence: timeout, out-of-memory, stderr, completion. Runaway output is
//! reported as an error.

use crate::core::ExecutionResult;

use super::runtime::OOM_EXIT_CODE;
use super::sandbox::{KillReason, SandboxError, SandboxOutcome};

pub const OUTPUT_LIMIT_MESSAGE: &str = "Output Limit Exceeded";

pub fn classify(outcome: Result<SandboxOutcome, SandboxError>) -> ExecutionResult {
    match outcome {
        Ok(SandboxOutcome::Killed(KillReason::Timeout)) => ExecutionResult::time_limit_exceeded(),
        Ok(SandboxOutcome::Killed(KillReason::OutOfMemory)) => {
            ExecutionResult::memory_limit_exceeded()
        }
        Ok(SandboxOutcome::Killed(KillReason::OutputLimit)) => {
            ExecutionResult::error(OUTPUT_LIMIT_MESSAGE)
        }
        Ok(SandboxOutcome::NormalExit { exit_code, .. }) if exit_code == OOM_EXIT_CODE => {
            ExecutionResult::memory_limit_exceeded()
        }
        // Compile and runtime failures both surface here
        Ok(SandboxOutcome::NormalExit { streams, .. }) if !streams.stderr.is_empty() => {
            ExecutionResult::error(streams.stderr)
        }
        Ok(SandboxOutcome::NormalExit { streams, .. }) => ExecutionResult::completed(streams.stdout),
        Err(e) => ExecutionResult::error(e.to_string()),
    }
}
