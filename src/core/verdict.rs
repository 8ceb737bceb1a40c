use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized status of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Completed,
    Tle,
    Mle,
    Error,
}

impl ExecutionStatus {
    /// The verdict a non-completed execution forces on the whole job
    pub fn failure_verdict(self) -> Option<Verdict> {
        match self {
            ExecutionStatus::Completed => None,
            ExecutionStatus::Tle => Some(Verdict::TimeLimitExceeded),
            ExecutionStatus::Mle => Some(Verdict::MemoryLimitExceeded),
            ExecutionStatus::Error => Some(Verdict::Error),
        }
    }
}

/// Result of running user code once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
}

impl ExecutionResult {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            output: output.into(),
        }
    }

    pub fn time_limit_exceeded() -> Self {
        Self {
            status: ExecutionStatus::Tle,
            output: "Time Limit Exceeded".to_string(),
        }
    }

    pub fn memory_limit_exceeded() -> Self {
        Self {
            status: ExecutionStatus::Mle,
            output: "Memory Limit Exceeded".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: ExecutionStatus::Error,
            output: if message.is_empty() {
                "Unknown Error".to_string()
            } else {
                message
            },
        }
    }
}

/// Final verdict published for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "ERROR")]
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}
