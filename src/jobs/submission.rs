//! Submission pipeline
//!
//! Runs user code over the problem's stored test cases, in order, stopping
//! at the first case that does not pass.

use serde::Deserialize;
use tracing::{info, warn};

use super::JobError;
use crate::core::{compare_output, Verdict};
use crate::engine::ExecutorResolver;
use crate::storage::ProblemStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub problem_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub code: String,
    pub language: String,
}

pub async fn process_submission(
    request: &SubmissionRequest,
    resolver: &ExecutorResolver,
    store: &dyn ProblemStore,
) -> Result<Verdict, JobError> {
    let executor = resolver
        .resolve(&request.language)
        .ok_or_else(|| JobError::UnsupportedLanguage(request.language.clone()))?;

    let test_cases = store
        .fetch_test_cases(&request.problem_id)
        .await
        .map_err(JobError::Fetch)?;

    if test_cases.is_empty() {
        warn!(
            "Problem {} has no test cases, accepting submission",
            request.problem_id
        );
    }

    let mut verdict = Verdict::Accepted;
    let mut passed = 0usize;

    for tc in test_cases.iter() {
        let run = executor.execute(&request.code, &tc.input).await?;

        if let Some(failure) = run.status.failure_verdict() {
            verdict = failure;
            break;
        }
        if !compare_output(&run.output, &tc.output) {
            verdict = Verdict::WrongAnswer;
            break;
        }
        passed += 1;
    }

    info!(
        "Submission summary: problem={}, verdict={}, passed={}/{}",
        request.problem_id,
        verdict,
        passed,
        test_cases.len()
    );

    Ok(verdict)
}
