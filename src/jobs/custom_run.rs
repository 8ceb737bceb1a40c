//! Custom run pipeline
//!
//! Runs user code once on caller-supplied input and judges it against the
//! problem's reference solution run on the same input.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::JobError;
use crate::core::{compare_output, ExecutionStatus, Verdict};
use crate::engine::ExecutorResolver;
use crate::storage::ProblemStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRunRequest {
    pub problem_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub code: String,
    pub language: String,
    #[serde(default, alias = "inputCase")]
    pub input: String,
}

pub async fn process_custom_run(
    request: &CustomRunRequest,
    resolver: &ExecutorResolver,
    store: &dyn ProblemStore,
) -> Result<Verdict, JobError> {
    let executor = resolver
        .resolve(&request.language)
        .ok_or_else(|| JobError::UnsupportedLanguage(request.language.clone()))?;

    let user_run = executor.execute(&request.code, &request.input).await?;
    if let Some(verdict) = user_run.status.failure_verdict() {
        info!(
            "Custom run finished without reference run: problem={}, verdict={}",
            request.problem_id, verdict
        );
        return Ok(verdict);
    }

    let solution = store
        .fetch_reference_solution(&request.problem_id)
        .await
        .map_err(JobError::Fetch)?;
    let reference_executor = resolver
        .resolve(&solution.language)
        .ok_or_else(|| JobError::UnsupportedLanguage(solution.language.clone()))?;

    let reference_run = reference_executor
        .execute(&solution.code, &request.input)
        .await?;
    if reference_run.status != ExecutionStatus::Completed {
        warn!(
            "Reference solution of problem {} did not complete: {:?}: {}",
            request.problem_id, reference_run.status, reference_run.output
        );
    }

    debug!(
        "Comparing custom run output ({} bytes) with reference ({} bytes)",
        user_run.output.len(),
        reference_run.output.len()
    );

    let verdict = if compare_output(&user_run.output, &reference_run.output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    };

    info!(
        "Custom run finished: problem={}, verdict={}",
        request.problem_id, verdict
    );
    Ok(verdict)
}
