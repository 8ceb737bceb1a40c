//! In-memory doubles for the job seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::JobQueue;
use crate::core::ExecutionResult;
use crate::engine::{CodeExecutor, ExecutorError};
use crate::storage::{ProblemStore, ReferenceSolution, TestCase};

type ExecFn = dyn Fn(&str, &str) -> ExecutionResult + Send + Sync;

/// Executor answering from a closure over `(code, stdin)`
pub struct FnExecutor {
    run: Box<ExecFn>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FnExecutor {
    pub fn new<F>(run: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> ExecutionResult + Send + Sync + 'static,
    {
        Arc::new(Self::build(run, None))
    }

    /// Like `new`, but every execution takes `delay`
    pub fn slow<F>(delay: Duration, run: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> ExecutionResult + Send + Sync + 'static,
    {
        Arc::new(Self::build(run, Some(delay)))
    }

    fn build<F>(run: F, delay: Option<Duration>) -> Self
    where
        F: Fn(&str, &str) -> ExecutionResult + Send + Sync + 'static,
    {
        Self {
            run: Box::new(run),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_dyn(self: &Arc<Self>) -> Arc<dyn CodeExecutor> {
        self.clone()
    }

    /// Highest number of executions seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeExecutor for FnExecutor {
    async fn execute(&self, code: &str, stdin: &str) -> Result<ExecutionResult, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.run)(code, stdin);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// Problem store holding one problem's data
#[derive(Default)]
pub struct FakeStore {
    solution: Option<ReferenceSolution>,
    test_cases: Option<Vec<TestCase>>,
    solution_fetches: AtomicUsize,
    test_case_fetches: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solution(mut self, language: &str, code: &str) -> Self {
        self.solution = Some(ReferenceSolution {
            language: language.to_string(),
            code: code.to_string(),
        });
        self
    }

    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = Some(test_cases);
        self
    }

    pub fn solution_fetches(&self) -> usize {
        self.solution_fetches.load(Ordering::SeqCst)
    }

    pub fn test_case_fetches(&self) -> usize {
        self.test_case_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProblemStore for FakeStore {
    async fn fetch_reference_solution(&self, problem_id: &str) -> Result<ReferenceSolution> {
        self.solution_fetches.fetch_add(1, Ordering::SeqCst);
        self.solution
            .clone()
            .ok_or_else(|| anyhow!("no reference solution for problem {}", problem_id))
    }

    async fn fetch_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>> {
        self.test_case_fetches.fetch_add(1, Ordering::SeqCst);
        self.test_cases
            .clone()
            .ok_or_else(|| anyhow!("no test cases for problem {}", problem_id))
    }
}

/// Queue with a preloaded inbox; `dequeue` stays pending once it is empty
#[derive(Default)]
pub struct FakeQueue {
    inbox: Mutex<VecDeque<(String, String)>>,
    published: Mutex<Vec<(String, Value)>>,
    fail_publish: bool,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(self, queue: &str, payload: &str) -> Self {
        self.inbox
            .lock()
            .unwrap()
            .push_back((queue.to_string(), payload.to_string()));
        self
    }

    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn pending(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn dequeue(&self, queues: &[&str]) -> Result<(String, String)> {
        let next = {
            let mut inbox = self.inbox.lock().unwrap();
            let position = inbox
                .iter()
                .position(|(queue, _)| queues.contains(&queue.as_str()));
            position.and_then(|i| inbox.remove(i))
        };

        match next {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    async fn enqueue(&self, queue: &str, payload: &str) -> Result<()> {
        if self.fail_publish {
            bail!("connection reset by peer");
        }
        let value: Value = serde_json::from_str(payload)?;
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), value));
        Ok(())
    }
}
