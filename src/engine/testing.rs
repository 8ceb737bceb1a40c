//! Scripted container runtime for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use super::runtime::{ContainerRuntime, ContainerSpec, ExitState, RuntimeError, SandboxFile};
use super::stream::{encode_frame, STDERR, STDOUT};

pub struct FakeRuntime {
    chunks: Vec<Vec<u8>>,
    run_for: Duration,
    exit_state: ExitState,
    fail_start: bool,
    fail_upload: bool,
    fail_pull: bool,
    fail_create: AtomicUsize,
    image_present: AtomicBool,
    pulls: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
    last_spec: Mutex<Option<ContainerSpec>>,
    uploaded: Mutex<Option<(String, Vec<SandboxFile>)>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            run_for: Duration::ZERO,
            exit_state: ExitState {
                exit_code: 0,
                oom_killed: false,
            },
            fail_start: false,
            fail_upload: false,
            fail_pull: false,
            fail_create: AtomicUsize::new(0),
            image_present: AtomicBool::new(true),
            pulls: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            last_spec: Mutex::new(None),
            uploaded: Mutex::new(None),
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        let mut frame = Vec::new();
        encode_frame(&mut frame, STDOUT, text.as_bytes());
        self.chunks.push(frame);
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        let mut frame = Vec::new();
        encode_frame(&mut frame, STDERR, text.as_bytes());
        self.chunks.push(frame);
        self
    }

    pub fn raw_chunk(mut self, chunk: Vec<u8>) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// How long the container keeps its log stream open
    pub fn run_for(mut self, duration: Duration) -> Self {
        self.run_for = duration;
        self
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_state.exit_code = code;
        self
    }

    pub fn oom_killed(mut self) -> Self {
        self.exit_state.oom_killed = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// The next `times` creates fail as if the image had been removed
    pub fn image_vanishes(self, times: usize) -> Self {
        self.fail_create.store(times, Ordering::SeqCst);
        self
    }

    pub fn missing_image(self) -> Self {
        self.image_present.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.last_spec.lock().unwrap().clone()
    }

    pub fn uploaded(&self) -> Option<(String, Vec<SandboxFile>)> {
        self.uploaded.lock().unwrap().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, _image: &str) -> Result<bool, RuntimeError> {
        Ok(self.image_present.load(Ordering::SeqCst))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_pull {
            return Err(RuntimeError::Other(format!("pull access denied for {}", image)));
        }
        self.image_present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record("create");
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        let vanished = self
            .fail_create
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if vanished {
            self.image_present.store(false, Ordering::SeqCst);
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        Ok("fake-container".to_string())
    }

    async fn upload(&self, _id: &str, dir: &str, files: &[SandboxFile]) -> Result<(), RuntimeError> {
        self.record("upload");
        *self.uploaded.lock().unwrap() = Some((dir.to_string(), files.to_vec()));
        if self.fail_upload {
            return Err(RuntimeError::Other("cannot copy into container".into()));
        }
        Ok(())
    }

    async fn start(&self, _id: &str) -> Result<(), RuntimeError> {
        self.record("start");
        if self.fail_start {
            return Err(RuntimeError::Other("cannot start container".into()));
        }
        Ok(())
    }

    fn attach_logs<'a>(&'a self, _id: &'a str) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>> {
        let run_for = self.run_for;
        stream::iter(self.chunks.clone().into_iter().map(Ok))
            .chain(stream::once(async move {
                tokio::time::sleep(run_for).await;
                Ok(Vec::new())
            }))
            .boxed()
    }

    async fn kill(&self, _id: &str) -> Result<(), RuntimeError> {
        self.record("kill");
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<(), RuntimeError> {
        self.record("remove");
        Ok(())
    }

    async fn inspect(&self, _id: &str) -> Result<ExitState, RuntimeError> {
        self.record("inspect");
        Ok(self.exit_state)
    }
}
