//! Docker-backed container runtime

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

use super::runtime::{ContainerRuntime, ContainerSpec, ExitState, RuntimeError, SandboxFile};
use super::stream::{encode_frame, STDERR, STDOUT};

/// Container runtime talking to the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local daemon and verify it answers
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

/// Pack `files` into an uncompressed tar archive, the only upload format the
/// daemon accepts.
fn build_archive(files: &[SandboxFile]) -> Result<Vec<u8>, RuntimeError> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, &file.name, file.contents.as_slice())?;
    }
    Ok(builder.into_inner()?)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(status) = update.status {
                debug!("Pull {}: {}", image, status);
            }
        }

        info!("Pulled image {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let name = format!("judge-{}", uuid::Uuid::new_v4());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(spec.limits.memory_bytes),
                memory_swap: Some(spec.limits.memory_bytes),
                nano_cpus: Some(spec.limits.nano_cpus),
                pids_limit: Some(spec.limits.pids_limit),
                network_mode: Some("none".to_string()),
                // Removal is driven by the lifecycle manager so the exit
                // state can still be inspected after the log stream ends.
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let response = match self.docker.create_container(Some(options), config).await {
            Ok(response) => response,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Err(RuntimeError::ImageNotFound(spec.image.clone())),
            Err(e) => return Err(e.into()),
        };
        debug!("Created container {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn upload(&self, id: &str, dir: &str, files: &[SandboxFile]) -> Result<(), RuntimeError> {
        let archive = build_archive(files)?;
        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    fn attach_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        // bollard already splits the frames apart; put them back on the wire
        // format so the caller keeps one ordered buffer for both streams.
        self.docker
            .logs(id, Some(options))
            .map(|item| -> Result<Vec<u8>, RuntimeError> {
                let mut frame = Vec::new();
                match item? {
                    LogOutput::StdOut { message } => encode_frame(&mut frame, STDOUT, &message),
                    LogOutput::StdErr { message } => encode_frame(&mut frame, STDERR, &message),
                    _ => {}
                }
                Ok(frame)
            })
            .boxed()
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ExitState, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = response
            .state
            .ok_or_else(|| RuntimeError::MissingState(id.to_string()))?;

        Ok(ExitState {
            exit_code: state.exit_code.unwrap_or_default(),
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }
}
