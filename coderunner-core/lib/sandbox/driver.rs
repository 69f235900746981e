//! Typed wrapper over the container engine.
//!
//! This module isolates all engine specifics behind a small contract:
//! - Build an ephemeral per-request image from a rendered build context
//! - Create containers under the mandatory security profile
//! - Attach the multiplexed stream (always before start)
//! - Start, stop, wait, and tear down containers and images
//!
//! Errors from the teardown half are logged and never mask an execution
//! result.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptions, BuildImageOptions, CreateContainerOptions, LogsOptions,
    RemoveContainerOptions, RemoveImageOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::io::AsyncWrite;

use crate::sandbox::{frame_from_log, Frame};
use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Unprivileged user every sandbox image must expose.
pub const SANDBOX_USER: &str = "coderunner";

/// Directory ephemeral images bake source files into.
pub const SANDBOX_CODE_DIR: &str = "/code";

/// Filename the optional stdin text is baked in under.
pub const INPUT_FILENAME: &str = "input.txt";

const NANO_CPUS: i64 = 1_000_000_000;
const PIDS_LIMIT: i64 = 50;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Per-container knobs layered on top of the mandatory security profile.
#[derive(Debug, Clone, Default)]
pub struct ContainerOpts {
    /// Hard memory limit in bytes, also applied as the swap ceiling.
    pub memory_limit: i64,

    /// Keep stdin open for interactive input.
    pub open_stdin: bool,

    /// Attach stdin on the multiplexed stream.
    pub attach_stdin: bool,

    /// Working directory inside the container.
    pub working_dir: Option<String>,

    /// Bind mounts in `host:container` form.
    pub binds: Option<Vec<String>>,
}

/// Exit record of a finished container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process exit code as reported by the engine.
    pub code: i64,
}

/// The bidirectional stream attached to a container.
///
/// `output` yields demultiplexed frames in engine order; `input` is the
/// write half feeding the sandboxed process's stdin. Dropping `input` (or
/// shutting it down) closes the process's stdin.
pub struct AttachedStream {
    /// Demultiplexed output frames.
    pub output:
        Pin<Box<dyn futures_util::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>,

    /// Write half feeding the sandbox stdin.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Thin typed wrapper over the container engine socket.
#[derive(Clone)]
pub struct SandboxDriver {
    docker: Docker,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl ExitStatus {
    /// Whether the process exited cleanly.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl SandboxDriver {
    /// Connect to the local container engine.
    pub fn connect() -> CoderunnerResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Probe the engine socket.
    pub async fn ping(&self) -> CoderunnerResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Build an ephemeral image layering the work directory's source file
    /// (and `input.txt` when `include_input` is set) onto `base_image`.
    ///
    /// The image copies the files into `/code`, sets `/code` as the working
    /// directory, and runs as the unprivileged `coderunner` user. Fails with
    /// [`CoderunnerError::BuildFailed`] on toolchain errors.
    pub async fn build_ephemeral_image(
        &self,
        work_dir: &Path,
        image_tag: &str,
        base_image: &str,
        source_filename: &str,
        include_input: bool,
    ) -> CoderunnerResult<String> {
        let dockerfile = render_dockerfile(base_image, source_filename, include_input);
        let context = build_context(work_dir, &dockerfile, source_filename, include_input).await?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: Some(image_tag.to_string()),
            rm: true,
            ..Default::default()
        };

        let mut stream =
            self.docker
                .build_image(options, None, Some(bollard::body_full(context.into())));

        while let Some(message) = stream.next().await {
            let info = message.map_err(|e| CoderunnerError::BuildFailed(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(CoderunnerError::BuildFailed(error));
            }
            if let Some(line) = info.stream {
                tracing::debug!("build {}: {}", image_tag, line.trim_end());
            }
        }

        Ok(image_tag.to_string())
    }

    /// Create a container under the mandatory security profile.
    pub async fn create_container(
        &self,
        name: &str,
        image: &str,
        cmd: Vec<String>,
        opts: &ContainerOpts,
    ) -> CoderunnerResult<String> {
        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: Some(cmd),
            working_dir: opts.working_dir.clone(),
            attach_stdin: Some(opts.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(opts.open_stdin),
            stdin_once: Some(false),
            tty: Some(false),
            host_config: Some(security_profile(opts)),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        });

        let created = self
            .docker
            .create_container(options, body)
            .await
            .map_err(|e| CoderunnerError::SandboxStartFailed(e.to_string()))?;

        Ok(created.id)
    }

    /// Attach the multiplexed stream. Must be called before
    /// [`SandboxDriver::start`] so output from fast-exiting programs is not
    /// lost.
    pub async fn attach(&self, container_id: &str) -> CoderunnerResult<AttachedStream> {
        let results = self
            .docker
            .attach_container(
                container_id,
                Some(AttachContainerOptions {
                    stream: true,
                    stdin: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| CoderunnerError::SandboxStartFailed(e.to_string()))?;

        Ok(AttachedStream {
            output: results.output,
            input: results.input,
        })
    }

    /// Start a created container.
    pub async fn start(&self, container_id: &str) -> CoderunnerResult<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| CoderunnerError::SandboxStartFailed(e.to_string()))?;
        Ok(())
    }

    /// Force-stop a container: SIGTERM, then SIGKILL after the grace period.
    /// Best-effort; failures are logged.
    pub async fn stop(&self, container_id: &str, grace: Duration) {
        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            ..Default::default()
        };
        if let Err(e) = self.docker.stop_container(container_id, Some(options)).await {
            tracing::warn!("failed to stop container {}: {}", container_id, e);
        }
    }

    /// Wait for a container to exit and return its exit record.
    pub async fn wait(&self, container_id: &str) -> CoderunnerResult<ExitStatus> {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions>);

        match stream.next().await {
            Some(Ok(response)) => Ok(ExitStatus {
                code: response.status_code,
            }),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(ExitStatus { code })
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(CoderunnerError::SandboxStartFailed(
                "wait stream ended before an exit record".to_string(),
            )),
        }
    }

    /// Read the complete log blob of an exited container as demultiplexed
    /// frames. A stream error mid-read yields the frames read so far with a
    /// warning, so batch callers still get partial output.
    pub async fn bulk_logs(&self, container_id: &str) -> Vec<Frame> {
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut frames = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => {
                    if let Some(frame) = frame_from_log(output) {
                        frames.push(frame);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "log stream for container {} ended early: {}",
                        container_id,
                        e
                    );
                    break;
                }
            }
        }

        frames
    }

    /// Remove a container. Best-effort; failures are logged.
    pub async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            tracing::warn!("failed to remove container {}: {}", container_id, e);
        }
    }

    /// Remove an ephemeral image. Best-effort; failures are logged.
    pub async fn remove_image(&self, image: &str) {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_image(image, Some(options), None).await {
            tracing::warn!("failed to remove image {}: {}", image, e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// The mandatory security profile every sandbox runs under.
fn security_profile(opts: &ContainerOpts) -> HostConfig {
    HostConfig {
        memory: Some(opts.memory_limit),
        memory_swap: Some(opts.memory_limit),
        nano_cpus: Some(NANO_CPUS),
        pids_limit: Some(PIDS_LIMIT),
        network_mode: Some("none".to_string()),
        privileged: Some(false),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        cap_drop: Some(vec!["ALL".to_string()]),
        binds: opts.binds.clone(),
        ..Default::default()
    }
}

fn render_dockerfile(base_image: &str, source_filename: &str, include_input: bool) -> String {
    let mut dockerfile = format!(
        "FROM {base}\nCOPY {source} {dir}/{source}\n",
        base = base_image,
        source = source_filename,
        dir = SANDBOX_CODE_DIR,
    );
    if include_input {
        dockerfile.push_str(&format!(
            "COPY {input} {dir}/{input}\n",
            input = INPUT_FILENAME,
            dir = SANDBOX_CODE_DIR,
        ));
    }
    dockerfile.push_str(&format!(
        "WORKDIR {dir}\nUSER {user}\n",
        dir = SANDBOX_CODE_DIR,
        user = SANDBOX_USER,
    ));
    dockerfile
}

async fn build_context(
    work_dir: &Path,
    dockerfile: &str,
    source_filename: &str,
    include_input: bool,
) -> CoderunnerResult<Vec<u8>> {
    let mut context = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut context);
        append_entry(&mut builder, "Dockerfile", dockerfile.as_bytes())?;

        let source = tokio::fs::read(work_dir.join(source_filename)).await?;
        append_entry(&mut builder, source_filename, &source)?;

        if include_input {
            let input = tokio::fs::read(work_dir.join(INPUT_FILENAME)).await?;
            append_entry(&mut builder, INPUT_FILENAME, &input)?;
        }

        builder.finish()?;
    }
    Ok(context)
}

fn append_entry(
    builder: &mut tar::Builder<&mut Vec<u8>>,
    name: &str,
    contents: &[u8],
) -> CoderunnerResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, contents)?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Read;

    use super::*;

    #[test]
    fn security_profile_is_mandatory_and_complete() {
        let opts = ContainerOpts {
            memory_limit: 100 * 1024 * 1024,
            ..Default::default()
        };

        let profile = security_profile(&opts);

        assert_eq!(profile.memory, Some(100 * 1024 * 1024));
        assert_eq!(profile.memory_swap, profile.memory);
        assert_eq!(profile.nano_cpus, Some(1_000_000_000));
        assert_eq!(profile.pids_limit, Some(50));
        assert_eq!(profile.network_mode.as_deref(), Some("none"));
        assert_eq!(profile.privileged, Some(false));
        assert_eq!(
            profile.security_opt,
            Some(vec!["no-new-privileges".to_string()])
        );
        assert_eq!(profile.cap_drop, Some(vec!["ALL".to_string()]));
    }

    #[test]
    fn dockerfile_bakes_source_under_the_sandbox_user() {
        let dockerfile = render_dockerfile("coderunner-python", "script.py", false);

        assert!(dockerfile.starts_with("FROM coderunner-python\n"));
        assert!(dockerfile.contains("COPY script.py /code/script.py"));
        assert!(!dockerfile.contains("input.txt"));
        assert!(dockerfile.contains("WORKDIR /code"));
        assert!(dockerfile.ends_with("USER coderunner\n"));
    }

    #[test]
    fn dockerfile_includes_input_only_when_asked() {
        let dockerfile = render_dockerfile("coderunner-python", "script.py", true);

        assert!(dockerfile.contains("COPY input.txt /code/input.txt"));
    }

    #[tokio::test]
    async fn build_context_archives_every_expected_entry() {
        let work_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(work_dir.path().join("script.py"), "print(input())")
            .await
            .unwrap();
        tokio::fs::write(work_dir.path().join(INPUT_FILENAME), "abc\n")
            .await
            .unwrap();

        let dockerfile = render_dockerfile("coderunner-python", "script.py", true);
        let context = build_context(work_dir.path(), &dockerfile, "script.py", true)
            .await
            .unwrap();

        let mut archive = tar::Archive::new(std::io::Cursor::new(context));
        let mut entries = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            entries.insert(name, contents);
        }

        assert_eq!(entries["Dockerfile"], dockerfile);
        assert_eq!(entries["script.py"], "print(input())");
        assert_eq!(entries[INPUT_FILENAME], "abc\n");
    }

    #[tokio::test]
    async fn build_context_fails_on_a_missing_source_file() {
        let work_dir = tempfile::tempdir().unwrap();

        let result = build_context(work_dir.path(), "FROM x", "script.py", false).await;

        assert!(matches!(result, Err(CoderunnerError::Io(_))));
    }
}
