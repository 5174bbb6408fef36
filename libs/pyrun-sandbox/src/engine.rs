/// Execution Engine - Isolated, Bounded Program Execution
///
/// **Core Responsibility:**
/// Stage a synthesized program, run it under the configured containment and
/// capture raw stdout/stderr plus how the run ended.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (container runtime or host interpreter)
/// - Engine does NOT know about test cases or result markers
/// - Misbehaving programs (timeout, non-zero exit, signals) are reported as
///   data in `RawResult`, never as errors
/// - Only infrastructure faults (staging, daemon, spawn) return `Err`
///
/// **Staging:**
/// Every run gets its own `tempfile` directory named after a fresh run id.
/// Concurrent runs never share a path, and the directory is removed when the
/// `StagedProgram` drops, on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use pyrun_common::config::{Config as AppConfig, ContainerLimits, Containment, Limits};
use pyrun_common::protocol::{self, CONTAINER_MOUNT, PROGRAM_FILE_NAME};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::synthesizer::ExecutableSource;

/// How long to wait for pipe readers after a host process was killed.
const READER_GRACE: Duration = Duration::from_millis(500);

pub const TIMEOUT_DIAGNOSTIC: &str = "[ERROR] Execution timeout - code took too long to run.";

/// Why a run did not finish cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFault {
    /// Wall-clock limit hit; the process was killed.
    Timeout { timeout_ms: u64 },
    /// Process exited on its own with a non-zero status.
    NonZeroExit { code: i64 },
    /// Process ended without an exit status (signal, lost container state).
    Crashed { reason: String },
    /// Captured output passed the configured ceiling; the process was killed.
    OutputLimit { limit_bytes: usize },
}

impl ExecutionFault {
    /// Diagnostic line appended to the user-visible output.
    pub fn diagnostic(&self) -> String {
        match self {
            ExecutionFault::Timeout { .. } => TIMEOUT_DIAGNOSTIC.to_string(),
            ExecutionFault::NonZeroExit { code: 137 } => {
                "[ERROR] Execution failed: exit code 137 (killed: likely exceeded memory limit)"
                    .to_string()
            }
            ExecutionFault::NonZeroExit { code: 139 } => {
                "[ERROR] Execution failed: exit code 139 (segmentation fault)".to_string()
            }
            ExecutionFault::NonZeroExit { code } => {
                format!("[ERROR] Execution failed: exit code {}", code)
            }
            ExecutionFault::Crashed { reason } => format!("[ERROR] Execution failed: {}", reason),
            ExecutionFault::OutputLimit { limit_bytes } => format!(
                "[ERROR] Output limit exceeded - output truncated at {} bytes.",
                limit_bytes
            ),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFault::Timeout { .. })
    }

    /// The engine killed the program rather than it ending on its own.
    pub fn was_killed(&self) -> bool {
        matches!(
            self,
            ExecutionFault::Timeout { .. } | ExecutionFault::OutputLimit { .. }
        )
    }
}

/// Raw outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub stdout: String,
    pub stderr: String,
    pub fault: Option<ExecutionFault>,
    pub execution_ms: u64,
}

impl RawResult {
    /// stdout, then stderr, then the fault diagnostic (if any). Not trimmed.
    pub fn combined_output(&self) -> String {
        let mut output = String::with_capacity(self.stdout.len() + self.stderr.len() + 80);
        output.push_str(&self.stdout);
        output.push_str(&self.stderr);
        if let Some(fault) = &self.fault {
            output.push('\n');
            output.push_str(&fault.diagnostic());
        }
        output
    }

    /// Exit status as reported by the process; 0 for a clean run, -1 when unknown.
    pub fn exit_code(&self) -> i64 {
        match &self.fault {
            None => 0,
            Some(ExecutionFault::NonZeroExit { code }) => *code,
            Some(_) => -1,
        }
    }

    fn classify_exit(code: Option<i64>) -> Option<ExecutionFault> {
        match code {
            Some(0) => None,
            Some(code) => Some(ExecutionFault::NonZeroExit { code }),
            None => Some(ExecutionFault::Crashed {
                reason: "no exit status reported".to_string(),
            }),
        }
    }
}

/// A program written to its own staging directory.
/// Dropping it deletes the directory and everything in it.
pub struct StagedProgram {
    dir: TempDir,
    program: PathBuf,
}

impl StagedProgram {
    /// Write `source` into a fresh, uniquely named directory under `root`
    /// (system temp dir when `None`).
    pub fn create(root: Option<&Path>, run_id: &Uuid, source: &str) -> Result<Self> {
        let prefix = protocol::staging_prefix(run_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).with_context(|| {
                    format!("Failed to create staging root {}", root.display())
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("Failed to create staging directory")?;

        let program = dir.path().join(PROGRAM_FILE_NAME);
        std::fs::write(&program, source)
            .with_context(|| format!("Failed to write program to {}", program.display()))?;

        open_for_container(dir.path(), &program)?;

        Ok(Self { dir, program })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

// The container may run under a different uid than the server, so the
// staging directory must be world-readable (it is mounted read-only).
#[cfg(unix)]
fn open_for_container(dir: &Path, program: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))
        .context("Failed to set staging directory permissions")?;
    std::fs::set_permissions(program, std::fs::Permissions::from_mode(0o644))
        .context("Failed to set program permissions")?;
    Ok(())
}

#[cfg(not(unix))]
fn open_for_container(_dir: &Path, _program: &Path) -> Result<()> {
    Ok(())
}

/// Executes synthesized programs under one containment strategy.
pub enum Engine {
    Container(DockerEngine),
    Host(HostEngine),
}

impl Engine {
    /// Build the engine selected by configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let staging_root = config.staging_root.clone();
        match config.containment {
            Containment::Container => {
                let engine = DockerEngine::new(config.container.clone(), staging_root)?;
                info!(
                    image = %config.container.image,
                    memory_mb = config.container.memory_mb,
                    cpus = config.container.cpus,
                    "Container containment enabled"
                );
                Ok(Engine::Container(engine))
            }
            Containment::Host => {
                warn!(
                    python = %config.host_python,
                    "Host containment enabled: programs run directly on this machine with only a \
                     timeout. Do not use with untrusted code"
                );
                Ok(Engine::Host(HostEngine::new(config.host_python.clone(), staging_root)))
            }
        }
    }

    pub fn containment(&self) -> Containment {
        match self {
            Engine::Container(_) => Containment::Container,
            Engine::Host(_) => Containment::Host,
        }
    }

    /// Stage `source`, run it under the timeout and output ceiling of `limits`, and clean up.
    pub async fn execute(&self, source: &ExecutableSource, limits: &Limits) -> Result<RawResult> {
        let run_id = Uuid::new_v4();
        let staged = StagedProgram::create(self.staging_root(), &run_id, source.as_str())?;
        debug!(run_id = %run_id, dir = %staged.dir().display(), "Program staged");

        let result = match self {
            Engine::Container(engine) => engine.run(&staged, &run_id, limits).await,
            Engine::Host(engine) => engine.run(&staged, limits).await,
        };

        drop(staged);

        if let Ok(raw) = &result {
            info!(
                run_id = %run_id,
                containment = %self.containment(),
                execution_ms = raw.execution_ms,
                timed_out = raw.fault.as_ref().is_some_and(ExecutionFault::is_timeout),
                exit_code = raw.exit_code(),
                fault = ?raw.fault,
                "Execution finished"
            );
        }
        result
    }

    fn staging_root(&self) -> Option<&Path> {
        match self {
            Engine::Container(engine) => engine.staging_root.as_deref(),
            Engine::Host(engine) => engine.staging_root.as_deref(),
        }
    }
}

/// Captured stdout and stderr of one run, capped in total size.
///
/// Both stream readers push into the same buffer; `filled` resolves once the
/// cap is hit so the supervisor can kill the program.
struct OutputBuffer {
    limit: usize,
    state: Mutex<Captured>,
    full: Notify,
}

#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    overflowed: bool,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(Captured::default()),
            full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk, keeping only what fits. Returns `false` once the cap is reached.
    fn push(&self, stream: Stream, chunk: &[u8]) -> bool {
        let mut captured = self.lock();
        if captured.overflowed {
            return false;
        }

        let room = self
            .limit
            .saturating_sub(captured.stdout.len() + captured.stderr.len());
        let take = chunk.len().min(room);
        let target = match stream {
            Stream::Stdout => &mut captured.stdout,
            Stream::Stderr => &mut captured.stderr,
        };
        target.extend_from_slice(&chunk[..take]);

        if take < chunk.len() {
            captured.overflowed = true;
            drop(captured);
            self.full.notify_one();
            return false;
        }
        true
    }

    async fn filled(&self) {
        self.full.notified().await;
    }

    fn overflowed(&self) -> bool {
        self.lock().overflowed
    }

    /// Everything captured so far.
    fn snapshot(&self) -> (String, String) {
        let captured = self.lock();
        (
            String::from_utf8_lossy(&captured.stdout).into_owned(),
            String::from_utf8_lossy(&captured.stderr).into_owned(),
        )
    }
}

/// Container cleanup guard - force-removes the container if `remove` was
/// never reached (panic, or the request future was cancelled mid-run)
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: Option<String>,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id: Some(container_id),
        }
    }

    /// Remove the container before returning and disarm the drop fallback.
    async fn remove(mut self) {
        if let Some(container_id) = self.container_id.take() {
            remove_container(self.docker, &container_id).await;
        }
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };

        // Drop cannot be async; removal runs on the runtime in the background
        let docker = self.docker.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_container(&docker, &container_id).await;
                });
            }
            Err(_) => warn!(container_id = %container_id, "No runtime left to remove container"),
        }
    }
}

async fn remove_container(docker: &Docker, container_id: &str) {
    let remove_options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };

    match docker.remove_container(container_id, Some(remove_options)).await {
        Ok(()) => debug!(container_id = %container_id, "Container removed"),
        Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
    }
}

/// Docker-based engine
///
/// **Container Rules:**
/// 1. Pulls the configured image if not present
/// 2. Memory, swap, CPU and pid ceilings from configuration
/// 3. Network disabled, read-only root filesystem, all capabilities dropped
/// 4. Only the staging directory is visible, mounted read-only
/// 5. Timeout or output flood kills the container; it is removed before `run` returns
pub struct DockerEngine {
    docker: Docker,
    limits: ContainerLimits,
    staging_root: Option<PathBuf>,
}

impl DockerEngine {
    pub fn new(limits: ContainerLimits, staging_root: Option<PathBuf>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            limits,
            staging_root,
        })
    }

    /// Ensure the image is available locally (pull on cache miss)
    async fn ensure_image(&self) -> Result<()> {
        let image = self.limits.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, staged: &StagedProgram) -> Config<String> {
        let bind = format!("{}:{}:ro", staged.dir().display(), CONTAINER_MOUNT);

        Config {
            image: Some(self.limits.image.clone()),
            cmd: Some(vec![
                self.limits.python.clone(),
                "-I".to_string(),
                "-B".to_string(),
                protocol::container_program_path(),
            ]),
            working_dir: Some(CONTAINER_MOUNT.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(self.limits.memory_bytes()),
                memory_swap: Some(self.limits.memory_bytes()),
                nano_cpus: Some(self.limits.nano_cpus()),
                pids_limit: Some(self.limits.pids_limit),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run(&self, staged: &StagedProgram, run_id: &Uuid, limits: &Limits) -> Result<RawResult> {
        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", self.limits.image))?;

        let name = protocol::container_name(run_id);
        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(staged))
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id;
        let guard = ContainerGuard::new(&self.docker, container_id.clone());

        let result = self.supervise(&container_id, limits).await;

        guard.remove().await;
        result
    }

    /// Start the container and follow it until it exits, times out or floods its output.
    async fn supervise(&self, container_id: &str, limits: &Limits) -> Result<RawResult> {
        let start_time = Instant::now();

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let capture = OutputBuffer::new(limits.max_output_bytes);

        let execution = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs = self.docker.logs(container_id, logs_options);
            while let Some(output) = logs.next().await {
                let accepted = match output {
                    Ok(LogOutput::StdOut { message }) => capture.push(Stream::Stdout, &message),
                    Ok(LogOutput::StdErr { message }) => capture.push(Stream::Stderr, &message),
                    Ok(_) => true,
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "Error reading container logs");
                        break;
                    }
                };

                if !accepted {
                    warn!(container_id = %container_id, limit_bytes = limits.max_output_bytes, "Output limit exceeded, killing container");
                    return Some(ExecutionFault::OutputLimit {
                        limit_bytes: limits.max_output_bytes,
                    });
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait = self.docker.wait_container(container_id, Some(wait_options));
            let code = match wait.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(container_id = %container_id, error = %e, "Failed to wait for container");
                    None
                }
                None => None,
            };
            RawResult::classify_exit(code)
        };

        let fault = match tokio::time::timeout(Duration::from_millis(limits.timeout_ms), execution).await {
            Ok(fault) => fault,
            Err(_) => {
                warn!(container_id = %container_id, timeout_ms = limits.timeout_ms, "Execution timed out, killing container");
                Some(ExecutionFault::Timeout {
                    timeout_ms: limits.timeout_ms,
                })
            }
        };

        if fault.as_ref().is_some_and(ExecutionFault::was_killed) {
            if let Err(e) = self
                .docker
                .kill_container(container_id, None::<KillContainerOptions<String>>)
                .await
            {
                warn!(container_id = %container_id, error = %e, "Failed to kill container");
            }
        }

        let (stdout, stderr) = capture.snapshot();
        Ok(RawResult {
            stdout,
            stderr,
            fault,
            execution_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

/// Runs the interpreter directly on the host.
///
/// Degraded mode: timeout and output ceiling are the only resource bounds, and
/// the program sees the host filesystem and network. Intended for local
/// development only.
pub struct HostEngine {
    python: String,
    staging_root: Option<PathBuf>,
}

impl HostEngine {
    pub fn new(python: String, staging_root: Option<PathBuf>) -> Self {
        Self { python, staging_root }
    }

    async fn run(&self, staged: &StagedProgram, limits: &Limits) -> Result<RawResult> {
        let mut command = tokio::process::Command::new(&self.python);
        command
            .arg("-I")
            .arg("-B")
            .arg(staged.program())
            .current_dir(staged.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so anything the program spawns can be killed with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.python))?;
        let pid = child.id();

        let start_time = Instant::now();
        let capture = Arc::new(OutputBuffer::new(limits.max_output_bytes));
        let stdout_task = tokio::spawn(pump(child.stdout.take(), capture.clone(), Stream::Stdout));
        let stderr_task = tokio::spawn(pump(child.stderr.take(), capture.clone(), Stream::Stderr));

        let fault = tokio::select! {
            status = child.wait() => {
                classify_status(status.context("Failed to wait for interpreter")?)
            }
            _ = tokio::time::sleep(Duration::from_millis(limits.timeout_ms)) => {
                warn!(timeout_ms = limits.timeout_ms, "Execution timed out, killing interpreter");
                Some(ExecutionFault::Timeout { timeout_ms: limits.timeout_ms })
            }
            _ = capture.filled() => {
                warn!(limit_bytes = limits.max_output_bytes, "Output limit exceeded, killing interpreter");
                Some(ExecutionFault::OutputLimit { limit_bytes: limits.max_output_bytes })
            }
        };
        let execution_ms = start_time.elapsed().as_millis() as u64;

        // Whatever the program left running in its group goes with it, on every path
        kill_process_group(pid);
        if fault.as_ref().is_some_and(ExecutionFault::was_killed) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill interpreter");
            }
        }

        collect(stdout_task).await;
        collect(stderr_task).await;

        // Output can overflow while the pipes drain after a normal exit
        let fault = match fault {
            Some(fault) if fault.was_killed() => Some(fault),
            _ if capture.overflowed() => Some(ExecutionFault::OutputLimit {
                limit_bytes: limits.max_output_bytes,
            }),
            other => other,
        };

        let (stdout, stderr) = capture.snapshot();
        Ok(RawResult {
            stdout,
            stderr,
            fault,
            execution_ms,
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, capture: Arc<OutputBuffer>, stream: Stream) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = vec![0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if !capture.push(stream, &chunk[..n]) {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, ?stream, "Pipe read ended with error");
                break;
            }
        }
    }
}

// Bytes already read stay in the buffer even when a reader is abandoned
async fn collect(mut task: tokio::task::JoinHandle<()>) {
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Pipe reader task failed"),
        Err(_) => {
            warn!("Pipe reader did not finish after process exit");
            task.abort();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };

    // SAFETY: killpg takes plain integers and touches no memory owned by this process
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn classify_status(status: std::process::ExitStatus) -> Option<ExecutionFault> {
    if let Some(code) = status.code() {
        return RawResult::classify_exit(Some(code as i64));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(ExecutionFault::Crashed {
                reason: format!("terminated by signal {}", signal),
            });
        }
    }

    RawResult::classify_exit(None)
}
