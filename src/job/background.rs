//! Long-running subprocess management.
//!
//! [`BackgroundJob`] spawns a child process in its own process group, pumps
//! stdout and stderr into retained buffers while broadcasting every chunk to
//! live subscribers, and tracks the child until it is reaped. Device log
//! streamers, packet captures and traffic generators all run through it; the
//! one-shot [`crate::job::run`] is a spawn followed by an immediate wait.
//!
//! # Lifecycle
//!
//! ```text
//! spawn() ──> pumps (stdout/stderr) ──> RetainedBuffer + broadcast
//!        └──> monitor task ──> child.wait() ──> JobOutput
//! ```
//!
//! The monitor task owns the child. Wall-clock timeouts, [`BackgroundJob::stop`]
//! and [`Drop`] all signal the process group from outside, so children that
//! fork their own helpers (shell pipelines, `logcat` wrappers) die with their
//! parent instead of surviving as orphans.
//!
//! A slow subscriber on [`BackgroundJob::output_channel`] never blocks the
//! pumps; the broadcast channel drops its oldest chunks and the receiver sees
//! a `Lagged` error instead.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::command::{CommandLine, JobSpec, StdinSource, SHELL};
use super::output::{JobOutput, JobSnapshot, OutputChunk, RetainedBuffer, StreamKind};
use super::OUTPUT_CHANNEL_CAPACITY;
use crate::error::{AppResult, HilError};

const READ_CHUNK_SIZE: usize = 8192;

/// State shared between the job handle and its pump/monitor tasks.
#[derive(Debug)]
struct JobShared {
    stdout: Mutex<RetainedBuffer>,
    stderr: Mutex<RetainedBuffer>,
    running: AtomicBool,
}

fn lock_buffer(buffer: &Mutex<RetainedBuffer>) -> MutexGuard<'_, RetainedBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sends a signal to a whole process group, ignoring already-gone groups.
fn kill_group(pid: i32, signal: Signal) {
    if pid <= 0 {
        return;
    }
    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(error) => tracing::warn!(pid, signal = ?signal, %error, "failed to signal process group"),
    }
}

/// Handle to a subprocess running in the background.
///
/// Dropping a still-running job kills its process group.
#[derive(Debug)]
pub struct BackgroundJob {
    id: Uuid,
    command: String,
    pid: i32,
    check: bool,
    stop_grace: Duration,
    stdin: Option<ChildStdin>,
    shared: Arc<JobShared>,
    output_tx: broadcast::Sender<OutputChunk>,
    monitor: Option<JoinHandle<AppResult<JobOutput>>>,
    result: Option<JobOutput>,
}

impl BackgroundJob {
    /// Spawns the specified job and starts pumping its output.
    ///
    /// The child is placed in its own process group so that timeouts and
    /// [`BackgroundJob::stop`] can take down any grandchildren it forks.
    /// Fails with [`HilError::Spawn`] when the program cannot be started and
    /// with [`HilError::Configuration`] for an empty exec argv.
    pub async fn spawn(spec: JobSpec) -> AppResult<Self> {
        let JobSpec {
            command,
            env,
            cwd,
            stdin,
            timeout,
            retention_limit,
            stop_grace,
            check,
        } = spec;

        let command_display = command.display();
        let program = command.program();

        let mut cmd = match &command {
            CommandLine::Shell(line) => {
                let mut c = Command::new(SHELL);
                c.arg("-c").arg(line);
                c
            }
            CommandLine::Exec(argv) => {
                let (first, rest) = argv.split_first().ok_or_else(|| {
                    HilError::Configuration("exec command line is empty".to_string())
                })?;
                let mut c = Command::new(first);
                c.args(rest);
                c
            }
        };

        for (key, value) in &env {
            cmd.env(key, value);
        }
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }

        let stdin_cfg = match &stdin {
            StdinSource::Null => Stdio::null(),
            _ => Stdio::piped(),
        };
        cmd.stdin(stdin_cfg)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        // Open a stdin file before spawning so a bad path fails the call
        // instead of surfacing as a half-started job.
        let stdin_file = match &stdin {
            StdinSource::File(path) => Some(tokio::fs::File::open(path).await?),
            _ => None,
        };

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| HilError::Spawn { program, source })?;
        let pid = child.id().map(|p| p as i32).unwrap_or(-1);
        let id = Uuid::new_v4();
        tracing::debug!(job_id = %id, pid, command = %command_display, "spawned job");

        let shared = Arc::new(JobShared {
            stdout: Mutex::new(RetainedBuffer::new(retention_limit)),
            stderr: Mutex::new(RetainedBuffer::new(retention_limit)),
            running: AtomicBool::new(true),
        });
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);

        let mut pumps = Vec::with_capacity(2);
        if let Some(stream) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_stream(
                StreamKind::Stdout,
                stream,
                Arc::clone(&shared),
                output_tx.clone(),
            )));
        }
        if let Some(stream) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_stream(
                StreamKind::Stderr,
                stream,
                Arc::clone(&shared),
                output_tx.clone(),
            )));
        }

        let mut stdin_pipe = child.stdin.take();
        let interactive = match stdin {
            StdinSource::Null => None,
            StdinSource::Piped => stdin_pipe.take(),
            StdinSource::Bytes(payload) => {
                if let Some(mut pipe) = stdin_pipe.take() {
                    tokio::spawn(async move {
                        if let Err(error) = pipe.write_all(&payload).await {
                            tracing::debug!(%error, "stdin write ended early");
                        }
                        let _ = pipe.shutdown().await;
                    });
                }
                None
            }
            StdinSource::File(_) => {
                if let (Some(mut pipe), Some(mut file)) = (stdin_pipe.take(), stdin_file) {
                    tokio::spawn(async move {
                        if let Err(error) = tokio::io::copy(&mut file, &mut pipe).await {
                            tracing::debug!(%error, "stdin stream ended early");
                        }
                        let _ = pipe.shutdown().await;
                    });
                }
                None
            }
        };

        let monitor = tokio::spawn(monitor_child(
            child,
            pid,
            timeout,
            command_display.clone(),
            Arc::clone(&shared),
            pumps,
            started,
            id,
        ));

        Ok(Self {
            id,
            command: command_display,
            pid,
            check,
            stop_grace,
            stdin: interactive,
            shared,
            output_tx,
            monitor: Some(monitor),
            result: None,
        })
    }

    /// Unique id assigned at spawn, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Display form of the command this job runs.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the direct child.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// True while the child has not been reaped.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Subscribes to the live output stream.
    ///
    /// Every subscriber sees every chunk in write order, subject to the
    /// channel's lag semantics for receivers that fall too far behind.
    pub fn output_channel(&self) -> broadcast::Receiver<OutputChunk> {
        self.output_tx.subscribe()
    }

    /// Copies out whatever output has been retained so far.
    pub fn snapshot(&self) -> JobSnapshot {
        let (stdout, stdout_truncated) = lock_buffer(&self.shared.stdout).contents();
        let (stderr, stderr_truncated) = lock_buffer(&self.shared.stderr).contents();
        JobSnapshot {
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            running: self.is_running(),
        }
    }

    /// Writes to the child's stdin.
    ///
    /// Only available when the job was spawned with
    /// [`JobSpec::with_stdin_piped`]; otherwise fails with
    /// [`HilError::StdinUnavailable`].
    pub async fn write_stdin(&mut self, data: &[u8]) -> AppResult<()> {
        let pipe = self.stdin.as_mut().ok_or(HilError::StdinUnavailable)?;
        pipe.write_all(data).await?;
        pipe.flush().await?;
        Ok(())
    }

    /// Closes the child's stdin so it observes EOF.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Waits for the job to finish and applies the [`JobSpec`] exit policy.
    ///
    /// A timed-out job yields [`HilError::CommandTimeout`]; a non-zero exit
    /// yields [`HilError::CommandFailed`] unless the job was built with
    /// [`JobSpec::unchecked`]. Both errors carry the captured output.
    pub async fn wait(&mut self) -> AppResult<JobOutput> {
        let output = self.wait_raw().await?;
        self.finish(output)
    }

    /// Waits up to `limit` for the job to finish.
    ///
    /// Returns `Ok(None)` when the job is still running after the limit; the
    /// job keeps running and can be waited on again.
    pub async fn wait_timeout(&mut self, limit: Duration) -> AppResult<Option<JobOutput>> {
        match self.wait_for_exit(limit).await? {
            Some(output) => self.finish(output).map(Some),
            None => Ok(None),
        }
    }

    /// Stops the job: SIGTERM, a grace period, then SIGKILL.
    ///
    /// Returns the final output without applying the exit policy, since a
    /// deliberately stopped job usually dies from the signal.
    pub async fn stop(&mut self) -> AppResult<JobOutput> {
        if let Some(output) = self.result.clone() {
            return Ok(output);
        }
        self.close_stdin();
        tracing::debug!(job_id = %self.id, pid = self.pid, "stopping job");
        kill_group(self.pid, Signal::SIGTERM);
        if let Some(output) = self.wait_for_exit(self.stop_grace).await? {
            return Ok(output);
        }
        tracing::warn!(
            job_id = %self.id,
            grace = ?self.stop_grace,
            "job ignored SIGTERM, escalating to SIGKILL"
        );
        kill_group(self.pid, Signal::SIGKILL);
        self.wait_raw().await
    }

    // Awaits through `&mut` so a caller cancelled mid-wait (a `select!`
    // branch losing) leaves the monitor handle in place for the next call.
    async fn wait_raw(&mut self) -> AppResult<JobOutput> {
        if let Some(output) = &self.result {
            return Ok(output.clone());
        }
        let monitor = self
            .monitor
            .as_mut()
            .ok_or_else(|| HilError::TaskFailure("job monitor already consumed".to_string()))?;
        let joined = monitor.await;
        self.monitor = None;
        let output = joined
            .map_err(|e| HilError::TaskFailure(format!("job monitor panicked: {e}")))??;
        self.result = Some(output.clone());
        Ok(output)
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> AppResult<Option<JobOutput>> {
        if self.result.is_some() {
            return Ok(self.result.clone());
        }
        let monitor = self
            .monitor
            .as_mut()
            .ok_or_else(|| HilError::TaskFailure("job monitor already consumed".to_string()))?;
        let poll = tokio::time::timeout(limit, monitor).await;
        match poll {
            Err(_) => Ok(None),
            Ok(joined) => {
                self.monitor = None;
                let output = joined
                    .map_err(|e| HilError::TaskFailure(format!("job monitor panicked: {e}")))??;
                self.result = Some(output.clone());
                Ok(Some(output))
            }
        }
    }

    fn finish(&self, output: JobOutput) -> AppResult<JobOutput> {
        if output.timed_out {
            return Err(HilError::CommandTimeout(Box::new(output)));
        }
        if self.check && !output.success() {
            return Err(HilError::CommandFailed(Box::new(output)));
        }
        Ok(output)
    }
}

impl Drop for BackgroundJob {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::debug!(job_id = %self.id, pid = self.pid, "dropping running job, killing process group");
            kill_group(self.pid, Signal::SIGKILL);
        }
    }
}

/// Reads one stream to EOF, retaining and broadcasting each chunk.
async fn pump_stream<R>(
    kind: StreamKind,
    mut reader: R,
    shared: Arc<JobShared>,
    tx: broadcast::Sender<OutputChunk>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        buf.reserve(READ_CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let data: Bytes = buf.split().freeze();
                match kind {
                    StreamKind::Stdout => lock_buffer(&shared.stdout).push(&data),
                    StreamKind::Stderr => lock_buffer(&shared.stderr).push(&data),
                }
                // A send error only means nobody is subscribed right now.
                let _ = tx.send(OutputChunk { stream: kind, data });
            }
            Err(error) => {
                tracing::debug!(stream = kind.as_str(), %error, "output stream closed");
                break;
            }
        }
    }
}

/// Owns the child: waits for exit, enforcing the wall-clock limit.
#[allow(clippy::too_many_arguments)]
async fn monitor_child(
    mut child: Child,
    pid: i32,
    timeout: Option<Duration>,
    command: String,
    shared: Arc<JobShared>,
    pumps: Vec<JoinHandle<()>>,
    started: Instant,
    id: Uuid,
) -> AppResult<JobOutput> {
    let wait_result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(res) => res.map(|status| (status, false)),
            Err(_) => {
                tracing::warn!(
                    job_id = %id,
                    limit = ?limit,
                    "job exceeded wall-clock limit, killing process group"
                );
                kill_group(pid, Signal::SIGKILL);
                child.wait().await.map(|status| (status, true))
            }
        },
        None => child.wait().await.map(|status| (status, false)),
    };

    // Pumps end on their own once the child side of each pipe closes.
    for pump in pumps {
        let _ = pump.await;
    }
    shared.running.store(false, Ordering::Release);

    let (status, timed_out) = wait_result?;
    let (stdout, stdout_truncated) = lock_buffer(&shared.stdout).contents();
    let (stderr, stderr_truncated) = lock_buffer(&shared.stderr).contents();

    let output = JobOutput {
        command,
        stdout,
        stderr,
        exit_code: status.code(),
        signal: status.signal(),
        timed_out,
        stdout_truncated,
        stderr_truncated,
        duration: started.elapsed(),
    };
    tracing::debug!(
        job_id = %id,
        status = %output.status_display(),
        elapsed_ms = output.duration.as_millis() as u64,
        "job finished"
    );
    Ok(output)
}
