// Subprocess runner implementation
// reason: tokio for async process management and concurrent stream drains (ADR-001)
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use rigger_core::domain::{ExecutionResult, ProcessRequest};
use rigger_core::error::InvocationError;
use rigger_core::port::{ProcessRunner, TimeProvider};

/// Time drains get to reach end-of-stream after a timed-out child was killed
pub const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Read size of one drain iteration
const DRAIN_CHUNK_SIZE: usize = 64 * 1024;

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Subprocess runner
///
/// Spawns a child with both output streams piped and drains each stream on
/// its own task from spawn until EOF, so a child filling one pipe while the
/// caller waits on the other can never stall.
pub struct SubprocessRunner {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Option<Vec<String>>,
}

impl SubprocessRunner {
    /// Create a runner that passes the full parent environment to children
    ///
    /// # Example
    /// ```ignore
    /// let runner = SubprocessRunner::new(Arc::new(SystemTimeProvider));
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            env_allowlist: None,
        }
    }

    /// Only pass the listed parent environment variables to children
    ///
    /// Variables set on the `ProcessRequest` itself are always passed.
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = Some(allowlist);
        self
    }

    /// Filter environment variables to allowlist only
    fn filter_env(
        &self,
        allowlist: &[String],
        env: impl Iterator<Item = (String, String)>,
    ) -> HashMap<String, String> {
        env.filter(|(k, _)| allowlist.contains(k)).collect()
    }

    /// Spawn child process with both output streams piped
    fn spawn(&self, request: &ProcessRequest) -> Result<Child, InvocationError> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(allowlist) = &self.env_allowlist {
            command.env_clear();
            command.envs(self.filter_env(allowlist, std::env::vars()));
        }
        command.envs(&request.env);

        command.spawn().map_err(|e| InvocationError::ProcessLaunch {
            program: request.program.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Forcibly terminate a child whose time budget elapsed
    async fn kill(&self, child: &mut Child, program: &str) {
        if let Err(e) = child.kill().await {
            warn!(program = %program, error = %e, "Failed to kill timed-out process");
        }
    }

    /// Build execution result from exit status and drained streams
    fn build_result(
        &self,
        status: ExitStatus,
        stdout: &SharedBuffer,
        stderr: &SharedBuffer,
        duration_ms: i64,
    ) -> ExecutionResult {
        ExecutionResult {
            stdout: take_text(stdout),
            stderr: take_text(stderr),
            exit_code: Some(normalize_exit(status)),
            duration_ms,
        }
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(&self, request: &ProcessRequest) -> Result<ExecutionResult, InvocationError> {
        let program = request.program.display().to_string();

        info!(
            command = %request.display_command(),
            working_dir = %request.working_dir.display(),
            timeout_ms = ?request.timeout.map(|t| t.as_millis()),
            "Starting subprocess"
        );

        let start_time = self.time_provider.now_millis();
        let mut child = self.spawn(request)?;

        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let stdout_task = spawn_drain(take_pipe(child.stdout.take(), "stdout")?, stdout.clone());
        let stderr_task = spawn_drain(take_pipe(child.stderr.take(), "stderr")?, stderr.clone());

        // One deadline covers both the child and the end of its output
        let deadline = request.timeout.map(|limit| Instant::now() + limit);
        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();

        let status = match within(deadline, child.wait()).await {
            Some(status) => status?,
            None => {
                warn!(program = %program, "Process timed out, killing");
                self.kill(&mut child, &program).await;
                settle_drain(stdout_task, DRAIN_GRACE_PERIOD).await;
                settle_drain(stderr_task, DRAIN_GRACE_PERIOD).await;
                return Err(timed_out(program, request, &stdout, &stderr));
            }
        };

        let drained = async {
            join_drain(stdout_task, "stdout").await?;
            join_drain(stderr_task, "stderr").await
        };
        match within(deadline, drained).await {
            Some(drained) => drained?,
            None => {
                // A background descendant inherited the pipes and outlived the child
                warn!(program = %program, "Process output still open at deadline, giving up");
                stdout_abort.abort();
                stderr_abort.abort();
                return Err(timed_out(program, request, &stdout, &stderr));
            }
        }

        let duration_ms = self.time_provider.now_millis() - start_time;
        let result = self.build_result(status, &stdout, &stderr, duration_ms);

        info!(
            program = %program,
            duration_ms = %duration_ms,
            exit_code = ?result.exit_code,
            "Subprocess completed"
        );

        Ok(result)
    }
}

/// Await `future`, giving up at `deadline` when one is set
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        None => Some(future.await),
        Some(deadline) => timeout_at(deadline, future).await.ok(),
    }
}

fn timed_out(
    program: String,
    request: &ProcessRequest,
    stdout: &SharedBuffer,
    stderr: &SharedBuffer,
) -> InvocationError {
    InvocationError::Timeout {
        program,
        timeout_ms: request.timeout.unwrap_or_default().as_millis() as u64,
        stdout: take_text(stdout),
        stderr: take_text(stderr),
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T, InvocationError> {
    pipe.ok_or_else(|| InvocationError::Io(format!("child {} was not piped", name)))
}

/// Read `reader` to EOF into `buffer`
fn spawn_drain<R>(mut reader: R, buffer: SharedBuffer) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]);
        }
    })
}

async fn join_drain(task: JoinHandle<io::Result<()>>, name: &str) -> Result<(), InvocationError> {
    task.await
        .map_err(|e| InvocationError::Io(format!("{} drain task failed: {}", name, e)))?
        .map_err(InvocationError::from)
}

/// Wait a bounded time for a drain after kill; abort it if a grandchild
/// still holds the pipe open
async fn settle_drain(task: JoinHandle<io::Result<()>>, grace: Duration) {
    let abort = task.abort_handle();
    if timeout(grace, task).await.is_err() {
        debug!("Drain did not reach EOF within grace period, aborting");
        abort.abort();
    }
}

fn take_text(buffer: &SharedBuffer) -> String {
    let bytes = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Exit code with the shell convention `128 + signal` for signal deaths
pub fn normalize_exit(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            128 + sig
        } else {
            1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
