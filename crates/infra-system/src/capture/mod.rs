// Output capture and termination trapping for in-process work
// Unix only: redirection works on the process descriptors 1 and 2
mod isolated;
mod redirect;
mod termination;

pub use isolated::trap_termination_isolated;
pub use redirect::Channel;
pub use termination::{
    is_trapped, request_termination, trap, trap_termination, TerminationRequest, TrapOutcome,
};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Instant;
use thiserror::Error;

use redirect::Redirect;
use rigger_core::domain::ExecutionResult;

/// Capture scope errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("{0} is already captured by an enclosing scope on this thread")]
    NestedScope(Channel),

    #[error("Failed to redirect {channel}: {reason}")]
    Redirect { channel: Channel, reason: String },

    #[error("Capture drain failed: {0}")]
    Drain(String),

    #[error("Failed to isolate work: {0}")]
    Isolation(String),

    #[error("Isolated work panicked")]
    WorkPanicked,
}

/// Run `work` with the process stdout redirected into memory
///
/// Everything written to descriptor 1 while `work` runs is returned,
/// whether it came from Rust's `stdout()`, another thread, or a child
/// process inheriting the descriptor. The channel is restored on return and
/// while unwinding. Another thread capturing stdout at the same time waits.
///
/// A child process that inherited the descriptor and is still running when
/// `work` returns holds the capture open for at most two seconds; whatever it
/// writes after that is discarded.
///
/// # Errors
/// Returns CaptureError::NestedScope if this thread is already inside a
/// stdout capture.
pub fn capture_stdout<T, F>(work: F) -> Result<(T, String), CaptureError>
where
    F: FnOnce() -> T,
{
    capture(Channel::Stdout, work)
}

/// Run `work` with the process stderr redirected into memory
///
/// Same contract as [`capture_stdout`] for descriptor 2.
pub fn capture_stderr<T, F>(work: F) -> Result<(T, String), CaptureError>
where
    F: FnOnce() -> T,
{
    capture(Channel::Stderr, work)
}

/// Run `work` with both channels captured and termination trapped
///
/// `exit_code` is the trapped code, or `None` when `work` returned normally.
/// Captures wrap the trap, so output written before a termination request
/// is kept.
pub fn run_captured<F>(work: F) -> Result<ExecutionResult, CaptureError>
where
    F: FnOnce(),
{
    let started = Instant::now();
    let (inner, stdout) = capture_stdout(|| capture_stderr(|| trap_termination(work)))?;
    let (exit_code, stderr) = inner?;

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code,
        duration_ms: started.elapsed().as_millis() as i64,
    })
}

fn capture<T, F>(channel: Channel, work: F) -> Result<(T, String), CaptureError>
where
    F: FnOnce() -> T,
{
    let redirect = Redirect::install(channel)?;
    let value = work();
    let bytes = redirect.finish()?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Ok((value, text))
}

fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(|_| ())
}
