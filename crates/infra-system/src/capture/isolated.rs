// Process-isolated termination trap
// reason: nix fork/waitpid; covers work that exits through std::process::exit directly
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult};
use std::fs::File;
use std::io::{self, Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use super::termination::trap_current_thread;
use super::{set_cloexec, CaptureError};

const COMPLETED: u8 = b'C';
const PANICKED: u8 = b'P';

/// Run `work` in a forked child and report how it ended
///
/// `Ok(None)` when the work returned normally, `Ok(Some(code))` when it
/// ended the child through any exit path (`std::process::exit`,
/// [`request_termination`](super::request_termination), or a fatal signal as
/// `128 + signal`). Side effects of `work` on memory stay in the child;
/// writes to the inherited descriptors (including active captures) are seen.
///
/// The child only has the calling thread, so `work` must not depend on
/// locks or runtimes driven by other threads.
pub fn trap_termination_isolated<F>(work: F) -> Result<Option<i32>, CaptureError>
where
    F: FnOnce(),
{
    let (status_reader, status_writer) =
        pipe().map_err(|e| CaptureError::Isolation(e.to_string()))?;
    set_cloexec(&status_reader).map_err(|e| CaptureError::Isolation(e.to_string()))?;
    set_cloexec(&status_writer).map_err(|e| CaptureError::Isolation(e.to_string()))?;

    // Buffered bytes would otherwise be written twice
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    // SAFETY: the child only runs `work` and then exits without returning
    match unsafe { fork() }.map_err(|e| CaptureError::Isolation(e.to_string()))? {
        ForkResult::Child => {
            drop(status_reader);
            // process::exit flushes stdout without blocking on a lock held by
            // a thread that no longer exists in the child
            let marker = match catch_unwind(AssertUnwindSafe(|| trap_current_thread(work))) {
                Ok(outcome) => match outcome.exit_code() {
                    Some(code) => std::process::exit(code),
                    None => COMPLETED,
                },
                Err(_) => PANICKED,
            };
            let _ = File::from(status_writer).write_all(&[marker]);
            std::process::exit(if marker == COMPLETED { 0 } else { 101 });
        }
        ForkResult::Parent { child } => {
            drop(status_writer);

            let mut marker = Vec::with_capacity(1);
            if let Err(e) = File::from(status_reader).read_to_end(&mut marker) {
                warn!(error = %e, "Failed to read isolated work status");
            }
            let status = waitpid(child, None).map_err(|e| CaptureError::Isolation(e.to_string()))?;
            debug!(pid = %child, status = ?status, "Isolated work finished");

            match (marker.first().copied(), status) {
                (Some(COMPLETED), _) => Ok(None),
                (Some(PANICKED), _) => Err(CaptureError::WorkPanicked),
                (_, WaitStatus::Exited(_, code)) => Ok(Some(code)),
                (_, WaitStatus::Signaled(_, signal, _)) => Ok(Some(128 + signal as i32)),
                (_, other) => Err(CaptureError::Isolation(format!(
                    "unexpected child status {:?}",
                    other
                ))),
            }
        }
    }
}
