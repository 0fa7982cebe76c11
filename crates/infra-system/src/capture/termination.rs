// In-process termination trap
// Unwind-based isolation of work that asks the host to exit (ADR-002)
use std::cell::Cell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Unwind payload carrying the exit code requested by trapped work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRequest {
    pub code: i32,
}

/// Result of running work under a termination trap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapOutcome<T> {
    /// Work returned normally
    Completed(T),
    /// Work asked to terminate the process with this code
    Terminated(i32),
}

impl<T> TrapOutcome<T> {
    /// Trapped code, or `None` when the work never requested termination
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TrapOutcome::Completed(_) => None,
            TrapOutcome::Terminated(code) => Some(*code),
        }
    }
}

thread_local! {
    static TRAP_DEPTH: Cell<usize> = Cell::new(0);
}

/// Traps active anywhere in the process, and a code requested by a thread
/// that is not itself inside one
struct Registry {
    active: usize,
    pending: Option<i32>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    active: 0,
    pending: None,
});

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

fn enter_trap() {
    TRAP_DEPTH.with(|depth| depth.set(depth.get() + 1));
    registry().active += 1;
}

/// Remove the innermost trap of this thread and claim a code requested from
/// another thread meanwhile
fn leave_trap() -> Option<i32> {
    TRAP_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    let mut registry = registry();
    registry.active = registry.active.saturating_sub(1);
    registry.pending.take()
}

/// Record a request made outside any trap of the calling thread
///
/// Returns false when no trap is active in the process.
fn record_foreign_request(code: i32) -> bool {
    let mut registry = registry();
    if registry.active == 0 {
        return false;
    }
    registry.pending.get_or_insert(code);
    true
}

/// Whether a termination request on this thread would be trapped by a trap
/// installed on this thread
pub fn is_trapped() -> bool {
    TRAP_DEPTH.with(Cell::get) > 0
}

/// Host-side exit entry point for embedded/scripted work
///
/// Inside [`trap_termination`] this unwinds to the innermost trap, which
/// reports `code`. On a thread spawned by trapped work the code is recorded
/// for the trap and only that thread unwinds. With no trap active anywhere
/// it terminates the process with `code`.
pub fn request_termination(code: i32) -> ! {
    if is_trapped() {
        debug!(code = code, "Termination request trapped");
        // resume_unwind skips the panic hook, so nothing is printed
        resume_unwind(Box::new(TerminationRequest { code }));
    }
    if record_foreign_request(code) {
        debug!(code = code, "Termination request from a worker thread trapped");
        resume_unwind(Box::new(TerminationRequest { code }));
    }
    std::process::exit(code)
}

/// Run `work`, converting a termination request into a returned value
///
/// A request made on a thread `work` spawned is reported once `work`
/// returns, even if `work` itself completed or panicked while joining that
/// thread. With traps active on several threads at once, such a request is
/// claimed by whichever trap finishes first. Panics other than termination
/// requests propagate after the trap is removed.
pub fn trap<T, F>(work: F) -> TrapOutcome<T>
where
    F: FnOnce() -> T,
{
    enter_trap();
    let outcome = catch_unwind(AssertUnwindSafe(work));
    let foreign = leave_trap();
    settle(outcome, foreign)
}

/// Trap requests made on the calling thread only, without the process-wide
/// registry
///
/// For a forked child, where the registry lock may have been held by a
/// thread that does not exist there.
pub(super) fn trap_current_thread<T, F>(work: F) -> TrapOutcome<T>
where
    F: FnOnce() -> T,
{
    TRAP_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = catch_unwind(AssertUnwindSafe(work));
    TRAP_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    settle(outcome, None)
}

fn settle<T>(outcome: std::thread::Result<T>, foreign: Option<i32>) -> TrapOutcome<T> {
    match (outcome, foreign) {
        (Ok(value), None) => TrapOutcome::Completed(value),
        (Ok(_), Some(code)) => TrapOutcome::Terminated(code),
        (Err(payload), foreign) => match payload.downcast::<TerminationRequest>() {
            Ok(request) => TrapOutcome::Terminated(request.code),
            Err(other) => match foreign {
                Some(code) => TrapOutcome::Terminated(code),
                None => resume_unwind(other),
            },
        },
    }
}

/// Run `work`; `Some(code)` if it requested termination, `None` otherwise
pub fn trap_termination<F>(work: F) -> Option<i32>
where
    F: FnOnce(),
{
    trap(work).exit_code()
}
