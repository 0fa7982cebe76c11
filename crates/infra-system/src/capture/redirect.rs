// Descriptor-level redirection of the process-wide output channels
// reason: nix for pipe/dup2/fcntl (ADR-001); fd-level so writes from every thread are seen
use nix::unistd::{dup2, pipe};
use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

use super::{set_cloexec, CaptureError};

/// One of the two global output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// Time the drain gets to reach end-of-stream once the channel is restored
const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

const DRAIN_CHUNK_SIZE: usize = 64 * 1024;

static STDOUT_SCOPE: Mutex<()> = Mutex::new(());
static STDERR_SCOPE: Mutex<()> = Mutex::new(());

thread_local! {
    // Channels this thread currently holds a scope on: [stdout, stderr]
    static HELD: Cell<[bool; 2]> = Cell::new([false, false]);
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Stdout => 0,
            Channel::Stderr => 1,
        }
    }

    fn raw_fd(self) -> RawFd {
        match self {
            Channel::Stdout => io::stdout().as_raw_fd(),
            Channel::Stderr => io::stderr().as_raw_fd(),
        }
    }

    fn scope_lock(self) -> &'static Mutex<()> {
        match self {
            Channel::Stdout => &STDOUT_SCOPE,
            Channel::Stderr => &STDERR_SCOPE,
        }
    }

    /// Push Rust's buffered bytes to the descriptor currently installed
    fn flush(self) {
        // Nothing useful can be done with a failed flush of the console itself
        let _ = match self {
            Channel::Stdout => io::stdout().flush(),
            Channel::Stderr => io::stderr().flush(),
        };
    }

    fn duplicate(self) -> io::Result<OwnedFd> {
        match self {
            Channel::Stdout => io::stdout().as_fd().try_clone_to_owned(),
            Channel::Stderr => io::stderr().as_fd().try_clone_to_owned(),
        }
    }

    fn is_held_by_current_thread(self) -> bool {
        HELD.with(|held| held.get()[self.index()])
    }

    fn mark_held(self, value: bool) {
        HELD.with(|held| {
            let mut flags = held.get();
            flags[self.index()] = value;
            held.set(flags);
        });
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// Active redirection of one channel into an in-memory sink
///
/// The channel is restored when the guard is finished or dropped, including
/// during unwinding out of the wrapped work. Failure to restore aborts the
/// process: a misdirected global channel would silently swallow unrelated output.
pub(crate) struct Redirect {
    channel: Channel,
    saved: Option<OwnedFd>,
    sink: Arc<Mutex<Vec<u8>>>,
    drained: Option<Receiver<io::Result<()>>>,
    _scope: MutexGuard<'static, ()>,
}

impl Redirect {
    /// Swap `channel` for a pipe drained by a dedicated thread
    ///
    /// Blocks while another thread holds a scope on the same channel.
    ///
    /// # Errors
    /// - CaptureError::NestedScope if this thread already captures `channel`
    /// - CaptureError::Redirect if the pipe or descriptor swap cannot be set up
    pub(crate) fn install(channel: Channel) -> Result<Self, CaptureError> {
        if channel.is_held_by_current_thread() {
            return Err(CaptureError::NestedScope(channel));
        }

        let scope = channel
            .scope_lock()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let redirect_err = |reason: String| CaptureError::Redirect { channel, reason };

        channel.flush();
        let saved = channel.duplicate().map_err(|e| redirect_err(e.to_string()))?;
        let (reader, writer) = pipe().map_err(|e| redirect_err(e.to_string()))?;
        set_cloexec(&reader).map_err(|e| redirect_err(e.to_string()))?;
        set_cloexec(&writer).map_err(|e| redirect_err(e.to_string()))?;

        let sink = Arc::new(Mutex::new(Vec::new()));
        let (done, drained) = mpsc::channel();
        let drain_sink = sink.clone();
        thread::Builder::new()
            .name(format!("rigger-capture-{}", channel))
            .spawn(move || {
                let _ = done.send(drain_into(File::from(reader), &drain_sink));
            })
            .map_err(|e| redirect_err(e.to_string()))?;

        if let Err(e) = dup2(writer.as_raw_fd(), channel.raw_fd()) {
            drop(writer);
            let _ = drained.recv_timeout(DRAIN_GRACE_PERIOD);
            return Err(redirect_err(e.to_string()));
        }
        // The channel descriptor is now the only writer
        drop(writer);

        channel.mark_held(true);
        Ok(Self {
            channel,
            saved: Some(saved),
            sink,
            drained: Some(drained),
            _scope: scope,
        })
    }

    /// Restore the channel and collect everything written while redirected
    ///
    /// A process that inherited the channel and outlives the scope keeps the
    /// pipe open; after a grace period the bytes read so far are returned and
    /// its later output is discarded.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>, CaptureError> {
        self.restore_or_abort();
        match self.drained.take().map(await_drain) {
            Some(Err(RecvTimeoutError::Disconnected)) => {
                Err(CaptureError::Drain("drain thread panicked".to_string()))
            }
            Some(Ok(Err(e))) => Err(CaptureError::Drain(e.to_string())),
            _ => Ok(std::mem::take(
                &mut *self.sink.lock().unwrap_or_else(PoisonError::into_inner),
            )),
        }
    }

    fn restore_or_abort(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };

        self.channel.flush();
        if let Err(e) = dup2(saved.as_raw_fd(), self.channel.raw_fd()) {
            error!(channel = %self.channel, error = %e, "Failed to restore output channel, aborting");
            std::process::abort();
        }
    }
}

impl Drop for Redirect {
    fn drop(&mut self) {
        self.restore_or_abort();
        if let Some(drained) = self.drained.take() {
            let _ = await_drain(drained);
        }
        self.channel.mark_held(false);
    }
}

/// Copy `reader` into `sink` until EOF
fn drain_into(mut reader: File, sink: &Mutex<Vec<u8>>) -> io::Result<()> {
    let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk[..n]);
    }
}

/// Wait for the drain to reach EOF, at most for the grace period
fn await_drain(drained: Receiver<io::Result<()>>) -> Result<io::Result<()>, RecvTimeoutError> {
    let outcome = drained.recv_timeout(DRAIN_GRACE_PERIOD);
    if let Err(RecvTimeoutError::Timeout) = outcome {
        warn!("Captured channel still held open by another process, leaving its drain behind");
    }
    outcome
}
