// Execution outcome of a child process or a captured in-process unit of work
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::InvocationError;

/// Outcome of running a program
///
/// `exit_code` semantics:
/// - child process: `Some(code)`; a signal-terminated child reports `128 + signal`
/// - in-process work: `Some(code)` when a termination request was trapped,
///   `None` when the work completed without requesting termination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

impl ExecutionResult {
    /// True for exit code 0 or for in-process work that never requested termination
    pub fn is_success(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }

    /// Pass a successful result through unchanged
    ///
    /// # Errors
    /// - InvocationError::NonZeroExit carrying the captured stderr otherwise
    pub fn require_success(self) -> Result<Self, InvocationError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(InvocationError::NonZeroExit {
                exit_code: self.exit_code.unwrap_or(-1),
                stderr: self.stderr,
            })
        }
    }

    /// Stdout split into lines (line terminators removed)
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines()
    }
}

/// Request to start a child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub env: BTreeMap<String, String>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program and arguments joined for log output
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
