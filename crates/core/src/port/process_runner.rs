// Process Runner Port (ADR-002)
// Abstraction for starting a child process and capturing both output streams

use crate::domain::{ExecutionResult, ProcessRequest};
use crate::error::InvocationError;
use async_trait::async_trait;

/// Process Runner trait
///
/// Implementations:
/// - SubprocessRunner: tokio child process with concurrent stream drains
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start the program, drain stdout and stderr concurrently, wait for exit
    ///
    /// # Errors
    /// - InvocationError::ProcessLaunch if the program cannot be started
    /// - InvocationError::Timeout if `request.timeout` elapses (partial output attached)
    async fn run(&self, request: &ProcessRequest) -> Result<ExecutionResult, InvocationError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    /// Scripted reaction of the mock runner for one program path
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        /// Exit with the given code and output
        Output {
            stdout: String,
            stderr: String,
            exit_code: i32,
        },
        /// Fail to launch
        LaunchError(String),
    }

    impl MockResponse {
        pub fn stdout(stdout: impl Into<String>) -> Self {
            MockResponse::Output {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: 0,
            }
        }

        pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
            MockResponse::Output {
                stdout: String::new(),
                stderr: stderr.into(),
                exit_code,
            }
        }
    }

    /// Mock Process Runner keyed by program path
    ///
    /// Programs without a scripted response fail to launch.
    #[derive(Default)]
    pub struct MockProcessRunner {
        responses: Arc<Mutex<HashMap<PathBuf, MockResponse>>>,
        calls: Arc<Mutex<Vec<ProcessRequest>>>,
    }

    impl MockProcessRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, program: impl Into<PathBuf>, response: MockResponse) {
            self.responses
                .lock()
                .unwrap()
                .insert(program.into(), response);
        }

        pub fn calls(&self) -> Vec<ProcessRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count_for(&self, program: &Path) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|req| req.program == program)
                .count()
        }
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn run(&self, request: &ProcessRequest) -> Result<ExecutionResult, InvocationError> {
            self.calls.lock().unwrap().push(request.clone());

            let response = self.responses.lock().unwrap().get(&request.program).cloned();
            match response {
                Some(MockResponse::Output {
                    stdout,
                    stderr,
                    exit_code,
                }) => Ok(ExecutionResult {
                    stdout,
                    stderr,
                    exit_code: Some(exit_code),
                    duration_ms: 1,
                }),
                Some(MockResponse::LaunchError(reason)) => Err(InvocationError::ProcessLaunch {
                    program: request.program.display().to_string(),
                    reason,
                }),
                None => Err(InvocationError::ProcessLaunch {
                    program: request.program.display().to_string(),
                    reason: "No such file or directory".to_string(),
                }),
            }
        }
    }
}
