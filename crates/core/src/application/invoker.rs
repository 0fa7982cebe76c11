// Tool Invoker - resolve, version-gate, bootstrap and run external tools
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::constants::{DEFAULT_PROBE_TIMEOUT, DEFAULT_RUN_TIMEOUT, PROBE_WORKING_DIR};
use crate::domain::{ExecutionResult, Platform, ProcessRequest, ToolSpec};
use crate::error::InvocationError;
use crate::port::{
    ArtifactFetcher, ArtifactOrigin, FetchedArtifact, ProcessRunner, ToolInstaller, ToolLocator,
};

/// Invoker tuning
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Time budget of a single version probe
    pub probe_timeout: Duration,
    /// Time budget of `run` (None = wait indefinitely)
    pub run_timeout: Option<Duration>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Makes external tools available at their required version and runs them
///
/// Resolution order for `ensure_available`:
/// 1. path memoized by an earlier call on this invoker
/// 2. executable on the search path
/// 3. previously installed location
/// 4. bootstrap (fetch, extract, mark executable), then re-probe
///
/// Concurrent `ensure_available` calls for the same tool are serialized so it
/// is never bootstrapped twice by the same invoker; other tools proceed.
pub struct ToolInvoker {
    runner: Arc<dyn ProcessRunner>,
    locator: Arc<dyn ToolLocator>,
    fetcher: Arc<dyn ArtifactFetcher>,
    installer: Arc<dyn ToolInstaller>,
    config: InvokerConfig,
    resolved: Mutex<HashMap<String, PathBuf>>,
    tool_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ToolInvoker {
    /// Create a new invoker
    ///
    /// # Example
    /// ```text
    /// let invoker = ToolInvoker::new(
    ///     Arc::new(SubprocessRunner::new(Arc::new(SystemTimeProvider))),
    ///     Arc::new(PathToolLocator::new()),
    ///     Arc::new(CachingArtifactFetcher::new(HttpArtifactFetcher::new(), cache_dir)?),
    ///     Arc::new(ArchiveToolInstaller::new(install_root)),
    ///     InvokerConfig::default(),
    /// );
    /// ```
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        locator: Arc<dyn ToolLocator>,
        fetcher: Arc<dyn ArtifactFetcher>,
        installer: Arc<dyn ToolInstaller>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            runner,
            locator,
            fetcher,
            installer,
            config,
            resolved: Mutex::new(HashMap::new()),
            tool_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an executable of `spec` that reports the required version
    ///
    /// # Errors
    /// - InvocationError::UnsupportedPlatform if bootstrap is needed and no target exists for this OS
    /// - InvocationError::ToolUnavailable if fetch or extraction fails
    /// - InvocationError::VersionMismatch if the freshly installed tool reports another version
    pub async fn ensure_available(&self, spec: &ToolSpec) -> Result<PathBuf, InvocationError> {
        let key = format!("{}@{}", spec.name(), spec.required_version());
        if let Some(path) = self.memoized(&key).await {
            debug!(tool = %spec.name(), path = %path.display(), "Tool already resolved");
            return Ok(path);
        }

        let tool_lock = self.tool_lock(&key).await;
        let _resolving = tool_lock.lock().await;

        // Resolved by a concurrent caller while this one waited
        if let Some(path) = self.memoized(&key).await {
            return Ok(path);
        }

        let path = match self.find_satisfying(spec).await {
            Some(path) => path,
            None => self.bootstrap(spec).await?,
        };

        info!(
            tool = %spec.name(),
            version = %spec.required_version(),
            path = %path.display(),
            "Tool available"
        );
        self.resolved.lock().await.insert(key, path.clone());
        Ok(path)
    }

    /// Run `spec` with `args` in `working_dir` using the configured run timeout
    ///
    /// # Errors
    /// - Any `ensure_available` error
    /// - InvocationError::ProcessLaunch if the executable cannot be started
    /// - InvocationError::Timeout if the run timeout elapses
    pub async fn run(
        &self,
        spec: &ToolSpec,
        args: &[String],
        working_dir: &Path,
    ) -> Result<ExecutionResult, InvocationError> {
        self.run_with_timeout(spec, args, working_dir, self.config.run_timeout)
            .await
    }

    /// Same as [`ToolInvoker::run`] with an explicit time budget
    pub async fn run_with_timeout(
        &self,
        spec: &ToolSpec,
        args: &[String],
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, InvocationError> {
        let program = self.ensure_available(spec).await?;
        let request = ProcessRequest::new(program, working_dir)
            .args(args.iter().cloned())
            .timeout(timeout);

        info!(
            tool = %spec.name(),
            command = %request.display_command(),
            working_dir = %working_dir.display(),
            "Running tool"
        );

        let result = self.runner.run(&request).await?;

        info!(
            tool = %spec.name(),
            exit_code = ?result.exit_code,
            duration_ms = %result.duration_ms,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Tool run completed"
        );

        Ok(result)
    }

    /// Contract check: fail with `NonZeroExit` unless the result succeeded
    pub fn require_success(&self, result: ExecutionResult) -> Result<ExecutionResult, InvocationError> {
        result.require_success()
    }

    async fn memoized(&self, key: &str) -> Option<PathBuf> {
        self.resolved.lock().await.get(key).cloned()
    }

    /// Lock serializing resolution of one tool version
    async fn tool_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.tool_locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Search path first, then the installed location; first exact version match wins
    async fn find_satisfying(&self, spec: &ToolSpec) -> Option<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = self.locator.find_on_path(&spec.host_executable_name()) {
            candidates.push(path);
        }
        if let Some(path) = Platform::current().and_then(|p| self.installer.find_installed(spec, p)) {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }

        for candidate in candidates {
            match self.probe_version(spec, &candidate).await {
                Some(version) if spec.is_satisfied_by(&version) => return Some(candidate),
                found => {
                    info!(
                        tool = %spec.name(),
                        path = %candidate.display(),
                        found = ?found,
                        required = %spec.required_version(),
                        "Candidate does not report the required version"
                    );
                }
            }
        }

        None
    }

    async fn bootstrap(&self, spec: &ToolSpec) -> Result<PathBuf, InvocationError> {
        let unsupported = |platform: &str| InvocationError::UnsupportedPlatform {
            tool: spec.name().to_string(),
            platform: platform.to_string(),
        };

        let platform = Platform::current().ok_or_else(|| unsupported(Platform::current_os_name()))?;
        let url = spec
            .bootstrap_url(platform)
            .ok_or_else(|| unsupported(platform.as_str()))?;

        info!(tool = %spec.name(), url = %url, platform = %platform, "Bootstrapping tool");

        let artifact = self.fetch_archive(spec, &url).await?;
        let origin = artifact.origin;
        match self.install_verified(spec, platform, artifact.bytes).await {
            Ok(binary) => Ok(binary),
            Err(e) => {
                // No later attempt may reuse an archive that failed to install
                self.fetcher.invalidate(&url).await;
                if origin != ArtifactOrigin::Cache {
                    return Err(e);
                }
                warn!(tool = %spec.name(), url = %url, error = %e, "Cached archive unusable, fetching again");
                let fresh = self.fetch_archive(spec, &url).await?;
                let result = self.install_verified(spec, platform, fresh.bytes).await;
                if result.is_err() {
                    self.fetcher.invalidate(&url).await;
                }
                result
            }
        }
    }

    async fn fetch_archive(&self, spec: &ToolSpec, url: &str) -> Result<FetchedArtifact, InvocationError> {
        let artifact = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| unavailable(spec, e.to_string()))?;
        if artifact.bytes.is_empty() {
            return Err(unavailable(spec, format!("GET {} returned an empty body", url)));
        }

        info!(
            tool = %spec.name(),
            origin = ?artifact.origin,
            bytes = artifact.bytes.len(),
            "Fetched tool archive"
        );
        Ok(artifact)
    }

    /// Install `archive`; the installed binary must prove its version
    async fn install_verified(
        &self,
        spec: &ToolSpec,
        platform: Platform,
        archive: Vec<u8>,
    ) -> Result<PathBuf, InvocationError> {
        let binary = self
            .installer
            .install(spec, platform, archive)
            .await
            .map_err(|e| unavailable(spec, e.to_string()))?;

        match self.probe_version(spec, &binary).await {
            Some(version) if spec.is_satisfied_by(&version) => Ok(binary),
            found => {
                warn!(
                    tool = %spec.name(),
                    path = %binary.display(),
                    found = ?found,
                    required = %spec.required_version(),
                    "Bootstrapped tool reports the wrong version"
                );
                Err(InvocationError::VersionMismatch {
                    tool: spec.name().to_string(),
                    required: spec.required_version().to_string(),
                    found,
                })
            }
        }
    }

    /// Run the version query; launch failures and timeouts count as "no version"
    async fn probe_version(&self, spec: &ToolSpec, program: &Path) -> Option<String> {
        let request = ProcessRequest::new(program, PROBE_WORKING_DIR)
            .args(spec.version_args().iter().cloned())
            .timeout(Some(self.config.probe_timeout));

        match self.runner.run(&request).await {
            Ok(result) => {
                let version = spec.extract_version(&result.stdout, &result.stderr);
                debug!(
                    tool = %spec.name(),
                    path = %program.display(),
                    exit_code = ?result.exit_code,
                    version = ?version,
                    "Version probe completed"
                );
                version
            }
            Err(e) => {
                warn!(tool = %spec.name(), path = %program.display(), error = %e, "Version probe failed");
                None
            }
        }
    }
}

fn unavailable(spec: &ToolSpec, reason: String) -> InvocationError {
    InvocationError::ToolUnavailable {
        tool: spec.name().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BootstrapTarget;
    use crate::port::artifact_fetcher::mocks::MockArtifactFetcher;
    use crate::port::process_runner::mocks::{MockProcessRunner, MockResponse};
    use crate::port::tool_installer::mocks::MockToolInstaller;
    use crate::port::tool_locator::mocks::MockToolLocator;
    use crate::port::InstallError;

    const URL: &str = "https://downloads.example.com/faketool-1.3.1.tar.gz";
    const INSTALLED: &str = "/opt/rigger/faketool/1.3.1/bin/faketool";

    struct Fixture {
        runner: Arc<MockProcessRunner>,
        fetcher: Arc<MockArtifactFetcher>,
        installer: Arc<MockToolInstaller>,
        invoker: ToolInvoker,
    }

    fn fixture(locator: MockToolLocator) -> Fixture {
        let runner = Arc::new(MockProcessRunner::new());
        let fetcher = Arc::new(MockArtifactFetcher::new());
        let installer = Arc::new(MockToolInstaller::new());
        let invoker = ToolInvoker::new(
            runner.clone(),
            Arc::new(locator),
            fetcher.clone(),
            installer.clone(),
            InvokerConfig::default(),
        );
        Fixture {
            runner,
            fetcher,
            installer,
            invoker,
        }
    }

    fn spec() -> ToolSpec {
        let mut builder = ToolSpec::builder("faketool", "1.3.1").version_prefix("faketool version ");
        if let Some(platform) = Platform::current() {
            builder = builder.bootstrap(
                platform,
                BootstrapTarget::new(
                    "https://downloads.example.com/{name}-{version}.tar.gz",
                    "bin/faketool",
                ),
            );
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_tool_on_path_with_right_version_skips_bootstrap() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new().with_tool(spec.host_executable_name(), "/usr/bin/faketool"));
        fx.runner
            .respond("/usr/bin/faketool", MockResponse::stdout("faketool version 1.3.1\n"));

        let path = fx.invoker.ensure_available(&spec).await.unwrap();

        assert_eq!(path, PathBuf::from("/usr/bin/faketool"));
        assert_eq!(fx.fetcher.call_count(), 0);
        assert_eq!(fx.installer.install_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_available_is_idempotent() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.fetcher.serve(URL, b"archive".to_vec());
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.3.1\n"));

        let first = fx.invoker.ensure_available(&spec).await.unwrap();
        let second = fx.invoker.ensure_available(&spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.installer.install_count(), 1);
        assert_eq!(fx.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_previous_install_is_reused_by_fresh_invoker() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.installer.preinstalled("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.3.1\n"));

        let path = fx.invoker.ensure_available(&spec).await.unwrap();

        assert_eq!(path, PathBuf::from(INSTALLED));
        assert_eq!(fx.installer.install_count(), 0);
    }

    #[tokio::test]
    async fn test_http_404_is_tool_unavailable() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());

        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert!(matches!(err, InvocationError::ToolUnavailable { .. }), "{err:?}");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_empty_body_is_tool_unavailable() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.fetcher.serve(URL, Vec::new());

        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert!(matches!(err, InvocationError::ToolUnavailable { .. }));
        assert_eq!(fx.installer.install_count(), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_tool_unavailable() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.fetcher.serve(URL, b"not an archive".to_vec());
        fx.installer
            .fail_with(InstallError::Extract("invalid gzip header".to_string()));

        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert!(matches!(err, InvocationError::ToolUnavailable { .. }));
        // Freshly downloaded bytes are not retried, only dropped
        assert_eq!(fx.fetcher.call_count(), 1);
        assert_eq!(fx.fetcher.invalidated(), vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_cached_archive_is_fetched_again() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.fetcher.serve_cached(URL, b"truncated".to_vec());
        fx.fetcher.serve(URL, b"archive".to_vec());
        fx.installer.reject_archive(b"truncated".to_vec());
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.3.1\n"));

        let path = fx.invoker.ensure_available(&spec).await.unwrap();

        assert_eq!(path, PathBuf::from(INSTALLED));
        assert_eq!(fx.fetcher.invalidated(), vec![URL.to_string()]);
        assert_eq!(fx.fetcher.call_count(), 2);
        assert_eq!(fx.installer.install_count(), 2);
    }

    #[tokio::test]
    async fn test_cached_archive_with_wrong_version_is_fetched_again() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new());
        fx.fetcher.serve_cached(URL, b"old archive".to_vec());
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.2.0\n"));

        // Source is gone as well: the second attempt fails, and nothing stays cached
        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert!(matches!(err, InvocationError::ToolUnavailable { .. }), "{err:?}");
        assert_eq!(fx.fetcher.call_count(), 2);
        assert_eq!(fx.fetcher.invalidated(), vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn test_slow_bootstrap_does_not_block_other_tools() {
        let slow = spec();
        let resolved = ToolSpec::builder("quicktool", "0.9")
            .version_prefix("quicktool ")
            .build()
            .unwrap();
        let fresh = ToolSpec::builder("othertool", "2.1")
            .version_prefix("othertool ")
            .build()
            .unwrap();
        let fx = fixture(
            MockToolLocator::new()
                .with_tool(resolved.host_executable_name(), "/usr/bin/quicktool")
                .with_tool(fresh.host_executable_name(), "/usr/bin/othertool"),
        );
        fx.runner
            .respond("/usr/bin/quicktool", MockResponse::stdout("quicktool 0.9\n"));
        fx.runner
            .respond("/usr/bin/othertool", MockResponse::stdout("othertool 2.1\n"));
        fx.fetcher.serve(URL, b"archive".to_vec());
        fx.fetcher.slow_down(Duration::from_secs(2));
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.3.1\n"));
        fx.invoker.ensure_available(&resolved).await.unwrap();

        let budget = Duration::from_millis(500);
        let (slow_path, resolved_path, fresh_path) = tokio::join!(
            fx.invoker.ensure_available(&slow),
            tokio::time::timeout(budget, fx.invoker.ensure_available(&resolved)),
            tokio::time::timeout(budget, fx.invoker.ensure_available(&fresh)),
        );

        assert_eq!(
            resolved_path.expect("memo hit waited on a bootstrap").unwrap(),
            PathBuf::from("/usr/bin/quicktool")
        );
        assert_eq!(
            fresh_path.expect("other tool waited on a bootstrap").unwrap(),
            PathBuf::from("/usr/bin/othertool")
        );
        assert_eq!(slow_path.unwrap(), PathBuf::from(INSTALLED));
    }

    #[tokio::test]
    async fn test_outdated_tool_triggers_bootstrap_then_version_mismatch() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new().with_tool(spec.host_executable_name(), "/usr/bin/faketool"));
        fx.runner
            .respond("/usr/bin/faketool", MockResponse::stdout("faketool version 1.2.0\n"));
        fx.fetcher.serve(URL, b"archive".to_vec());
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.2.0\n"));

        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert_eq!(fx.installer.install_count(), 1);
        assert_eq!(
            err,
            InvocationError::VersionMismatch {
                tool: "faketool".to_string(),
                required: "1.3.1".to_string(),
                found: Some("1.2.0".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_outdated_tool_replaced_by_bootstrap() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new().with_tool(spec.host_executable_name(), "/usr/bin/faketool"));
        fx.runner
            .respond("/usr/bin/faketool", MockResponse::stdout("faketool version 1.2.0\n"));
        fx.fetcher.serve(URL, b"archive".to_vec());
        fx.installer.install_to("faketool", INSTALLED);
        fx.runner
            .respond(INSTALLED, MockResponse::stdout("faketool version 1.3.1\n"));

        let path = fx.invoker.ensure_available(&spec).await.unwrap();

        assert_eq!(path, PathBuf::from(INSTALLED));
    }

    #[tokio::test]
    async fn test_no_bootstrap_target_is_unsupported_platform() {
        let spec = ToolSpec::builder("nobootstrap", "1.0").build().unwrap();
        let fx = fixture(MockToolLocator::new());

        let err = fx.invoker.ensure_available(&spec).await.unwrap_err();

        assert!(matches!(err, InvocationError::UnsupportedPlatform { .. }));
        assert_eq!(fx.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_passes_args_and_working_dir() {
        let spec = spec();
        let fx = fixture(MockToolLocator::new().with_tool(spec.host_executable_name(), "/usr/bin/faketool"));
        fx.runner
            .respond("/usr/bin/faketool", MockResponse::stdout("faketool version 1.3.1\n"));

        let args = vec!["--json".to_string(), "scan".to_string()];
        fx.invoker
            .run(&spec, &args, Path::new("/work/project"))
            .await
            .unwrap();

        let calls = fx.runner.calls();
        let run_call = calls.last().unwrap();
        assert_eq!(run_call.args, args);
        assert_eq!(run_call.working_dir, PathBuf::from("/work/project"));
        assert_eq!(run_call.timeout, None);
    }

    #[tokio::test]
    async fn test_require_success_on_failed_run() {
        let spec = ToolSpec::builder("failing", "2.0")
            .version_prefix("failing ")
            .build()
            .unwrap();
        let fx = fixture(MockToolLocator::new().with_tool(spec.host_executable_name(), "/bin/failing"));
        fx.runner.respond("/bin/failing", MockResponse::failure(3, "failing 2.0\nfatal: bad input\n"));

        let result = fx.invoker.run(&spec, &[], Path::new(".")).await.unwrap();
        let err = fx.invoker.require_success(result).unwrap_err();

        match err {
            InvocationError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("fatal: bad input"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
