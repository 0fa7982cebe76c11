// Tool Spec - static description of an external program
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DomainError, Result};
use super::platform::Platform;

/// Default arguments passed to a tool to query its version
pub const DEFAULT_VERSION_ARGS: &[&str] = &["--version"];

/// Custom version extraction: (probe stdout, probe stderr) -> normalized version
pub type VersionExtractor = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Where to obtain a tool for one platform
///
/// Both fields are templates; `{version}` and `{name}` are expanded
/// against the owning spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapTarget {
    /// Archive download URL, e.g. `https://host/tool-{version}-linux.tar.gz`
    pub url_template: String,
    /// Path of the executable relative to the extracted archive root
    pub binary_path: String,
}

impl BootstrapTarget {
    pub fn new(url_template: impl Into<String>, binary_path: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            binary_path: binary_path.into(),
        }
    }
}

/// Identity, version requirement and install recipe of an external tool
///
/// Immutable once built; share one instance per tool kind behind an `Arc`.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    executable: String,
    version_args: Vec<String>,
    version_prefix: String,
    required_version: String,
    bootstrap: BTreeMap<Platform, BootstrapTarget>,
    extractor: Option<VersionExtractor>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("executable", &self.executable)
            .field("version_args", &self.version_args)
            .field("version_prefix", &self.version_prefix)
            .field("required_version", &self.required_version)
            .field("bootstrap", &self.bootstrap)
            .field("custom_extractor", &self.extractor.is_some())
            .finish()
    }
}

impl ToolSpec {
    /// Start building a spec for `name` pinned to `required_version`
    ///
    /// # Example
    /// ```text
    /// let spec = ToolSpec::builder("scancode", "32.0.8")
    ///     .version_prefix("ScanCode version ")
    ///     .bootstrap(Platform::Linux, BootstrapTarget::new(url, "scancode-{version}/scancode"))
    ///     .build()?;
    /// ```
    pub fn builder(name: impl Into<String>, required_version: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder::new(name.into(), required_version.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_version(&self) -> &str {
        &self.required_version
    }

    pub fn version_args(&self) -> &[String] {
        &self.version_args
    }

    /// Executable file name on `platform`
    pub fn executable_name(&self, platform: Platform) -> String {
        platform.executable_name(&self.executable)
    }

    /// Executable file name on the running platform
    pub fn host_executable_name(&self) -> String {
        match Platform::current() {
            Some(platform) => self.executable_name(platform),
            None => self.executable.clone(),
        }
    }

    pub fn bootstrap_target(&self, platform: Platform) -> Option<&BootstrapTarget> {
        self.bootstrap.get(&platform)
    }

    pub fn bootstrap_platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.bootstrap.keys().copied()
    }

    /// Download URL for `platform` with templates expanded
    pub fn bootstrap_url(&self, platform: Platform) -> Option<String> {
        self.bootstrap_target(platform)
            .map(|target| self.expand(&target.url_template))
    }

    /// Executable path inside the extracted archive for `platform`
    pub fn bootstrap_binary_path(&self, platform: Platform) -> Option<String> {
        self.bootstrap_target(platform)
            .map(|target| self.expand(&target.binary_path))
    }

    /// Extract the normalized version string from version-probe output
    ///
    /// Default policy: the first line (stdout first, then stderr) that starts
    /// with the version prefix, prefix stripped and trimmed.
    pub fn extract_version(&self, stdout: &str, stderr: &str) -> Option<String> {
        if let Some(extractor) = &self.extractor {
            return extractor(stdout, stderr);
        }

        stdout
            .lines()
            .chain(stderr.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .find_map(|line| line.strip_prefix(self.version_prefix.as_str()))
            .map(|rest| rest.trim().to_string())
            .filter(|version| !version.is_empty())
    }

    /// Literal comparison against the required version (no semver ordering)
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        version == self.required_version
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{version}", &self.required_version)
            .replace("{name}", &self.name)
    }
}

/// Builder for [`ToolSpec`]
pub struct ToolSpecBuilder {
    name: String,
    required_version: String,
    executable: Option<String>,
    version_args: Vec<String>,
    version_prefix: String,
    bootstrap: BTreeMap<Platform, BootstrapTarget>,
    extractor: Option<VersionExtractor>,
}

impl ToolSpecBuilder {
    fn new(name: String, required_version: String) -> Self {
        Self {
            name,
            required_version,
            executable: None,
            version_args: DEFAULT_VERSION_ARGS.iter().map(|s| s.to_string()).collect(),
            version_prefix: String::new(),
            bootstrap: BTreeMap::new(),
            extractor: None,
        }
    }

    /// Base executable name (defaults to the tool name)
    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn version_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.version_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn version_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_prefix = prefix.into();
        self
    }

    pub fn bootstrap(mut self, platform: Platform, target: BootstrapTarget) -> Self {
        self.bootstrap.insert(platform, target);
        self
    }

    /// Replace prefix stripping with a custom extraction function
    pub fn version_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn build(self) -> Result<ToolSpec> {
        let invalid = |reason: &str| DomainError::InvalidToolSpec {
            tool: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.required_version.trim().is_empty() {
            return Err(invalid("required version must not be empty"));
        }
        let executable = self.executable.clone().unwrap_or_else(|| self.name.clone());
        if executable.trim().is_empty() {
            return Err(invalid("executable must not be empty"));
        }
        if let Some((platform, _)) = self
            .bootstrap
            .iter()
            .find(|(_, target)| target.url_template.is_empty() || target.binary_path.is_empty())
        {
            return Err(invalid(&format!(
                "bootstrap target for {} needs both url_template and binary_path",
                platform
            )));
        }

        Ok(ToolSpec {
            name: self.name,
            executable,
            version_args: self.version_args,
            version_prefix: self.version_prefix,
            required_version: self.required_version,
            bootstrap: self.bootstrap,
            extractor: self.extractor,
        })
    }
}

/// Declarative tool description as read from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(default)]
    pub executable: Option<String>,
    pub required_version: String,
    #[serde(default)]
    pub version_args: Option<Vec<String>>,
    #[serde(default)]
    pub version_prefix: String,
    #[serde(default)]
    pub bootstrap: BTreeMap<Platform, BootstrapTarget>,
}

impl ToolDefinition {
    /// Convert into a validated spec registered under `name`
    pub fn into_spec(self, name: &str) -> Result<ToolSpec> {
        let mut builder = ToolSpec::builder(name, self.required_version)
            .version_prefix(self.version_prefix);
        if let Some(executable) = self.executable {
            builder = builder.executable(executable);
        }
        if let Some(args) = self.version_args {
            builder = builder.version_args(args);
        }
        for (platform, target) in self.bootstrap {
            builder = builder.bootstrap(platform, target);
        }
        builder.build()
    }
}
