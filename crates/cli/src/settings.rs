// Settings loading
// reason: config layers rigger.toml under RIGGER__* env overrides; directories for platform defaults
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rigger_core::application::constants::DEFAULT_PROBE_TIMEOUT;
use rigger_core::application::InvokerConfig;
use rigger_core::domain::{ToolDefinition, ToolSpec};
use rigger_core::AppError;

pub const CONFIG_FILE_NAME: &str = "rigger.toml";
const ENV_PREFIX: &str = "RIGGER";
const FALLBACK_HOME: &str = "~/.rigger";

/// Resolved CLI settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root of bootstrapped installs (`<root>/<tool>/<version>/`)
    pub install_root: String,
    /// Downloaded archive cache
    pub cache_dir: String,
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub run_timeout_ms: Option<u64>,
    /// Also write JSON logs to a daily file here
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Parent environment variables passed to tools (all when unset)
    #[serde(default)]
    pub env_allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDefinition>,
}

impl Settings {
    /// Load settings from `path` (or the platform default) plus environment overrides
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        let env = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true);
        Self::build(&path, required, Some(env))
    }

    fn build(path: &Path, required: bool, env: Option<Environment>) -> Result<Self, AppError> {
        let home = default_home();
        let mut builder = Config::builder()
            .set_default("install_root", join(&home.data, "tools"))
            .and_then(|b| b.set_default("cache_dir", join(&home.cache, "archives")))
            .and_then(|b| b.set_default("probe_timeout_ms", DEFAULT_PROBE_TIMEOUT.as_millis() as i64))
            .map_err(config_error)?
            .add_source(File::from(path).required(required));
        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let settings: Settings = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)?;
        Ok(settings.expanded())
    }

    fn expanded(mut self) -> Self {
        self.install_root = expand(&self.install_root);
        self.cache_dir = expand(&self.cache_dir);
        self.log_dir = self.log_dir.as_deref().map(expand);
        self
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            run_timeout: self.run_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Validated spec of a configured tool
    pub fn tool_spec(&self, name: &str) -> Result<ToolSpec, AppError> {
        let definition = self
            .tools
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("tool '{}' is not configured", name)))?;
        Ok(definition.clone().into_spec(name)?)
    }

    pub fn tool_specs(&self) -> Result<Vec<ToolSpec>, AppError> {
        self.tools.keys().map(|name| self.tool_spec(name)).collect()
    }
}

struct DefaultHome {
    config: String,
    data: String,
    cache: String,
}

fn default_home() -> DefaultHome {
    match ProjectDirs::from("dev", "Rigger", "rigger") {
        Some(dirs) => DefaultHome {
            config: dirs.config_dir().display().to_string(),
            data: dirs.data_dir().display().to_string(),
            cache: dirs.cache_dir().display().to_string(),
        },
        None => DefaultHome {
            config: FALLBACK_HOME.to_string(),
            data: FALLBACK_HOME.to_string(),
            cache: join(FALLBACK_HOME, "cache"),
        },
    }
}

/// Platform config dir, e.g. `~/.config/rigger/rigger.toml` on Linux
pub fn default_config_path() -> PathBuf {
    PathBuf::from(expand(&join(&default_home().config, CONFIG_FILE_NAME)))
}

fn join(base: &str, leaf: &str) -> String {
    Path::new(base).join(leaf).display().to_string()
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

fn config_error(err: config::ConfigError) -> AppError {
    AppError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigger_core::domain::Platform;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
install_root = "/opt/rigger/tools"
cache_dir = "~/rigger-cache"
probe_timeout_ms = 5000
run_timeout_ms = 600000

[tools.scancode]
required_version = "1.3.1"
version_prefix = "ScanCode version "

[tools.scancode.bootstrap.linux]
url_template = "https://example.com/{name}-{version}-linux.tar.gz"
binary_path = "{name}-{version}/bin/{name}"

[tools.fossology]
executable = "nomossa"
required_version = "4.4.0"
version_args = ["-V"]
"#;

    fn load_sample() -> Settings {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();
        Settings::build(&path, true, None).unwrap()
    }

    #[test]
    fn test_load_file() {
        let settings = load_sample();

        assert_eq!(settings.install_root, "/opt/rigger/tools");
        assert_eq!(settings.probe_timeout_ms, 5000);
        assert_eq!(settings.run_timeout_ms, Some(600000));
        assert_eq!(settings.tools.len(), 2);
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_tilde_is_expanded() {
        let settings = load_sample();
        assert!(!settings.cache_dir.starts_with('~'));
        assert!(settings.cache_dir.ends_with("rigger-cache"));
    }

    #[test]
    fn test_tool_definitions_become_specs() {
        let settings = load_sample();

        let scancode = settings.tool_spec("scancode").unwrap();
        assert_eq!(scancode.required_version(), "1.3.1");
        assert_eq!(
            scancode.bootstrap_url(Platform::Linux).as_deref(),
            Some("https://example.com/scancode-1.3.1-linux.tar.gz")
        );
        assert_eq!(
            scancode.extract_version("ScanCode version 1.3.1\n", ""),
            Some("1.3.1".to_string())
        );

        let nomos = settings.tool_spec("fossology").unwrap();
        assert_eq!(nomos.version_args(), ["-V".to_string()]);
        assert_eq!(nomos.executable_name(Platform::Windows), "nomossa.exe");

        assert_eq!(settings.tool_specs().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_tool() {
        let err = load_sample().tool_spec("missing").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_defaults_when_file_is_optional_and_absent() {
        let dir = tempdir().unwrap();
        let settings = Settings::build(&dir.path().join(CONFIG_FILE_NAME), false, None).unwrap();

        assert_eq!(settings.probe_timeout_ms, DEFAULT_PROBE_TIMEOUT.as_millis() as u64);
        assert!(settings.install_root.ends_with("tools"));
        assert!(settings.tools.is_empty());

        let config = settings.invoker_config();
        assert_eq!(config.probe_timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(config.run_timeout, None);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Settings::build(&dir.path().join("absent.toml"), true, None).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_invalid_tool_definition_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[tools.broken]\nrequired_version = \" \"\n").unwrap();

        let settings = Settings::build(&path, true, None).unwrap();
        let err = settings.tool_spec("broken").unwrap_err();
        assert!(matches!(err, AppError::Domain(_)));
    }
}
