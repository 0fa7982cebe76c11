// Host platform identification for bootstrap targets
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

/// Operating systems a tool can be bootstrapped for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    #[serde(rename = "macos")]
    MacOs,
    Windows,
}

impl Platform {
    /// Platform of the running binary, `None` on any other OS
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else {
            None
        }
    }

    /// Name of the running OS as reported by the standard library
    pub fn current_os_name() -> &'static str {
        std::env::consts::OS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
        }
    }

    /// Executable file name for this platform
    ///
    /// Windows binaries carry an `.exe` suffix; it is appended unless the
    /// base name already ends with one.
    pub fn executable_name(&self, base: &str) -> String {
        match self {
            Platform::Windows if !base.to_ascii_lowercase().ends_with(".exe") => {
                format!("{}.exe", base)
            }
            _ => base.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "macos" | "darwin" => Ok(Platform::MacOs),
            "windows" => Ok(Platform::Windows),
            other => Err(DomainError::UnknownPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_appends_exe_once() {
        assert_eq!(Platform::Windows.executable_name("git"), "git.exe");
        assert_eq!(Platform::Windows.executable_name("git.EXE"), "git.EXE");
        assert_eq!(Platform::Linux.executable_name("git"), "git");
    }

    #[test]
    fn test_parse_platform() {
        assert_eq!("Darwin".parse::<Platform>().unwrap(), Platform::MacOs);
        assert!(matches!(
            "plan9".parse::<Platform>(),
            Err(DomainError::UnknownPlatform(_))
        ));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_current_on_linux() {
        assert_eq!(Platform::current(), Some(Platform::Linux));
    }
}
