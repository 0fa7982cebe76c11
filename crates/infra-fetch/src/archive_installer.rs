// Archive tool installer
// reason: tar + flate2 for .tar / .tar.gz; extraction runs on the blocking pool
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rigger_core::domain::{Platform, ToolSpec};
use rigger_core::port::{InstallError, ToolInstaller};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Installs tools under `<install_root>/<name>/<version>/`
///
/// Archives are unpacked into a staging directory next to the target and
/// moved into place only once the expected binary is present, so a failed
/// install never leaves a half-populated version directory.
#[derive(Debug, Clone)]
pub struct ArchiveToolInstaller {
    install_root: PathBuf,
}

impl ArchiveToolInstaller {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Directory dedicated to the required version of `spec`
    pub fn version_dir(&self, spec: &ToolSpec) -> PathBuf {
        self.install_root
            .join(spec.name())
            .join(spec.required_version())
    }
}

#[async_trait]
impl ToolInstaller for ArchiveToolInstaller {
    fn find_installed(&self, spec: &ToolSpec, platform: Platform) -> Option<PathBuf> {
        let binary = self.version_dir(spec).join(spec.bootstrap_binary_path(platform)?);
        binary.is_file().then_some(binary)
    }

    async fn install(
        &self,
        spec: &ToolSpec,
        platform: Platform,
        archive: Vec<u8>,
    ) -> Result<PathBuf, InstallError> {
        let binary_path = spec
            .bootstrap_binary_path(platform)
            .ok_or(InstallError::NoTarget(platform))?;
        let version_dir = self.version_dir(spec);

        info!(
            tool = %spec.name(),
            version = %spec.required_version(),
            dir = %version_dir.display(),
            size = archive.len(),
            "Installing tool"
        );

        tokio::task::spawn_blocking(move || install_archive(&archive, &version_dir, &binary_path))
            .await
            .map_err(|e| InstallError::Io(format!("install task failed: {}", e)))?
    }
}

fn install_archive(
    archive: &[u8],
    version_dir: &Path,
    binary_path: &str,
) -> Result<PathBuf, InstallError> {
    let parent = version_dir
        .parent()
        .ok_or_else(|| InstallError::Io(format!("{} has no parent", version_dir.display())))?;
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!(".staging-{}", Uuid::new_v4()));
    fs::create_dir(&staging)?;
    debug!(staging = %staging.display(), "Extracting into staging directory");

    if let Err(e) = unpack(archive, &staging).and_then(|_| require_binary(&staging, binary_path)) {
        discard(&staging);
        return Err(e);
    }

    if version_dir.exists() {
        if let Err(e) = fs::remove_dir_all(version_dir) {
            discard(&staging);
            return Err(e.into());
        }
    }
    if let Err(e) = fs::rename(&staging, version_dir) {
        discard(&staging);
        // Lost a race against a concurrent install of the same version
        if version_dir.join(binary_path).is_file() {
            warn!(dir = %version_dir.display(), "Version directory appeared during install, keeping it");
        } else {
            return Err(e.into());
        }
    }

    let binary = version_dir.join(binary_path);
    make_executable(&binary)?;
    info!(binary = %binary.display(), "Tool installed");
    Ok(binary)
}

/// Unpack a tar archive, gzip-compressed or not
fn unpack(archive: &[u8], into: &Path) -> Result<(), InstallError> {
    let result = if archive.starts_with(&GZIP_MAGIC) {
        tar::Archive::new(GzDecoder::new(archive)).unpack(into)
    } else {
        tar::Archive::new(archive).unpack(into)
    };
    result.map_err(|e| InstallError::Extract(e.to_string()))
}

fn require_binary(root: &Path, binary_path: &str) -> Result<(), InstallError> {
    let binary = root.join(binary_path);
    if binary.is_file() {
        Ok(())
    } else {
        Err(InstallError::MissingBinary(PathBuf::from(binary_path)))
    }
}

fn discard(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!(staging = %staging.display(), error = %e, "Failed to remove staging directory");
    }
}

#[cfg(unix)]
fn make_executable(binary: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(binary, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_binary: &Path) -> Result<(), InstallError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rigger_core::domain::BootstrapTarget;
    use tempfile::tempdir;

    fn spec() -> ToolSpec {
        ToolSpec::builder("fake", "1.2.0")
            .bootstrap(
                Platform::Linux,
                BootstrapTarget::new("https://example.invalid/{name}.tar.gz", "{name}-{version}/bin/{name}"),
            )
            .build()
            .unwrap()
    }

    fn tar_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn leftovers(root: &Path) -> Vec<String> {
        fs::read_dir(root.join("fake"))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with(".staging-"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_install_tar_gz() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());
        let archive = gzip(&tar_with(&[("fake-1.2.0/bin/fake", "#!/bin/sh\n")]));

        let binary = installer.install(&spec(), Platform::Linux, archive).await.unwrap();

        assert_eq!(binary, root.path().join("fake/1.2.0/fake-1.2.0/bin/fake"));
        assert_eq!(fs::read(&binary).unwrap(), b"#!/bin/sh\n");
        assert!(leftovers(root.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_installed_binary_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());
        let archive = tar_with(&[("fake-1.2.0/bin/fake", "#!/bin/sh\n")]);

        let binary = installer.install(&spec(), Platform::Linux, archive).await.unwrap();

        let mode = fs::metadata(&binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_find_installed() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());
        assert_eq!(installer.find_installed(&spec(), Platform::Linux), None);

        let archive = tar_with(&[("fake-1.2.0/bin/fake", "x")]);
        let binary = installer.install(&spec(), Platform::Linux, archive).await.unwrap();

        assert_eq!(installer.find_installed(&spec(), Platform::Linux), Some(binary));
        assert_eq!(installer.find_installed(&spec(), Platform::Windows), None);
    }

    #[tokio::test]
    async fn test_missing_binary_leaves_nothing_behind() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());
        let archive = tar_with(&[("README", "no binary here")]);

        let err = installer.install(&spec(), Platform::Linux, archive).await.unwrap_err();

        assert_eq!(err, InstallError::MissingBinary(PathBuf::from("fake-1.2.0/bin/fake")));
        assert!(!installer.version_dir(&spec()).exists());
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());

        let err = installer
            .install(&spec(), Platform::Linux, gzip(b"definitely not a tarball"))
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Extract(_)), "{err:?}");
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_version_dir() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());

        let old = tar_with(&[("fake-1.2.0/bin/fake", "old"), ("stale.txt", "stale")]);
        installer.install(&spec(), Platform::Linux, old).await.unwrap();
        let new = tar_with(&[("fake-1.2.0/bin/fake", "new")]);
        let binary = installer.install(&spec(), Platform::Linux, new).await.unwrap();

        assert_eq!(fs::read(binary).unwrap(), b"new");
        assert!(!installer.version_dir(&spec()).join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_unremovable_old_version_discards_staging() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());
        let version_dir = installer.version_dir(&spec());
        fs::create_dir_all(version_dir.parent().unwrap()).unwrap();
        // A plain file where the version directory belongs cannot be removed as a directory
        fs::write(&version_dir, b"in the way").unwrap();

        let archive = tar_with(&[("fake-1.2.0/bin/fake", "x")]);
        let err = installer.install(&spec(), Platform::Linux, archive).await.unwrap_err();

        assert!(matches!(err, InstallError::Io(_)), "{err:?}");
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_no_target_for_platform() {
        let root = tempdir().unwrap();
        let installer = ArchiveToolInstaller::new(root.path());

        let err = installer
            .install(&spec(), Platform::MacOs, b"x".to_vec())
            .await
            .unwrap_err();

        assert_eq!(err, InstallError::NoTarget(Platform::MacOs));
    }
}
