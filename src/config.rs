//! Build configuration.
//!
//! A build is described by one JSON file (`config_version: 1`). Loading a
//! file yields a validated [`BuildRequest`]; the rest of the crate never sees
//! raw configuration.
//!
//! Host-level settings (output and scratch locations) come from the
//! environment, optionally seeded from a `.env` file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Only supported configuration file version.
pub const CONFIG_VERSION_V1: u32 = 1;

/// Environment variable overriding the output directory.
pub const ENV_OUTPUT_DIR: &str = "ROOTFSBUILDER_OUTPUT_DIR";
/// Environment variable overriding the parent of scratch directories.
pub const ENV_SCRATCH_DIR: &str = "ROOTFSBUILDER_SCRATCH_DIR";

/// Tarball flavour, used for both the output archive and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }

    pub fn is_gzip(&self) -> bool {
        matches!(self, Self::TarGz)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tar" => Ok(Self::Tar),
            "tar.gz" => Ok(Self::TarGz),
            other => bail!("expected 'tar' or 'tar.gz', got '{}'", other),
        }
    }
}

/// Archive extracted into the root of the new tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Path as written in the configuration, relative to `source_dir`.
    pub path: PathBuf,
    pub format: ArchiveFormat,
}

/// Immutable, validated description of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub name: String,
    /// Lowercased, e.g. `debian`.
    pub distribution: String,
    pub release: String,
    /// Debian architecture name, e.g. `arm64`.
    pub architecture: String,
    pub mirror: String,
    /// debootstrap `--variant`, e.g. `minbase`.
    pub variant: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub components: Vec<String>,
    pub payload: Option<Payload>,
    /// Shell command run inside the tree via chroot.
    pub post_install_command: Option<String>,
    /// Copy the host's `/etc/resolv.conf` into the tree before customizing.
    pub use_host_resolv_conf: bool,
    pub output_format: ArchiveFormat,
    /// Directory relative payload paths are resolved against.
    pub source_dir: PathBuf,
}

impl BuildRequest {
    /// Absolute (or `source_dir`-relative) location of the payload archive.
    pub fn payload_path(&self) -> Option<PathBuf> {
        self.payload
            .as_ref()
            .map(|payload| self.source_dir.join(&payload.path))
    }

    /// Whether the chroot lifecycle has anything to do.
    pub fn needs_chroot(&self) -> bool {
        self.post_install_command.is_some() || self.use_host_resolv_conf
    }
}

/// On-disk layout of a version 1 configuration file.
#[derive(Debug, Deserialize)]
struct ConfigFileV1 {
    config_version: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    distribution: String,
    #[serde(default)]
    release: String,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    mirror: String,
    #[serde(default)]
    tarball_type: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    additional_packages: Vec<String>,
    #[serde(default)]
    excluded_packages: Vec<String>,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    payload_type: Option<String>,
    #[serde(default)]
    use_hosts_resolv_conf: bool,
    #[serde(default)]
    post_install_command: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ConfigFileV1 {
    fn into_request(self, source_dir: PathBuf) -> Result<BuildRequest> {
        if self.config_version != CONFIG_VERSION_V1 {
            bail!(
                "unsupported configuration version in config with name '{}': {}",
                self.name,
                self.config_version
            );
        }

        let required = [
            ("name", &self.name),
            ("distribution", &self.distribution),
            ("release", &self.release),
            ("architecture", &self.architecture),
            ("mirror", &self.mirror),
            ("tarball_type", &self.tarball_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                bail!("{} is required", field);
            }
        }

        let output_format: ArchiveFormat =
            self.tarball_type.to_lowercase().parse().with_context(|| {
                format!("unsupported tarball type in config with name '{}'", self.name)
            })?;

        let payload_format = match non_empty(self.payload_type) {
            Some(kind) => kind.parse().with_context(|| {
                format!("unsupported payload type in config with name '{}'", self.name)
            })?,
            None => ArchiveFormat::Tar,
        };

        Ok(BuildRequest {
            name: self.name,
            distribution: self.distribution.to_lowercase(),
            release: self.release,
            architecture: self.architecture,
            mirror: self.mirror,
            variant: non_empty(self.variant),
            include: self.additional_packages,
            exclude: self.excluded_packages,
            components: self.components,
            payload: non_empty(self.payload).map(|path| Payload {
                path: PathBuf::from(path),
                format: payload_format,
            }),
            post_install_command: non_empty(self.post_install_command),
            use_host_resolv_conf: self.use_hosts_resolv_conf,
            output_format,
            source_dir,
        })
    }
}

/// Parse and validate a single configuration file.
pub fn parse_configuration(path: &Path) -> Result<BuildRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("opening configuration file {}", path.display()))?;

    let raw: ConfigFileV1 = serde_json::from_str(&content)
        .with_context(|| format!("parsing configuration file {}", path.display()))?;

    let source_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    raw.into_request(source_dir).with_context(|| {
        format!(
            "checking required fields in configuration file {}",
            path.display()
        )
    })
}

/// Load every configuration, failing on the first invalid one.
///
/// Only regular files are accepted.
pub fn load_configurations(paths: &[PathBuf]) -> Result<Vec<BuildRequest>> {
    let mut requests = Vec::with_capacity(paths.len());

    for path in paths {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!(
                    "configuration file or directory '{}' does not exist",
                    path.display()
                )
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading path status of {}", path.display()))
            }
        };

        if metadata.is_dir() {
            bail!("path is a directory, not a file: {}", path.display());
        }

        requests.push(parse_configuration(path)?);
    }

    Ok(requests)
}

/// Host-level settings shared by every build in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where finished tarballs are written.
    pub output_dir: PathBuf,
    /// Parent directory for per-build scratch directories.
    pub scratch_parent: PathBuf,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// Relative paths are taken relative to `base_dir`.
    pub fn from_env(base_dir: &Path) -> Self {
        let resolve = |value: String| {
            let path = PathBuf::from(value);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let output_dir = std::env::var(ENV_OUTPUT_DIR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(resolve)
            .unwrap_or_else(|| base_dir.to_path_buf());

        let scratch_parent = std::env::var(ENV_SCRATCH_DIR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(resolve)
            .unwrap_or_else(std::env::temp_dir);

        Self {
            output_dir,
            scratch_parent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> ConfigFileV1 {
        serde_json::from_str(json).unwrap()
    }

    const FULL: &str = r#"{
        "config_version": 1,
        "name": "test",
        "distribution": "Debian",
        "release": "bookworm",
        "architecture": "arm64",
        "mirror": "http://deb.debian.org/debian",
        "tarball_type": "TAR.GZ",
        "variant": "minbase",
        "additional_packages": ["openssh-server", "sudo"],
        "components": ["main", "contrib"],
        "payload": "payload.tar.gz",
        "payload_type": "tar.gz",
        "use_hosts_resolv_conf": true,
        "post_install_command": "apt-get clean"
    }"#;

    #[test]
    fn test_full_config() {
        let req = raw(FULL).into_request(PathBuf::from("/etc/rootfs")).unwrap();

        assert_eq!(req.distribution, "debian");
        assert_eq!(req.output_format, ArchiveFormat::TarGz);
        assert_eq!(req.variant.as_deref(), Some("minbase"));
        assert_eq!(req.include, vec!["openssh-server", "sudo"]);
        assert!(req.exclude.is_empty());
        assert_eq!(
            req.payload,
            Some(Payload {
                path: PathBuf::from("payload.tar.gz"),
                format: ArchiveFormat::TarGz,
            })
        );
        assert_eq!(
            req.payload_path(),
            Some(PathBuf::from("/etc/rootfs/payload.tar.gz"))
        );
        assert!(req.needs_chroot());
    }

    #[test]
    fn test_payload_type_defaults_to_tar() {
        let req = raw(r#"{"config_version":1,"name":"n","distribution":"ubuntu","release":"jammy",
                "architecture":"amd64","mirror":"http://archive.ubuntu.com/ubuntu",
                "tarball_type":"tar","payload":"extra.tar"}"#)
        .into_request(PathBuf::from("."))
        .unwrap();

        assert!(!req.needs_chroot());
        assert_eq!(req.payload.unwrap().format, ArchiveFormat::Tar);
    }

    #[test]
    fn test_absolute_payload_path_is_kept() {
        let req = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","mirror":"m","tarball_type":"tar",
                "payload":"/srv/payload.tar"}"#)
        .into_request(PathBuf::from("/etc/rootfs"))
        .unwrap();

        assert_eq!(req.payload_path(), Some(PathBuf::from("/srv/payload.tar")));
    }

    #[test]
    fn test_empty_optional_strings_are_none() {
        let req = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","mirror":"m","tarball_type":"tar","variant":"",
                "payload":"","post_install_command":""}"#)
        .into_request(PathBuf::from("."))
        .unwrap();

        assert!(req.variant.is_none());
        assert!(req.payload.is_none());
        assert!(req.post_install_command.is_none());
    }

    #[test]
    fn test_wrong_version() {
        let err = raw(r#"{"config_version":2,"name":"n"}"#)
            .into_request(PathBuf::from("."))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported configuration version"));
    }

    #[test]
    fn test_missing_required_field() {
        let err = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","tarball_type":"tar"}"#)
        .into_request(PathBuf::from("."))
        .unwrap_err();
        assert_eq!(err.to_string(), "mirror is required");
    }

    #[test]
    fn test_bad_formats() {
        let err = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","mirror":"m","tarball_type":"zip"}"#)
        .into_request(PathBuf::from("."))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported tarball type"));

        let err = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","mirror":"m","tarball_type":"tar",
                "payload":"p","payload_type":"tar.xz"}"#)
        .into_request(PathBuf::from("."))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported payload type"));
    }

    #[test]
    fn test_payload_type_is_case_sensitive() {
        let err = raw(r#"{"config_version":1,"name":"n","distribution":"debian","release":"sid",
                "architecture":"amd64","mirror":"m","tarball_type":"TAR",
                "payload":"p","payload_type":"TAR.GZ"}"#)
        .into_request(PathBuf::from("."))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported payload type"));
    }

    #[test]
    fn test_archive_format() {
        assert_eq!("tar".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tar);
        assert!("Tar".parse::<ArchiveFormat>().is_err());
        assert_eq!(ArchiveFormat::TarGz.extension(), "tar.gz");
        assert!(ArchiveFormat::TarGz.is_gzip());
        assert!(!ArchiveFormat::Tar.is_gzip());
    }
}
