//! Architecture translation and qemu-static lookup.
//!
//! Debian names architectures differently from qemu. The table below is the
//! only place the two naming schemes meet.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::BuildError;
use crate::process::{Cmd, Runner};

/// Debian package architecture to qemu-static architecture.
///
/// See https://wiki.debian.org/SupportedArchitectures
pub const QEMU_ARCH_MAP: &[(&str, &str)] = &[
    ("amd64", "x86_64"),
    ("i386", "i386"),
    ("arm64", "aarch64"),
    ("armel", "arm"),
    ("armhf", "arm"),
    ("mips", "mips"),
    ("mipsel", "mipsel"),
    ("mips64el", "mips64el"),
    ("ppc64el", "ppc64le"),
    ("s390x", "s390x"),
];

/// Translate a Debian architecture name to its qemu equivalent.
pub fn deb_to_qemu_arch(deb_arch: &str) -> Result<&'static str, BuildError> {
    QEMU_ARCH_MAP
        .iter()
        .find(|(deb, _)| *deb == deb_arch)
        .map(|(_, qemu)| *qemu)
        .ok_or_else(|| BuildError::UnsupportedArchitecture(deb_arch.to_string()))
}

/// Returns true if `deb_arch` is in the translation table.
pub fn is_supported(deb_arch: &str) -> bool {
    deb_to_qemu_arch(deb_arch).is_ok()
}

/// Name of the qemu user-mode emulator for a Debian architecture.
pub fn qemu_binary_name(deb_arch: &str) -> Result<String, BuildError> {
    Ok(format!("qemu-{}-static", deb_to_qemu_arch(deb_arch)?))
}

/// Ask dpkg for the host's native architecture.
pub fn detect_host_architecture<R: Runner>(runner: &R) -> Result<String, BuildError> {
    let result = runner
        .capture(&Cmd::new("dpkg").arg("--print-architecture"))
        .map_err(|e| BuildError::HostDetectionFailed(e.to_string()))?;

    let arch = result.stdout_trimmed();
    if arch.is_empty() {
        return Err(BuildError::HostDetectionFailed(
            "dpkg --print-architecture printed nothing".to_string(),
        ));
    }
    Ok(arch.to_string())
}

/// A qemu-static binary found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationBinary {
    /// Absolute path on the host.
    pub path: PathBuf,
    /// File name, e.g. `qemu-aarch64-static`.
    pub name: String,
}

impl EmulationBinary {
    /// Where the binary lives inside the target tree while staged.
    pub fn path_in_root(&self) -> String {
        format!("/usr/bin/{}", self.name)
    }
}

/// Locate the qemu-static binary for `deb_arch` in an explicit search path.
///
/// Read-only: nothing on disk is touched.
pub fn resolve_emulation_in(
    deb_arch: &str,
    search_path: Option<OsString>,
) -> Result<EmulationBinary, BuildError> {
    let name = qemu_binary_name(deb_arch)?;
    let not_found = || BuildError::EmulationBinaryNotFound {
        binary: name.clone(),
    };

    let search_path = search_path.ok_or_else(not_found)?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let path = which::which_in(&name, Some(search_path), cwd).map_err(|_| not_found())?;

    Ok(EmulationBinary { path, name })
}
