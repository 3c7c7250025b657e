//! Tarball creation.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::config::{ArchiveFormat, BuildRequest};
use crate::error::BuildError;
use crate::process::{Cmd, LogSinks, Runner};

/// `<distribution>-<release>-<arch>-<unix seconds>.<ext>`
///
/// The timestamp only keeps repeated builds from overwriting each other.
pub fn tarball_name(request: &BuildRequest, timestamp: u64) -> String {
    format!(
        "{}-{}-{}-{}.{}",
        request.distribution,
        request.release,
        request.architecture,
        timestamp,
        request.output_format.extension()
    )
}

/// Build the tar command archiving the contents of `rootfs` (not the
/// directory itself) with xattrs and ACLs.
pub fn archive_command(rootfs: &Path, output: &Path, format: ArchiveFormat) -> Cmd {
    let flags = if format.is_gzip() { "-czpf" } else { "-cpf" };
    Cmd::new("tar")
        .args(["--xattrs", "--acls", flags])
        .arg_path(output)
        .arg("-C")
        .arg_path(rootfs)
        .arg(".")
}

/// Archive `rootfs` into `output`.
pub fn archive<R: Runner>(
    runner: &R,
    rootfs: &Path,
    output: &Path,
    format: ArchiveFormat,
    sinks: &mut LogSinks,
) -> Result<(), BuildError> {
    let cmd = archive_command(rootfs, output, format);
    info!("Running tar with args: {}", cmd);
    runner
        .stream(&cmd, sinks)
        .map_err(|source| BuildError::PackagingFailed {
            path: output.to_path_buf(),
            source,
        })
}

/// Package `rootfs` into `output_dir`, returning the tarball path.
pub fn package<R: Runner>(
    runner: &R,
    request: &BuildRequest,
    rootfs: &Path,
    output_dir: &Path,
    sinks: &mut LogSinks,
) -> Result<PathBuf, BuildError> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let output = output_dir.join(tarball_name(request, timestamp));

    archive(runner, rootfs, &output, request.output_format, sinks)?;
    Ok(output)
}
