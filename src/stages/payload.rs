//! Payload extraction into the root of the new tree.

use std::path::Path;

use tracing::info;

use crate::config::{ArchiveFormat, BuildRequest};
use crate::error::BuildError;
use crate::process::{Cmd, LogSinks, Runner};

/// Build the tar command that unpacks `archive` into `rootfs`,
/// preserving permissions.
pub fn extract_command(archive: &Path, format: ArchiveFormat, rootfs: &Path) -> Cmd {
    let flags = if format.is_gzip() { "-xzpf" } else { "-xpf" };
    Cmd::new("tar")
        .arg(flags)
        .arg_path(archive)
        .arg("-C")
        .arg_path(rootfs)
}

/// Extract `archive` into `rootfs`.
pub fn extract<R: Runner>(
    runner: &R,
    archive: &Path,
    format: ArchiveFormat,
    rootfs: &Path,
    sinks: &mut LogSinks,
) -> Result<(), BuildError> {
    let cmd = extract_command(archive, format, rootfs);
    info!("Extracting payload {}", archive.display());
    runner
        .stream(&cmd, sinks)
        .map_err(|source| BuildError::PayloadExtractionFailed {
            path: archive.to_path_buf(),
            source,
        })
}

/// Extract the request's payload, if it has one.
///
/// Relative payload paths resolve against the configuration's directory,
/// not the working directory.
pub fn extract_for<R: Runner>(
    runner: &R,
    request: &BuildRequest,
    rootfs: &Path,
    sinks: &mut LogSinks,
) -> Result<(), BuildError> {
    match (&request.payload, request.payload_path()) {
        (Some(payload), Some(path)) => extract(runner, &path, payload.format, rootfs, sinks),
        _ => Ok(()),
    }
}
