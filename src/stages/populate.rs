//! debootstrap invocation.

use std::path::Path;

use tracing::info;

use crate::config::BuildRequest;
use crate::error::BuildError;
use crate::process::{Cmd, LogSinks, Runner};

/// Build the debootstrap command line for `request` targeting `rootfs`.
///
/// Flags first, then release, target directory and mirror.
pub fn debootstrap_command(request: &BuildRequest, rootfs: &Path) -> Cmd {
    let mut cmd = Cmd::new("debootstrap");

    if let Some(variant) = &request.variant {
        cmd = cmd.arg(format!("--variant={}", variant));
    }
    cmd = cmd.arg(format!("--arch={}", request.architecture));

    if !request.include.is_empty() {
        cmd = cmd.arg(format!("--include={}", request.include.join(",")));
    }
    if !request.exclude.is_empty() {
        cmd = cmd.arg(format!("--exclude={}", request.exclude.join(",")));
    }
    if !request.components.is_empty() {
        cmd = cmd.arg(format!("--components={}", request.components.join(",")));
    }

    cmd.arg(&request.release)
        .arg_path(rootfs)
        .arg(&request.mirror)
}

/// Populate `rootfs` with a base system.
pub fn populate<R: Runner>(
    runner: &R,
    request: &BuildRequest,
    rootfs: &Path,
    sinks: &mut LogSinks,
) -> Result<(), BuildError> {
    let cmd = debootstrap_command(request, rootfs);
    info!("Running debootstrap with args: {}", cmd);
    runner
        .stream(&cmd, sinks)
        .map_err(BuildError::PopulationFailed)
}
