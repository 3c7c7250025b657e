//! Host tool availability checks.

use super::types::CheckResult;

/// Tools every build runs: (command, package, purpose).
pub const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("debootstrap", "debootstrap", "Required to populate the rootfs"),
    ("tar", "tar", "Required to extract payloads and create tarballs"),
    ("mount", "mount", "Required to mount proc, sys and dev for chroot"),
    ("umount", "mount", "Required to unmount after chroot"),
    ("chroot", "coreutils", "Required to run post install commands"),
];

/// Tools that can be worked around.
pub const OPTIONAL_TOOLS: &[(&str, &str, &str)] = &[(
    "dpkg",
    "dpkg",
    "Used to detect the host architecture (or pass --host-arch)",
)];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    let required = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true));
    let optional = OPTIONAL_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, false));
    required.chain(optional).collect()
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        Err(_) => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
