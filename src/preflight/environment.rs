//! Build environment checks (operating system, privileges, directories).

use std::fs;
use std::path::Path;

use super::types::CheckResult;

/// Check that builds can run on this host at all.
pub fn check_build_environment(output_dir: &Path, scratch_parent: &Path) -> Vec<CheckResult> {
    vec![
        check_linux(),
        check_root(),
        check_writable("output directory", output_dir),
        check_writable("scratch directory", scratch_parent),
    ]
}

fn check_linux() -> CheckResult {
    if cfg!(target_os = "linux") {
        CheckResult::pass("Linux host")
    } else {
        CheckResult::fail(
            "Linux host",
            &format!("rootfsbuilder must be run on Linux, not {}", std::env::consts::OS),
        )
    }
}

fn check_root() -> CheckResult {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail(
            "root privileges",
            &format!("rootfsbuilder must be run as root (euid is {})", euid),
        )
    }
}

fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    match tempfile::tempfile_in(dir) {
        Ok(_) => CheckResult::pass_with(name, &dir.display().to_string()),
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}
