//! Preflight checks for rootfs builds.
//!
//! Validates the host before any build starts: Linux, root, the external
//! tools the pipeline drives, and writable output/scratch locations.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Settings;

pub use host_tools::{OPTIONAL_TOOLS, REQUIRED_TOOLS};
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(settings: &Settings) -> PreflightReport {
    let mut checks = Vec::new();

    tracing::info!("Checking build environment...");
    checks.extend(environment::check_build_environment(
        &settings.output_dir,
        &settings.scratch_parent,
    ));

    tracing::info!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(settings: &Settings) -> Result<()> {
    let report = run_preflight(settings);

    if !report.all_passed() {
        report.print();
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    tracing::info!("All preflight checks passed");
    Ok(())
}
