//! Preflight command - runs preflight checks.

use anyhow::Result;

use rootfsbuilder::preflight;
use rootfsbuilder::Settings;

/// Execute the preflight command.
pub fn cmd_preflight(settings: &Settings, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(settings)?;
        println!("All preflight checks passed!");
    } else {
        let report = preflight::run_preflight(settings);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with a non-zero exit code.");
        }
    }
    Ok(())
}
