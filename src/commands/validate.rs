//! Validate command - checks configurations without building.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use rootfsbuilder::config::load_configurations;
use rootfsbuilder::{arch, BuildRequest, Builder, Stage, SystemRunner};

use super::build::host_architecture;

/// Execute the validate command.
pub fn cmd_validate(configs: &[PathBuf], host_arch: Option<&str>) -> Result<()> {
    let requests = load_configurations(configs)?;

    let host_arch = match host_architecture(host_arch) {
        Ok(arch) => Some(arch),
        Err(e) => {
            warn!("{:#}; emulation requirements will not be shown", e);
            None
        }
    };

    for request in &requests {
        println!("{}:", request.name);
        println!(
            "  target:   {} {} ({})",
            request.distribution, request.release, request.architecture
        );
        println!("  mirror:   {}", request.mirror);
        println!("  output:   {}", request.output_format);
        if let Some(path) = request.payload_path() {
            println!("  payload:  {}", path.display());
        }

        match &host_arch {
            Some(host_arch) => print_plan(request, host_arch)?,
            None if !arch::is_supported(&request.architecture) => warn!(
                "architecture '{}' has no qemu mapping and can only be built natively",
                request.architecture
            ),
            None => {}
        }
    }

    println!("{} configuration(s) valid", requests.len());
    Ok(())
}

fn print_plan(request: &BuildRequest, host_arch: &str) -> Result<()> {
    let builder = Builder::new(request, host_arch, &SystemRunner);
    builder.check_architecture()?;

    if builder.needs_emulation() {
        println!(
            "  emulation: {} (host is {})",
            arch::qemu_binary_name(&request.architecture)?,
            host_arch
        );
    } else {
        println!("  emulation: not required");
    }
    let stages: Vec<&str> = builder.plan().iter().map(Stage::as_str).collect();
    println!("  stages:   {}", stages.join(" -> "));
    Ok(())
}
