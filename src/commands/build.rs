//! Build command - builds one tarball per configuration.
//!
//! Configurations build strictly one after another; each build finishes,
//! cleanup included, before the next starts. The default is to stop at the
//! first failure.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::error;

use rootfsbuilder::config::load_configurations;
use rootfsbuilder::{arch, preflight, Builder, LogSinks, Settings, SystemRunner};

/// Flags for the build command.
pub struct BuildOptions {
    /// Skip dpkg detection and use this host architecture.
    pub host_arch: Option<String>,
    /// Build the remaining configurations after a failure.
    pub keep_going: bool,
    pub skip_preflight: bool,
}

/// Execute the build command.
pub fn cmd_build(configs: &[PathBuf], settings: &Settings, options: &BuildOptions) -> Result<()> {
    let requests = load_configurations(configs)?;

    if !options.skip_preflight {
        preflight::run_preflight_or_fail(settings)?;
    }

    let host_arch = host_architecture(options.host_arch.as_deref())?;

    fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!("creating output directory {}", settings.output_dir.display())
    })?;
    let output_dir = fs::canonicalize(&settings.output_dir).with_context(|| {
        format!("resolving output directory {}", settings.output_dir.display())
    })?;

    let runner = SystemRunner;
    let mut sinks = LogSinks::stdio();
    let mut failed = 0usize;

    for request in &requests {
        println!("Processing configuration with name '{}'", request.name);

        let result = Builder::new(request, &host_arch, &runner)
            .output_dir(&output_dir)
            .scratch_parent(&settings.scratch_parent)
            .build(&mut sinks);

        match result {
            Ok(tarball) => println!("Successfully built rootfs: {}", tarball.display()),
            Err(e) if !options.keep_going => {
                let stage = e.stage();
                return Err(e).with_context(|| {
                    format!("building rootfs '{}' failed in {} stage", request.name, stage)
                });
            }
            Err(e) => {
                error!("building rootfs '{}' failed in {} stage: {}", request.name, e.stage(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} configuration(s) failed to build", failed, requests.len());
    }
    Ok(())
}

/// Use the explicit host architecture, or ask dpkg.
pub fn host_architecture(explicit: Option<&str>) -> Result<String> {
    match explicit {
        Some(arch) => Ok(arch.to_string()),
        None => Ok(arch::detect_host_architecture(&SystemRunner)?),
    }
}
