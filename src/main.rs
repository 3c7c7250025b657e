//! rootfsbuilder - build Debian/Ubuntu rootfs tarballs.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rootfsbuilder::Settings;

#[derive(Parser)]
#[command(name = "rootfsbuilder")]
#[command(about = "Build Debian/Ubuntu rootfs tarballs with debootstrap")]
#[command(
    after_help = "QUICK START:\n  rootfsbuilder preflight          Check the host\n  rootfsbuilder validate cfg.json  Check a configuration\n  rootfsbuilder build cfg.json     Build a tarball (as root)"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one tarball per configuration file, in order
    Build {
        /// Configuration files (JSON)
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Where tarballs are written (default: current directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Parent directory for scratch trees (default: system temp dir)
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Host architecture in Debian naming; skips dpkg detection
        #[arg(long)]
        host_arch: Option<String>,

        /// Keep building remaining configurations after a failure
        #[arg(long)]
        keep_going: bool,

        /// Skip host checks (root, tools, writable directories)
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Load and validate configuration files without building
    Validate {
        /// Configuration files (JSON)
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Host architecture in Debian naming; skips dpkg detection
        #[arg(long)]
        host_arch: Option<String>,
    },

    /// Run preflight checks
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let base_dir = std::env::current_dir()?;
    let mut settings = Settings::from_env(&base_dir);

    match cli.command {
        Commands::Build {
            configs,
            output_dir,
            scratch_dir,
            host_arch,
            keep_going,
            skip_preflight,
        } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            if let Some(dir) = scratch_dir {
                settings.scratch_parent = dir;
            }
            let options = commands::build::BuildOptions {
                host_arch,
                keep_going,
                skip_preflight,
            };
            commands::cmd_build(&configs, &settings, &options)?;
        }

        Commands::Validate { configs, host_arch } => {
            commands::cmd_validate(&configs, host_arch.as_deref())?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&settings, strict)?;
        }
    }

    Ok(())
}
