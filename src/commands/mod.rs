//! CLI command handlers.
//!
//! - `build` - Build rootfs tarballs from configuration files
//! - `validate` - Check configuration files without building
//! - `preflight` - Run host checks

pub mod build;
mod preflight;
mod validate;

pub use build::cmd_build;
pub use preflight::cmd_preflight;
pub use validate::cmd_validate;
