//! rootfsbuilder - Debian/Ubuntu root filesystem tarballs.
//!
//! Drives debootstrap into a scratch directory, optionally extracts a
//! payload, optionally runs a post install command inside the tree (under
//! qemu-static when the target architecture is foreign), and packs the
//! result into a tarball.
//!
//! ```text
//! Builder
//!     ├── arch        Debian -> qemu architecture, qemu-static lookup
//!     ├── populate    debootstrap
//!     ├── payload     tar -x into the tree
//!     ├── chroot      mount -> stage qemu -> chroot -> unstage -> umount
//!     └── package     tar -c --xattrs --acls
//! ```

pub mod arch;
pub mod builder;
pub mod common;
pub mod config;
pub mod error;
pub mod preflight;
pub mod process;
pub mod stages;
pub mod timing;

pub use builder::{BuildContext, Builder};
pub use config::{ArchiveFormat, BuildRequest, Payload, Settings};
pub use error::{BuildError, ProcessError, Stage};
pub use process::{Cmd, CommandResult, LogSinks, Runner, SystemRunner};
