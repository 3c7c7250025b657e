//! Chroot lifecycle for post install customization.
//!
//! The sequence is fixed:
//!
//! ```text
//! mount proc, sys, dev
//!   -> copy host resolv.conf      (if requested)
//!   -> stage qemu-static          (if emulating and a command is set)
//!   -> chroot <root> [qemu] /bin/sh -c <command>
//!   -> remove qemu-static         (whenever it was staged)
//! -> unmount proc, sys, dev       (every successful mount, exactly once)
//! ```
//!
//! Mounts and the staged binary are held by guards. The happy path and
//! every error path release them explicitly so release failures can be
//! reported; the guards' `Drop` covers unwinding by panic.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::arch::EmulationBinary;
use crate::config::BuildRequest;
use crate::error::BuildError;
use crate::process::{Cmd, LogSinks, Runner};

/// Host resolver configuration copied into the tree on request.
pub const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// A kernel filesystem made visible inside the tree.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelMount {
    /// Mount point relative to the tree root.
    pub target: &'static str,
    /// `mount` arguments preceding the mount point.
    pub args: &'static [&'static str],
}

/// Mounted in this order, unmounted in this order.
pub static KERNEL_MOUNTS: [KernelMount; 3] = [
    KernelMount {
        target: "proc",
        args: &["-t", "proc", "none"],
    },
    KernelMount {
        target: "sys",
        args: &["-t", "sysfs", "none"],
    },
    KernelMount {
        target: "dev",
        args: &["-o", "bind", "/dev"],
    },
];

impl KernelMount {
    pub fn mount_point(&self, root: &Path) -> PathBuf {
        root.join(self.target)
    }

    pub fn mount_command(&self, root: &Path) -> Cmd {
        Cmd::new("mount")
            .args(self.args)
            .arg_path(&self.mount_point(root))
    }

    pub fn unmount_command(&self, root: &Path) -> Cmd {
        Cmd::new("umount").arg_path(&self.mount_point(root))
    }
}

/// Kernel filesystems currently mounted inside a tree.
struct MountGuard<'a, R: Runner> {
    runner: &'a R,
    root: &'a Path,
    active: Vec<&'static KernelMount>,
}

impl<'a, R: Runner> MountGuard<'a, R> {
    fn new(runner: &'a R, root: &'a Path) -> Self {
        Self {
            runner,
            root,
            active: Vec::new(),
        }
    }

    fn mount(&mut self, mount: &'static KernelMount) -> Result<(), BuildError> {
        let cmd = mount.mount_command(self.root);
        debug!("{}", cmd);
        self.runner
            .capture(&cmd)
            .map_err(|source| BuildError::MountFailed {
                target: mount.mount_point(self.root),
                source,
            })?;
        self.active.push(mount);
        Ok(())
    }

    /// Unmount everything that was mounted, in mount order. Every mount
    /// gets exactly one attempt, even after an earlier unmount failed.
    fn release(&mut self) -> Vec<BuildError> {
        let active = std::mem::take(&mut self.active);
        active
            .into_iter()
            .filter_map(|mount| {
                let cmd = mount.unmount_command(self.root);
                debug!("{}", cmd);
                self.runner
                    .capture(&cmd)
                    .err()
                    .map(|source| BuildError::UnmountFailed {
                        target: mount.mount_point(self.root),
                        source,
                    })
            })
            .collect()
    }
}

impl<R: Runner> Drop for MountGuard<'_, R> {
    fn drop(&mut self) {
        for err in self.release() {
            warn!("{}", err);
        }
    }
}

/// Transient copy of the emulator inside the tree.
struct StagedBinary {
    path: PathBuf,
    removed: bool,
}

impl StagedBinary {
    fn stage(root: &Path, binary: &EmulationBinary) -> Result<Self, BuildError> {
        let path = root.join("usr/bin").join(&binary.name);
        if let Err(source) = fs::copy(&binary.path, &path) {
            // A partial copy must not outlive the failed attempt.
            let _ = fs::remove_file(&path);
            return Err(BuildError::BinaryStageFailed { path, source });
        }
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn unstage(mut self) -> Result<(), BuildError> {
        self.removed = true;
        fs::remove_file(&self.path).map_err(|source| BuildError::BinaryUnstageFailed {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for StagedBinary {
    fn drop(&mut self) {
        if !self.removed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Customization of one tree.
#[derive(Debug, Clone, Copy)]
pub struct Chroot<'a> {
    root: &'a Path,
    command: Option<&'a str>,
    emulation: Option<&'a EmulationBinary>,
    resolv_conf: Option<&'a Path>,
}

impl<'a> Chroot<'a> {
    /// A lifecycle that only mounts and unmounts.
    pub fn new(root: &'a Path) -> Self {
        Self {
            root,
            command: None,
            emulation: None,
            resolv_conf: None,
        }
    }

    /// Configure from a build request.
    pub fn for_request(
        root: &'a Path,
        request: &'a BuildRequest,
        emulation: Option<&'a EmulationBinary>,
        host_resolv_conf: &'a Path,
    ) -> Self {
        let mut chroot = Self::new(root);
        chroot.command = request.post_install_command.as_deref();
        chroot.emulation = emulation;
        if request.use_host_resolv_conf {
            chroot.resolv_conf = Some(host_resolv_conf);
        }
        chroot
    }

    /// Shell command to run inside the tree.
    pub fn command(mut self, command: &'a str) -> Self {
        self.command = Some(command);
        self
    }

    /// Run the command through this emulator.
    pub fn emulation(mut self, binary: &'a EmulationBinary) -> Self {
        self.emulation = Some(binary);
        self
    }

    /// `chroot <root> [<emulator>] /bin/sh -c <command>`
    pub fn command_line(&self, command: &str) -> Cmd {
        let mut cmd = Cmd::new("chroot").arg_path(self.root);
        if let Some(binary) = self.emulation {
            cmd = cmd.arg(binary.path_in_root());
        }
        cmd.args(["/bin/sh", "-c", command])
    }

    /// Run the whole lifecycle.
    ///
    /// Mounts are released on every path. If something failed before the
    /// unmount, that failure is returned with unmount failures attached.
    pub fn run<R: Runner>(&self, runner: &R, sinks: &mut LogSinks) -> Result<(), BuildError> {
        info!("Mounting filesystems for chroot");
        let mut mounts = MountGuard::new(runner, self.root);
        let outcome = self.enter(&mut mounts, runner, sinks);

        info!("Unmounting filesystems");
        let cleanup = mounts.release();
        BuildError::settle(outcome, cleanup)
    }

    fn enter<R: Runner>(
        &self,
        mounts: &mut MountGuard<'_, R>,
        runner: &R,
        sinks: &mut LogSinks,
    ) -> Result<(), BuildError> {
        for mount in KERNEL_MOUNTS.iter() {
            mounts.mount(mount)?;
        }

        if let Some(host_path) = self.resolv_conf {
            info!("Copying resolv.conf");
            copy_resolv_conf(host_path, self.root)?;
        }

        let Some(command) = self.command else {
            return Ok(());
        };

        let staged = match self.emulation {
            Some(binary) => {
                info!("Copying {} into rootfs for script execution", binary.name);
                Some(StagedBinary::stage(self.root, binary)?)
            }
            None => None,
        };

        let cmd = self.command_line(command);
        info!("Running command '{}' in rootfs '{}'", command, cmd);
        let executed = runner
            .stream(&cmd, sinks)
            .map_err(|source| BuildError::ExecutionFailed {
                command: command.to_string(),
                source,
            });

        let unstaged = match staged {
            Some(binary) => {
                info!("Removing emulation binary from rootfs");
                binary.unstage().err()
            }
            None => None,
        };

        BuildError::settle(executed, unstaged.into_iter().collect())
    }
}

/// Replace the tree's resolv.conf with the host's.
///
/// An existing symlink is removed first so the copy can never be written
/// through an absolute link onto the host.
fn copy_resolv_conf(host_path: &Path, root: &Path) -> Result<(), BuildError> {
    let target = root.join("etc/resolv.conf");
    let fail = |source: io::Error| BuildError::ResolvConfCopyFailed {
        target: target.clone(),
        source,
    };

    if let Ok(meta) = fs::symlink_metadata(&target) {
        if meta.file_type().is_symlink() {
            fs::remove_file(&target).map_err(fail)?;
        }
    }
    fs::copy(host_path, &target).map_err(fail)?;
    Ok(())
}
