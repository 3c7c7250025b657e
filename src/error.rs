//! Error types for the build pipeline.
//!
//! Every failure is classified by the stage that produced it. Cleanup
//! failures (unmount, binary removal) never replace the failure that
//! triggered the unwind; they ride along in [`BuildError::Unwind`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Host/target architecture decision and emulation lookup.
    Resolve,
    /// Scratch directory allocation.
    Scratch,
    /// debootstrap into the scratch directory.
    Populate,
    /// Optional payload extraction.
    Payload,
    /// Mount, customize and unmount.
    Chroot,
    /// Tarball creation.
    Package,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Scratch => "scratch",
            Self::Populate => "populate",
            Self::Payload => "payload",
            Self::Chroot => "chroot",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to execute '{program}'. Is it installed? ({source})")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' failed ({}){}", exit_label(.code), stderr_suffix(.stderr_tail))]
    Failed {
        program: String,
        /// `None` when the child was killed by a signal.
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("lost contact with '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Exit code of the failed child, if it exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn stderr_suffix(tail: &str) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{}", tail)
    }
}

/// Classified build failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("architecture '{0}' not found in the package to qemu-static architecture table")]
    UnsupportedArchitecture(String),

    #[error("could not determine host architecture: {0}")]
    HostDetectionFailed(String),

    #[error("binary '{binary}' not found in PATH")]
    EmulationBinaryNotFound { binary: String },

    #[error("could not create scratch directory under {}: {source}", .parent.display())]
    ScratchDirFailed {
        parent: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("debootstrap failed: {0}")]
    PopulationFailed(#[source] ProcessError),

    #[error("extracting payload {} failed: {source}", .path.display())]
    PayloadExtractionFailed {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("mounting {} failed: {source}", .target.display())]
    MountFailed {
        target: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("copying host resolv.conf to {} failed: {source}", .target.display())]
    ResolvConfCopyFailed {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("staging emulation binary at {} failed: {source}", .path.display())]
    BinaryStageFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("post install command '{command}' failed: {source}")]
    ExecutionFailed {
        command: String,
        #[source]
        source: ProcessError,
    },

    #[error("removing emulation binary {} failed: {source}", .path.display())]
    BinaryUnstageFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unmounting {} failed: {source}", .target.display())]
    UnmountFailed {
        target: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("creating tarball {} failed: {source}", .path.display())]
    PackagingFailed {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("{primary}{}", cleanup_suffix(.cleanup))]
    Unwind {
        primary: Box<BuildError>,
        cleanup: Vec<BuildError>,
    },
}

fn cleanup_suffix(cleanup: &[BuildError]) -> String {
    cleanup
        .iter()
        .map(|e| format!("\n  cleanup also failed: {}", e))
        .collect()
}

impl BuildError {
    /// The failure that started the unwind.
    pub fn primary(&self) -> &BuildError {
        match self {
            Self::Unwind { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Failures from cleanup steps that ran after the primary failure.
    pub fn cleanup_failures(&self) -> &[BuildError] {
        match self {
            Self::Unwind { cleanup, .. } => cleanup,
            _ => &[],
        }
    }

    /// Stage the primary failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Unwind { primary, .. } => primary.stage(),
            Self::UnsupportedArchitecture(_)
            | Self::HostDetectionFailed(_)
            | Self::EmulationBinaryNotFound { .. } => Stage::Resolve,
            Self::ScratchDirFailed { .. } => Stage::Scratch,
            Self::PopulationFailed(_) => Stage::Populate,
            Self::PayloadExtractionFailed { .. } => Stage::Payload,
            Self::MountFailed { .. }
            | Self::ResolvConfCopyFailed { .. }
            | Self::BinaryStageFailed { .. }
            | Self::ExecutionFailed { .. }
            | Self::BinaryUnstageFailed { .. }
            | Self::UnmountFailed { .. } => Stage::Chroot,
            Self::PackagingFailed { .. } => Stage::Package,
        }
    }

    /// Combine an outcome with the failures of cleanup steps that ran after it.
    ///
    /// The original failure stays primary. If the outcome succeeded, the
    /// first cleanup failure becomes primary.
    pub fn settle(
        outcome: Result<(), BuildError>,
        cleanup: Vec<BuildError>,
    ) -> Result<(), BuildError> {
        let mut cleanup = cleanup.into_iter();
        let primary = match outcome {
            Err(e) => e,
            Ok(()) => match cleanup.next() {
                Some(e) => e,
                None => return Ok(()),
            },
        };
        let rest: Vec<BuildError> = cleanup.collect();
        if rest.is_empty() {
            return Err(primary);
        }
        match primary {
            Self::Unwind {
                primary,
                cleanup: mut earlier,
            } => {
                earlier.extend(rest);
                Err(Self::Unwind {
                    primary,
                    cleanup: earlier,
                })
            }
            primary => Err(Self::Unwind {
                primary: Box::new(primary),
                cleanup: rest,
            }),
        }
    }
}
