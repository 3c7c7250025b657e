//! Build orchestration.
//!
//! One [`Builder`] drives one [`BuildRequest`] through the pipeline:
//!
//! ```text
//! resolve -> scratch -> populate -> [payload] -> [chroot] -> package
//! ```
//!
//! Emulation is resolved before anything is written to disk. The scratch
//! directory is removed at the end of every build, whatever the outcome.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::arch::{self, resolve_emulation_in, EmulationBinary};
use crate::common::ScratchDir;
use crate::config::BuildRequest;
use crate::error::{BuildError, Stage};
use crate::process::{LogSinks, Runner};
use crate::stages::chroot::{Chroot, HOST_RESOLV_CONF};
use crate::stages::{package, payload, populate};
use crate::timing::Timer;

/// State owned by one in-flight build.
#[derive(Debug)]
pub struct BuildContext {
    pub scratch: ScratchDir,
    /// Set when the target architecture differs from the host's.
    pub emulation: Option<EmulationBinary>,
}

impl BuildContext {
    pub fn rootfs(&self) -> &Path {
        self.scratch.path()
    }
}

/// Builds one root filesystem tarball.
pub struct Builder<'a, R: Runner> {
    request: &'a BuildRequest,
    host_arch: &'a str,
    runner: &'a R,
    output_dir: PathBuf,
    scratch_parent: PathBuf,
    search_path: Option<OsString>,
    host_resolv_conf: PathBuf,
}

impl<'a, R: Runner> Builder<'a, R> {
    pub fn new(request: &'a BuildRequest, host_arch: &'a str, runner: &'a R) -> Self {
        Self {
            request,
            host_arch,
            runner,
            output_dir: PathBuf::from("."),
            scratch_parent: std::env::temp_dir(),
            search_path: std::env::var_os("PATH"),
            host_resolv_conf: PathBuf::from(HOST_RESOLV_CONF),
        }
    }

    /// Directory the tarball is written to.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Directory scratch trees are created in.
    pub fn scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = dir.into();
        self
    }

    /// Search path used to find qemu-static (defaults to `PATH`).
    pub fn search_path(mut self, path: Option<OsString>) -> Self {
        self.search_path = path;
        self
    }

    /// Resolver configuration copied in when the request asks for it.
    pub fn host_resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_resolv_conf = path.into();
        self
    }

    pub fn needs_emulation(&self) -> bool {
        self.request.architecture != self.host_arch
    }

    /// Fail if the target can only be built under an emulator this crate
    /// has no mapping for. Native builds accept any architecture.
    pub fn check_architecture(&self) -> Result<(), BuildError> {
        if self.needs_emulation() && !arch::is_supported(&self.request.architecture) {
            return Err(BuildError::UnsupportedArchitecture(
                self.request.architecture.clone(),
            ));
        }
        Ok(())
    }

    /// Stages this request will pass through, in order.
    pub fn plan(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Resolve, Stage::Scratch, Stage::Populate];
        if self.request.payload.is_some() {
            stages.push(Stage::Payload);
        }
        if self.request.needs_chroot() {
            stages.push(Stage::Chroot);
        }
        stages.push(Stage::Package);
        stages
    }

    /// Run the whole pipeline and return the tarball path.
    pub fn build(&self, sinks: &mut LogSinks) -> Result<PathBuf, BuildError> {
        let mut context = self.prepare()?;
        let result = self.run_stages(&context, sinks);
        context.scratch.cleanup();
        result
    }

    /// Decide on emulation, then allocate the scratch directory.
    ///
    /// A missing emulator fails here, before any filesystem mutation.
    pub fn prepare(&self) -> Result<BuildContext, BuildError> {
        let emulation = self.run_stage(Stage::Resolve, || {
            self.check_architecture()?;
            if !self.needs_emulation() {
                return Ok(None);
            }
            info!(
                "Architecture '{}' is not the same as the host architecture '{}', using qemu-static",
                self.request.architecture, self.host_arch
            );
            resolve_emulation_in(&self.request.architecture, self.search_path.clone()).map(Some)
        })?;

        let scratch = self.run_stage(Stage::Scratch, || {
            ScratchDir::create_in(&self.scratch_parent).map_err(|source| {
                BuildError::ScratchDirFailed {
                    parent: self.scratch_parent.clone(),
                    source,
                }
            })
        })?;

        Ok(BuildContext { scratch, emulation })
    }

    fn run_stages(&self, context: &BuildContext, sinks: &mut LogSinks) -> Result<PathBuf, BuildError> {
        let plan = self.plan();
        let rootfs = context.rootfs();

        self.run_stage(Stage::Populate, || {
            populate::populate(self.runner, self.request, rootfs, sinks)
        })?;

        if plan.contains(&Stage::Payload) {
            self.run_stage(Stage::Payload, || {
                payload::extract_for(self.runner, self.request, rootfs, sinks)
            })?;
        }

        if plan.contains(&Stage::Chroot) {
            let chroot = Chroot::for_request(
                rootfs,
                self.request,
                context.emulation.as_ref(),
                &self.host_resolv_conf,
            );
            self.run_stage(Stage::Chroot, || chroot.run(self.runner, sinks))?;
        }

        self.run_stage(Stage::Package, || {
            package::package(self.runner, self.request, rootfs, &self.output_dir, sinks)
        })
    }

    fn run_stage<T>(
        &self,
        stage: Stage,
        f: impl FnOnce() -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        let timer = Timer::start(stage.as_str());
        let result = f();
        match &result {
            Ok(_) => timer.finish(),
            Err(e) => warn!(%stage, "stage failed: {}", e),
        }
        result
    }
}
