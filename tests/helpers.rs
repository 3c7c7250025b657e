//! Shared test utilities for rootfsbuilder tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rootfsbuilder::{ArchiveFormat, BuildRequest, Cmd, CommandResult, LogSinks, ProcessError, Runner};

/// Directories debootstrap would leave behind that the chroot stage uses.
pub const ROOTFS_SKELETON: &[&str] = &["proc", "sys", "dev", "etc", "bin", "usr/bin"];

/// Runner that records every command instead of executing it.
///
/// debootstrap calls create [`ROOTFS_SKELETON`] in the target directory and
/// tar create calls write an empty archive, so later stages see what they
/// would on a real host.
pub struct RecordingRunner {
    calls: RefCell<Vec<Cmd>>,
    failures: Vec<(String, Option<String>)>,
    stdout: Vec<(String, String)>,
    skeleton: bool,
    hooks: Vec<Box<dyn Fn(&Cmd)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            failures: Vec::new(),
            stdout: Vec::new(),
            skeleton: true,
            hooks: Vec::new(),
        }
    }

    /// Fail calls to `program`, optionally only when an argument contains
    /// `arg_contains`.
    pub fn fail_on(mut self, program: &str, arg_contains: Option<&str>) -> Self {
        self.failures
            .push((program.to_string(), arg_contains.map(str::to_string)));
        self
    }

    /// Canned stdout for captured calls to `program`.
    pub fn with_stdout(mut self, program: &str, stdout: &str) -> Self {
        self.stdout.push((program.to_string(), stdout.to_string()));
        self
    }

    /// Leave the debootstrap target empty.
    pub fn without_skeleton(mut self) -> Self {
        self.skeleton = false;
        self
    }

    /// Run `hook` on every call, before it is answered.
    pub fn on_call(mut self, hook: impl Fn(&Cmd) + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Every call so far, rendered as command lines.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.to_string()).collect()
    }

    /// Every call to `program` so far.
    pub fn calls_to(&self, program: &str) -> Vec<Cmd> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program() == program)
            .cloned()
            .collect()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls_to(program).len()
    }

    /// Programs in call order.
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c.program().to_string())
            .collect()
    }

    fn should_fail(&self, cmd: &Cmd) -> bool {
        self.failures.iter().any(|(program, needle)| {
            cmd.program() == program
                && needle
                    .as_ref()
                    .map_or(true, |n| cmd.get_args().iter().any(|a| a.contains(n.as_str())))
        })
    }

    fn simulate(&self, cmd: &Cmd) {
        let args = cmd.get_args();
        match cmd.program() {
            "debootstrap" if self.skeleton && args.len() >= 2 => {
                create_mock_rootfs(Path::new(&args[args.len() - 2]));
            }
            "tar" if args.iter().any(|a| a.starts_with("-c")) => {
                if let Some(pos) = args.iter().position(|a| a.starts_with("-c")) {
                    if let Some(out) = args.get(pos + 1) {
                        let _ = fs::write(out, b"");
                    }
                }
            }
            _ => {}
        }
    }

    fn answer(&self, cmd: &Cmd) -> Result<CommandResult, ProcessError> {
        self.calls.borrow_mut().push(cmd.clone());
        for hook in &self.hooks {
            hook(cmd);
        }

        if self.should_fail(cmd) {
            return Err(ProcessError::Failed {
                program: cmd.program().to_string(),
                code: Some(1),
                stderr_tail: format!("mock failure of {}", cmd.program()),
            });
        }

        self.simulate(cmd);
        let stdout = self
            .stdout
            .iter()
            .find(|(program, _)| program == cmd.program())
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        Ok(CommandResult {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

impl Runner for RecordingRunner {
    fn stream(&self, cmd: &Cmd, sinks: &mut LogSinks) -> Result<(), ProcessError> {
        let result = self.answer(cmd)?;
        sinks.out.write_all(result.stdout.as_bytes()).unwrap();
        Ok(())
    }

    fn capture(&self, cmd: &Cmd) -> Result<CommandResult, ProcessError> {
        self.answer(cmd)
    }
}

/// In-memory sink that can be inspected after being handed to [`LogSinks`].
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A request with only the required fields set.
pub fn sample_request(architecture: &str) -> BuildRequest {
    BuildRequest {
        name: "test".to_string(),
        distribution: "debian".to_string(),
        release: "bookworm".to_string(),
        architecture: architecture.to_string(),
        mirror: "http://deb.debian.org/debian".to_string(),
        variant: Some("minbase".to_string()),
        include: Vec::new(),
        exclude: Vec::new(),
        components: Vec::new(),
        payload: None,
        post_install_command: None,
        use_host_resolv_conf: false,
        output_format: ArchiveFormat::TarGz,
        source_dir: PathBuf::from("."),
    }
}

/// Create the directories debootstrap leaves in a new tree.
pub fn create_mock_rootfs(rootfs: &Path) {
    for dir in ROOTFS_SKELETON {
        fs::create_dir_all(rootfs.join(dir)).expect("Failed to create mock rootfs dir");
    }
}

/// Create a mock executable file.
pub fn create_mock_binary(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir for binary");
    }

    fs::write(path, "#!/bin/sh\necho mock\n").expect("Failed to create mock binary");

    let mut perms = fs::metadata(path).expect("Failed to get metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to set permissions");
}

/// Number of entries directly inside `dir`.
pub fn entry_count(dir: &Path) -> usize {
    fs::read_dir(dir).expect("Failed to read dir").count()
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Path to a file under `tests/testdata`.
pub fn testdata(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/testdata")
        .join(name)
}
