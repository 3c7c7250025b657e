//! External command execution.
//!
//! Every tool the builder drives (debootstrap, tar, mount, chroot, dpkg)
//! goes through a [`Runner`]. [`SystemRunner`] spawns real processes; tests
//! swap in a recording runner so the mount and cleanup sequencing can be
//! checked without root.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use crate::error::ProcessError;

/// Bytes of child stderr kept for error reports.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Result of a captured command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Exit code, `None` if terminated by signal.
    pub code: Option<i32>,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Destinations for child process output.
///
/// Output is forwarded byte-for-byte; nothing is parsed or reformatted.
pub struct LogSinks {
    pub out: Box<dyn Write + Send>,
    pub err: Box<dyn Write + Send>,
}

impl LogSinks {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            err: Box::new(err),
        }
    }

    /// Forward to this process's stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Discard everything.
    pub fn null() -> Self {
        Self::new(io::sink(), io::sink())
    }
}

/// Description of a command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn spawn_error(&self, source: io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes external commands.
pub trait Runner {
    /// Run with stdout/stderr forwarded to `sinks`. Fails on non-zero exit.
    fn stream(&self, cmd: &Cmd, sinks: &mut LogSinks) -> Result<(), ProcessError>;

    /// Run and capture output. Fails on non-zero exit.
    fn capture(&self, cmd: &Cmd) -> Result<CommandResult, ProcessError>;
}

/// Runs commands as real child processes. Blocks until the child exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn stream(&self, cmd: &Cmd, sinks: &mut LogSinks) -> Result<(), ProcessError> {
        let mut child = cmd
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| cmd.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let LogSinks { out, err } = sinks;

        // Both pipes are drained concurrently so a chatty child cannot
        // block on a full pipe.
        let stderr_tail = thread::scope(|scope| {
            let forward = scope.spawn(move || {
                if let Some(mut stdout) = stdout {
                    let _ = io::copy(&mut stdout, out);
                }
                let _ = out.flush();
            });
            let tail = match stderr {
                Some(stderr) => forward_with_tail(stderr, err.as_mut()),
                None => Ok(String::new()),
            };
            let _ = forward.join();
            tail
        });

        let status = child.wait().map_err(|source| ProcessError::Io {
            program: cmd.program.clone(),
            source,
        })?;
        let stderr_tail = stderr_tail.map_err(|source| ProcessError::Io {
            program: cmd.program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(ProcessError::Failed {
                program: cmd.program.clone(),
                code: status.code(),
                stderr_tail,
            });
        }
        Ok(())
    }

    fn capture(&self, cmd: &Cmd) -> Result<CommandResult, ProcessError> {
        let output = cmd
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| cmd.spawn_error(e))?;

        let result = CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            return Err(ProcessError::Failed {
                program: cmd.program.clone(),
                code: result.code,
                stderr_tail: tail_of(result.stderr.as_bytes()),
            });
        }
        Ok(result)
    }
}

/// Copy `reader` into `sink` verbatim, keeping the last
/// [`STDERR_TAIL_BYTES`] bytes for error reports.
fn forward_with_tail(mut reader: impl Read, sink: &mut dyn Write) -> io::Result<String> {
    let mut buf = [0u8; 8192];
    let mut tail: Vec<u8> = Vec::with_capacity(STDERR_TAIL_BYTES);
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        // A broken sink must not stall the child; keep draining.
        let _ = sink.write_all(&buf[..n]);
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > STDERR_TAIL_BYTES {
            tail.drain(..tail.len() - STDERR_TAIL_BYTES);
        }
    }
    let _ = sink.flush();
    Ok(String::from_utf8_lossy(&tail).into_owned())
}

fn tail_of(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_capture_success() {
        let result = SystemRunner.capture(&Cmd::new("echo").arg("hello")).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_capture_failure_includes_stderr() {
        let err = SystemRunner
            .capture(&Cmd::new("ls").arg("/nonexistent_path_12345"))
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
        assert!(err.code().is_some());
    }

    #[test]
    fn test_stream_forwards_both_streams_verbatim() {
        let out = Shared::default();
        let err = Shared::default();
        let mut sinks = LogSinks::new(out.clone(), err.clone());

        SystemRunner
            .stream(
                &Cmd::new("sh").args(["-c", "printf 'a\\nb'; printf 'warn\\n' >&2"]),
                &mut sinks,
            )
            .unwrap();

        assert_eq!(out.text(), "a\nb");
        assert_eq!(err.text(), "warn\n");
    }

    #[test]
    fn test_stream_failure_keeps_stderr_tail() {
        let mut sinks = LogSinks::null();
        let err = SystemRunner
            .stream(
                &Cmd::new("sh").args(["-c", "echo broken >&2; exit 3"]),
                &mut sinks,
            )
            .unwrap_err();

        match err {
            ProcessError::Failed {
                code, stderr_tail, ..
            } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr_tail.trim(), "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stream_missing_program() {
        let mut sinks = LogSinks::null();
        let err = SystemRunner
            .stream(&Cmd::new("nonexistent_program_12345"), &mut sinks)
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("Is it installed?"));
    }

    #[test]
    fn test_tail_is_bounded() {
        let big = vec![b'x'; STDERR_TAIL_BYTES * 3];
        let mut sink = io::sink();
        let tail = forward_with_tail(&big[..], &mut sink).unwrap();
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
    }

    #[test]
    fn test_cmd_display() {
        let cmd = Cmd::new("tar")
            .arg("-cpf")
            .arg_path(Path::new("/tmp/out.tar"))
            .args(["-C", "/tmp/root", "."]);
        assert_eq!(cmd.to_string(), "tar -cpf /tmp/out.tar -C /tmp/root .");
        assert_eq!(cmd.program(), "tar");
        assert_eq!(cmd.get_args().len(), 5);
    }
}
