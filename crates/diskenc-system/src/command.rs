//! Execution wrapper for external helpers.
//!
//! Keeps process handling in one place so the collaborators above it can be
//! tested against fake executables.

use diskenc_core::error::{DiskencError, DiskencResult};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct HelperCommand {
    program: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
pub(crate) struct Output {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

impl Output {
    /// Stderr if the helper wrote any, otherwise stdout.
    pub(crate) fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

impl HelperCommand {
    pub(crate) fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub(crate) fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn failure(&self, reason: impl Into<String>) -> DiskencError {
        DiskencError::Helper {
            path: self.program.clone(),
            reason: reason.into(),
        }
    }

    /// Run the helper with `args`, feeding `input` on stdin when given.
    ///
    /// A non-zero exit is not an error here; callers inspect `Output::status`.
    pub(crate) fn run(&self, args: &[&str], input: Option<&[u8]>) -> DiskencResult<Output> {
        let mut command = Command::new(&self.program);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .map_err(|err| self.failure(format!("could not start: {err}")))?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                // Helpers that never read stdin may exit before we finish writing.
                match stdin.write_all(payload) {
                    Ok(()) => {
                        stdin.flush().ok();
                    }
                    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> DiskencResult<Output> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(exit_status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(self.failure(format!("timed out after {:?}", self.timeout)));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| self.failure("stdout reader thread panicked"))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| self.failure("stderr reader thread panicked"))??;

        Ok(Output {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<DiskencResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> DiskencResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}
