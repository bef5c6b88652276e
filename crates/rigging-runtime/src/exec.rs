//! External tool invocation: `docker`, `kind`, and `kubectl`.
//!
//! Every backend operation is a synchronous child process whose argument
//! list is built by the caller and whose stdout is parsed by the caller.

use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

use rigging_common::error::{Result, RiggingError};
use rigging_core::command::{ExecOptions, ExecOutput, OutputSink};

/// A located external binary plus arguments prepended to every call.
#[derive(Debug, Clone)]
pub struct Tool {
    name: &'static str,
    path: PathBuf,
    base_args: Vec<String>,
}

impl Tool {
    /// Locates `name` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::ToolNotFound`] if the binary is not installed.
    pub fn locate(name: &'static str) -> Result<Self> {
        let path = which::which(name).map_err(|_| RiggingError::ToolNotFound { tool: name })?;
        tracing::debug!(tool = name, path = %path.display(), "located tool");
        Ok(Self {
            name,
            path,
            base_args: Vec::new(),
        })
    }

    /// Returns a copy that prepends `args` to every invocation.
    #[must_use]
    pub fn with_base_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tool = self.clone();
        tool.base_args.extend(args.into_iter().map(Into::into));
        tool
    }

    /// Binary name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Resolved binary path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders an invocation for logs and error messages.
    #[must_use]
    pub fn describe<S: AsRef<OsStr>>(&self, args: &[S]) -> String {
        std::iter::once(self.name.to_string())
            .chain(self.base_args.iter().cloned())
            .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command<S: AsRef<OsStr>>(&self, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.path);
        let _ = cmd.args(&self.base_args).args(args);
        cmd
    }

    /// Runs the tool to completion and returns its trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Tool`] if it exits non-zero, or an I/O error
    /// if it cannot be spawned.
    pub fn output<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<String> {
        let description = self.describe(args);
        tracing::debug!(command = %description, "running tool");
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RiggingError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        check_status(description, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs the tool to completion, discarding stdout.
    ///
    /// # Errors
    ///
    /// See [`Tool::output`].
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<()> {
        self.output(args).map(|_| ())
    }

    /// Runs the tool and logs a warning instead of failing.
    ///
    /// Used on teardown paths where every step must be attempted.
    pub fn run_best_effort<S: AsRef<OsStr>>(&self, args: &[S]) {
        if let Err(err) = self.run(args) {
            tracing::warn!(command = %self.describe(args), error = %err, "best-effort command failed");
        }
    }

    /// Spawns the tool with stdout and stderr piped and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if it cannot be spawned.
    pub fn spawn<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Child> {
        tracing::debug!(command = %self.describe(args), "spawning tool");
        self.command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RiggingError::Io {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Runs the tool to completion, buffering its output and streaming it
    /// into the sinks of `options` as it arrives.
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the tool cannot be spawned or a sink fails.
    pub fn exec<S: AsRef<OsStr>>(&self, args: &[S], options: ExecOptions) -> Result<ExecOutput> {
        let mut child = self.spawn(args)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let ExecOptions {
            stdout: out_sink,
            stderr: err_sink,
        } = options;

        let (out, err) = std::thread::scope(|s| {
            let err_handle = s.spawn(move || pump(stderr, err_sink));
            let out = pump(stdout, out_sink);
            let err = err_handle
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stderr reader panicked")));
            (out, err)
        });
        let io_err = |e: std::io::Error| RiggingError::Io {
            path: self.path.clone(),
            source: e,
        };
        let out = out.map_err(io_err)?;
        let err = err.map_err(io_err)?;
        let status = child.wait().map_err(io_err)?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn check_status(command: String, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(RiggingError::Tool {
        command,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn pump(reader: Option<impl Read>, mut sink: Option<OutputSink>) -> std::io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };
    let mut buf = [0_u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&buf[..n]);
        if let Some(sink) = sink.as_mut() {
            sink.write_all(&buf[..n])?;
        }
    }
    if let Some(sink) = sink.as_mut() {
        sink.flush()?;
    }
    Ok(captured)
}

/// Reaps a child process, killing it first if it is still alive.
pub fn reap(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(err) => tracing::debug!(error = %err, "failed to poll child"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sh() -> Tool {
        Tool::locate("sh").expect("sh should be installed")
    }

    #[test]
    fn missing_tool_is_reported() {
        let err = Tool::locate("rigging-no-such-binary").unwrap_err();
        assert!(matches!(err, RiggingError::ToolNotFound { .. }));
    }

    #[test]
    fn output_is_trimmed() {
        let out = sh().output(&["-c", "echo '  hello  '"]).expect("sh runs");
        assert_eq!(out, "hello");
    }

    #[test]
    fn nonzero_exit_is_a_tool_error() {
        let err = sh().output(&["-c", "echo boom >&2; exit 3"]).unwrap_err();
        match err {
            RiggingError::Tool {
                command, stderr, ..
            } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn base_args_are_prepended() {
        let tool = sh().with_base_args(["-c"]);
        assert_eq!(tool.output(&["echo base"]).expect("sh runs"), "base");
        assert_eq!(tool.describe(&["echo base"]), "sh -c echo base");
    }

    #[test]
    fn exec_streams_and_reports_exit_code() {
        let out_sink = SharedBuf::default();
        let err_sink = SharedBuf::default();
        let output = sh()
            .exec(
                &["-c", "echo out; echo err >&2; exit 2"],
                ExecOptions::default()
                    .stdout(out_sink.clone())
                    .stderr(err_sink.clone()),
            )
            .expect("sh runs");

        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 2);
        assert_eq!(out_sink.0.lock().unwrap().as_slice(), b"out\n");
        assert_eq!(err_sink.0.lock().unwrap().as_slice(), b"err\n");
    }
}
