//! Executable invocations and their captured results.

use std::fmt;
use std::io::Write;

/// An executable invocation: program, arguments, and whether the image's
/// built-in entrypoint is replaced by the program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Program name or path.
    pub cmd: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Replace the image entrypoint with `cmd` instead of passing `cmd` to it.
    pub entrypoint_disabled: bool,
}

impl Command {
    /// Creates a command that runs through the image entrypoint.
    #[must_use]
    pub fn new<I, S>(cmd: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into(),
            args: args.into_iter().map(Into::into).collect(),
            entrypoint_disabled: false,
        }
    }

    /// Creates a command that replaces the image entrypoint.
    #[must_use]
    pub fn with_entrypoint_disabled<I, S>(cmd: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entrypoint_disabled: true,
            ..Self::new(cmd, args)
        }
    }

    /// Returns program and arguments as one argv vector.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.cmd.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Returns whether there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cmd.is_empty() && self.args.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Writer that receives streamed exec output.
pub type OutputSink = Box<dyn Write + Send>;

/// Caller-supplied options for executing a command inside a workload.
///
/// Output is always buffered into [`ExecOutput`]; sinks additionally receive
/// each line as it arrives.
#[derive(Default)]
pub struct ExecOptions {
    /// Receives standard output while the command runs.
    pub stdout: Option<OutputSink>,
    /// Receives standard error while the command runs.
    pub stderr: Option<OutputSink>,
}

impl ExecOptions {
    /// Streams standard output into `sink`.
    #[must_use]
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    /// Streams standard error into `sink`.
    #[must_use]
    pub fn stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }
}

impl fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOptions")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Output from an exec command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_prepends_program() {
        let cmd = Command::new("sh", ["-c", "echo hi"]);
        assert_eq!(cmd.argv(), vec!["sh", "-c", "echo hi"]);
        assert!(!cmd.entrypoint_disabled);
        assert_eq!(cmd.to_string(), "sh -c echo hi");
    }

    #[test]
    fn entrypoint_disabled_flag() {
        let cmd = Command::with_entrypoint_disabled("/bin/app", Vec::<String>::new());
        assert!(cmd.entrypoint_disabled);
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn default_command_is_empty() {
        assert!(Command::default().is_empty());
    }
}
