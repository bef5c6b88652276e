//! Workload log capture.
//!
//! Each runnable gets one append-only file at
//! `<environment dir>/logs/<runnable>.log`. Output of a launched workload is
//! read line by line by background threads, appended to that file, and
//! re-emitted as `tracing` events under the `rigging::workload` target.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread::JoinHandle;

use rigging_common::constants::LOGS_DIR;
use rigging_common::error::{Result, RiggingError};

/// Returns the log file path for a runnable.
#[must_use]
pub fn log_path(env_dir: &Path, runnable: &str) -> PathBuf {
    env_dir.join(LOGS_DIR).join(format!("{runnable}.log"))
}

/// Reads a runnable's captured logs.
///
/// Returns an empty string if nothing was captured yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(env_dir: &Path, runnable: &str) -> Result<String> {
    let path = log_path(env_dir, runnable);
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(&path).map_err(|e| RiggingError::Io { path, source: e })
}

/// Appends one line to a runnable's log.
///
/// Creates the log directory and file if they do not exist.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created or written.
pub fn append_log(env_dir: &Path, runnable: &str, line: &str) -> Result<()> {
    let (path, mut file) = open_log(env_dir, runnable)?;
    writeln!(file, "{line}").map_err(|e| RiggingError::Io { path, source: e })
}

fn open_log(env_dir: &Path, runnable: &str) -> Result<(PathBuf, File)> {
    let path = log_path(env_dir, runnable);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RiggingError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| RiggingError::Io {
            path: path.clone(),
            source: e,
        })?;
    Ok((path, file))
}

/// Background readers draining a workload's stdout and stderr.
///
/// The readers end on their own once the process closes its pipes.
#[derive(Debug, Default)]
pub struct LogCapture {
    readers: Vec<JoinHandle<()>>,
}

impl LogCapture {
    /// Takes the piped stdout and stderr of `child` and starts draining them
    /// into the runnable's log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened.
    pub fn attach(child: &mut Child, env_dir: &Path, runnable: &str, verbose: bool) -> Result<Self> {
        let mut capture = Self::default();
        if let Some(stdout) = child.stdout.take() {
            capture.follow(stdout, env_dir, runnable, "stdout", verbose)?;
        }
        if let Some(stderr) = child.stderr.take() {
            capture.follow(stderr, env_dir, runnable, "stderr", verbose)?;
        }
        Ok(capture)
    }

    fn follow(
        &mut self,
        stream: impl Read + Send + 'static,
        env_dir: &Path,
        runnable: &str,
        stream_name: &'static str,
        verbose: bool,
    ) -> Result<()> {
        let (path, mut file) = open_log(env_dir, runnable)?;
        let runnable = runnable.to_string();
        let thread_runnable = runnable.clone();
        let handle = std::thread::Builder::new()
            .name(format!("logs-{runnable}-{stream_name}"))
            .spawn(move || {
                for line in BufReader::new(stream).lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if verbose {
                        tracing::info!(target: "rigging::workload", runnable = %thread_runnable, stream = stream_name, "{line}");
                    } else {
                        tracing::debug!(target: "rigging::workload", runnable = %thread_runnable, stream = stream_name, "{line}");
                    }
                    if let Err(err) = writeln!(file, "{line}") {
                        tracing::warn!(path = %path.display(), error = %err, "failed to append workload log");
                        break;
                    }
                }
            })
            .map_err(|e| RiggingError::Io {
                path: PathBuf::from(format!("<log reader for {runnable}>")),
                source: e,
            })?;
        self.readers.push(handle);
        Ok(())
    }

    /// Waits for the readers to drain. Only call after the process exited.
    pub fn join(&mut self) {
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    #[test]
    fn log_path_is_constructed_correctly() {
        let p = log_path(Path::new("/tmp/rigging_e2e_x"), "prometheus");
        assert_eq!(
            p.to_str().unwrap(),
            "/tmp/rigging_e2e_x/logs/prometheus.log"
        );
    }

    #[test]
    fn read_logs_missing_file_returns_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = read_logs(dir.path(), "nonexistent").expect("should succeed");
        assert!(content.is_empty());
    }

    #[test]
    fn append_creates_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs_dir = dir.path().join("logs");
        assert!(!logs_dir.exists());

        append_log(dir.path(), "minio", "first line").expect("append");
        assert!(logs_dir.exists());
    }

    #[test]
    fn separate_runnables_have_separate_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        append_log(dir.path(), "a", "from a").expect("append a");
        append_log(dir.path(), "b", "from b").expect("append b");

        let a_logs = read_logs(dir.path(), "a").expect("read a");
        let b_logs = read_logs(dir.path(), "b").expect("read b");

        assert!(a_logs.contains("from a"));
        assert!(!a_logs.contains("from b"));
        assert!(b_logs.contains("from b"));
    }

    #[test]
    fn capture_drains_both_streams() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut child = Command::new("sh")
            .args(["-c", "echo to-out; echo to-err >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("sh should spawn");

        let mut capture = LogCapture::attach(&mut child, dir.path(), "job", false).expect("attach");
        let _ = child.wait().expect("sh should exit");
        capture.join();

        let logs = read_logs(dir.path(), "job").expect("read");
        assert!(logs.contains("to-out"));
        assert!(logs.contains("to-err"));
    }
}
