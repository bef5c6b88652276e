//! Unified error types for the rigging workspace.
//!
//! Variants follow the failure taxonomy of the engine: configuration mistakes
//! and state-precondition violations surface immediately, probe and metric
//! failures are retried by the wait loops, and backend failures report the
//! external tool invocation that produced them.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RiggingError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A runnable with the same name is already registered in the environment.
    #[error("runnable {name} is already registered in environment {environment}")]
    NameConflict {
        /// Conflicting runnable name.
        name: String,
        /// Environment the name was reserved in.
        environment: String,
    },

    /// A port name was referenced that the runnable never declared.
    #[error("runnable {runnable} has no declared port named {port}")]
    UndeclaredPort {
        /// Runnable that was asked about the port.
        runnable: String,
        /// Port name that is not declared.
        port: String,
    },

    /// The operation requires a running workload.
    #[error("runnable {name} is not running")]
    NotRunning {
        /// Runnable name.
        name: String,
    },

    /// The workload was asked to start twice.
    #[error("runnable {name} is already running")]
    AlreadyRunning {
        /// Runnable name.
        name: String,
    },

    /// The owning environment was closed or dropped.
    #[error("environment {name} is closed")]
    EnvironmentClosed {
        /// Environment name.
        name: String,
    },

    /// A single readiness probe attempt failed.
    #[error("readiness probe failed: {message}")]
    Probe {
        /// Description of the failed check.
        message: String,
    },

    /// The readiness probe never succeeded within the backoff budget.
    #[error("runnable {name} is not ready after {attempts} attempts: {source}")]
    NotReady {
        /// Runnable name.
        name: String,
        /// Number of probe attempts made.
        attempts: u32,
        /// Last probe error observed.
        source: Box<RiggingError>,
    },

    /// A requested metric family (or filtered series) is absent.
    #[error("metric {metric} is missing from {runnable}")]
    MissingMetric {
        /// Metric family name.
        metric: String,
        /// Runnable that was scraped.
        runnable: String,
    },

    /// Scraping or parsing a metrics document failed.
    #[error("metrics error for {runnable}: {message}")]
    Metrics {
        /// Runnable that was scraped.
        runnable: String,
        /// Description of the failure.
        message: String,
    },

    /// A metric wait exhausted its backoff without satisfying the expectation.
    #[error(
        "unable to find metrics {metrics:?} with expected values ({expectation}) on {runnable}; \
         last values: {last_values:?}; last error: {last_error}"
    )]
    ExpectationNotMet {
        /// Runnable (or composite) that was scraped.
        runnable: String,
        /// Requested metric names.
        metrics: Vec<String>,
        /// Human-readable form of the expectation.
        expectation: String,
        /// Sums observed on the last successful scrape.
        last_values: Vec<f64>,
        /// Last error observed, or `none`.
        last_error: String,
    },

    /// An external tool invocation exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    Tool {
        /// Command line that was executed.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// An external tool binary could not be located.
    #[error("{tool} binary not found on PATH")]
    ToolNotFound {
        /// Binary name.
        tool: &'static str,
    },

    /// An external tool produced output in an unexpected shape.
    #[error("unexpected output from {command}: {message} (output: {output:?})")]
    Parse {
        /// Command line that produced the output.
        command: String,
        /// What was wrong with it.
        message: String,
        /// The raw output.
        output: String,
    },

    /// A command executed inside a workload exited non-zero.
    #[error("exec in {name} exited with code {exit_code}: {stderr}")]
    ExecFailed {
        /// Runnable name.
        name: String,
        /// Exit code of the command.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl RiggingError {
    /// Returns whether this error signals a missing metric, which metric
    /// waits may treat as "not yet" instead of a failure.
    #[must_use]
    pub const fn is_missing_metric(&self) -> bool {
        matches!(self, Self::MissingMetric { .. })
    }

    /// Shorthand for a [`RiggingError::Config`] error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`RiggingError::Probe`] error.
    #[must_use]
    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RiggingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metric_is_distinguished() {
        let missing = RiggingError::MissingMetric {
            metric: "up".into(),
            runnable: "prom".into(),
        };
        let scrape = RiggingError::Metrics {
            runnable: "prom".into(),
            message: "connection refused".into(),
        };
        assert!(missing.is_missing_metric());
        assert!(!scrape.is_missing_metric());
    }

    #[test]
    fn not_ready_mentions_name_and_attempts() {
        let err = RiggingError::NotReady {
            name: "db".into(),
            attempts: 7,
            source: Box::new(RiggingError::probe("connection refused")),
        };
        let text = err.to_string();
        assert!(text.contains("db"));
        assert!(text.contains('7'));
        assert!(text.contains("connection refused"));
    }
}
