//! Domain primitive types used across the rigging workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_NAME_LENGTH;
use crate::error::{Result, RiggingError};

/// Logical port name to port number.
///
/// Used both for declared container ports and for resolved host ports.
pub type PortMap = BTreeMap<String, u16>;

/// Checks that `name` is a DNS label: 1 to 63 lowercase alphanumerics or
/// `-`, not starting or ending with `-`.
///
/// Both docker container names and Kubernetes object names accept this
/// shape, so environments and runnables are portable across backends.
///
/// # Errors
///
/// Returns a [`RiggingError::Config`] naming `kind` if the name is invalid.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if name.is_empty()
        || name.len() > MAX_NAME_LENGTH
        || !valid_chars
        || name.starts_with('-')
        || name.ends_with('-')
    {
        return Err(RiggingError::config(format!(
            "invalid {kind} name {name:?}: expected 1-{MAX_NAME_LENGTH} lowercase \
             alphanumerics or '-', not starting or ending with '-'"
        )));
    }
    Ok(())
}

/// Resource limits for a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU limit as a fraction of cores (e.g. `0.5`).
    pub cpus: Option<f64>,
}

impl ResourceLimits {
    /// Returns whether no limit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpus.is_none()
    }
}

/// PID namespace mode of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PidMode {
    /// The workload gets its own PID namespace.
    #[default]
    Private,
    /// The workload shares the host PID namespace.
    Host,
}

/// Lifecycle state of a runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Built with start options but never started.
    Initialized,
    /// Started by the backend.
    Running,
    /// Running and its readiness probe succeeded.
    Ready,
    /// Stopped or killed.
    Stopped,
}

impl LifecycleState {
    /// Returns whether the workload is currently running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_labels() {
        assert!(validate_name("runnable", "prometheus").is_ok());
        assert!(validate_name("runnable", "minio-1").is_ok());
        assert!(validate_name("runnable", "a").is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        for name in ["", "Upper", "under_score", "-lead", "trail-", "dot.ted"] {
            assert!(validate_name("runnable", name).is_err(), "{name:?}");
        }
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(validate_name("runnable", &long).is_err());
    }

    #[test]
    fn running_states() {
        assert!(LifecycleState::Running.is_running());
        assert!(LifecycleState::Ready.is_running());
        assert!(!LifecycleState::Initialized.is_running());
        assert!(!LifecycleState::Stopped.is_running());
    }

    #[test]
    fn empty_limits() {
        assert!(ResourceLimits::default().is_empty());
        let limits = ResourceLimits {
            memory_bytes: Some(64 * 1024 * 1024),
            cpus: None,
        };
        assert!(!limits.is_empty());
    }
}
