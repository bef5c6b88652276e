//! Start options handed to a runnable at `init`.

use std::collections::BTreeMap;

use rigging_common::config::BackoffConfig;
use rigging_common::types::{PidMode, ResourceLimits};

use crate::command::Command;
use crate::probe::ReadinessProbe;

/// Everything a backend needs to launch a workload.
///
/// Built fluently and consumed by `init`; it cannot change afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// Image reference.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Effective user, e.g. `1000` or `1000:1000`.
    pub user: Option<String>,
    /// Command to run; the image default when `None`.
    pub command: Option<Command>,
    /// Readiness check used by `wait_ready`.
    pub readiness: Option<ReadinessProbe>,
    /// Overrides the environment's readiness backoff.
    pub wait_ready_backoff: Option<BackoffConfig>,
    /// Extra volume specifications (`host:container[:mode]`).
    pub volumes: Vec<String>,
    /// Resource limits.
    pub limits: ResourceLimits,
    /// Run privileged.
    pub privileged: bool,
    /// Linux capabilities to add.
    pub capabilities: Vec<String>,
    /// PID namespace mode.
    pub pid_mode: PidMode,
}

impl StartOptions {
    /// Creates options for `image` with everything else defaulted.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the effective user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the command.
    #[must_use]
    pub fn command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets the readiness probe.
    #[must_use]
    pub fn readiness(mut self, probe: impl Into<ReadinessProbe>) -> Self {
        self.readiness = Some(probe.into());
        self
    }

    /// Overrides the readiness backoff.
    #[must_use]
    pub const fn wait_ready_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.wait_ready_backoff = Some(backoff);
        self
    }

    /// Mounts an extra volume.
    #[must_use]
    pub fn volume(mut self, spec: impl Into<String>) -> Self {
        self.volumes.push(spec.into());
        self
    }

    /// Sets the memory limit in bytes.
    #[must_use]
    pub const fn memory_limit(mut self, bytes: u64) -> Self {
        self.limits.memory_bytes = Some(bytes);
        self
    }

    /// Sets the CPU limit as a fraction of cores.
    #[must_use]
    pub const fn cpu_limit(mut self, cpus: f64) -> Self {
        self.limits.cpus = Some(cpus);
        self
    }

    /// Sets whether the workload runs privileged.
    #[must_use]
    pub const fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Adds a Linux capability.
    #[must_use]
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Sets the PID namespace mode.
    #[must_use]
    pub const fn pid_mode(mut self, mode: PidMode) -> Self {
        self.pid_mode = mode;
        self
    }
}
