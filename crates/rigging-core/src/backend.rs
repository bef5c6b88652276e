//! Backend abstraction for engine-agnostic orchestration.
//!
//! The environment and runnable state machine are written once against
//! these traits. A backend owns the isolated scope (a docker network, a kind
//! cluster) and knows how to launch one workload inside it; the resulting
//! [`Workload`] handle answers port, stop, kill, and exec requests.

use std::fmt;
use std::path::{Path, PathBuf};

use rigging_common::constants::LOGS_DIR;
use rigging_common::error::Result;
use rigging_common::types::PortMap;

use crate::command::{Command, ExecOptions, ExecOutput};
use crate::options::StartOptions;

/// Identity of an environment as seen by its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Unique scope name (network or cluster name).
    pub name: String,
    /// Host directory shared with every workload.
    pub dir: PathBuf,
    /// Log workload output at `info` instead of `debug`.
    pub verbose: bool,
}

impl Scope {
    /// Directory holding one log file per workload.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }
}

/// Everything a backend needs to launch one workload.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    /// Scope the workload joins.
    pub scope: &'a Scope,
    /// Runnable name, unique within the scope.
    pub name: &'a str,
    /// Declared logical port name to container port.
    pub ports: &'a PortMap,
    /// Host-visible working directory of the runnable.
    pub dir: &'a Path,
    /// In-scope working directory of the runnable.
    pub internal_dir: &'a Path,
    /// Start options given at `init`.
    pub options: &'a StartOptions,
}

/// Engine-specific strategy selected when the environment is built.
///
/// Implementors handle scope creation and teardown and workload launch.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short backend name for logs (`docker`, `kind`).
    fn name(&self) -> &'static str;

    /// Creates the isolated scope, removing leftovers of a previous run with
    /// the same name first.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope cannot be created.
    fn create_scope(&self, scope: &Scope) -> Result<()>;

    /// Removes the scope and anything left inside it.
    ///
    /// Best-effort: failures are logged, never returned.
    fn destroy_scope(&self, scope: &Scope);

    /// Working directory of `runnable` as seen from inside the scope.
    fn internal_dir(&self, scope: &Scope, runnable: &str) -> PathBuf;

    /// Address of `runnable`'s `port` as reachable from inside the scope.
    ///
    /// Computed without contacting the engine so workloads can be wired to
    /// each other before any of them starts.
    fn internal_endpoint(&self, scope: &Scope, runnable: &str, port: u16) -> String;

    /// Launches a workload and resolves its host ports.
    ///
    /// On failure nothing launched by this call may be left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload cannot be started or its ports
    /// cannot be resolved.
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn Workload>>;
}

/// Handle to one launched workload.
pub trait Workload: Send + Sync + fmt::Debug {
    /// Resolved logical port name to host-reachable port.
    ///
    /// The keys are exactly the declared port names.
    fn host_ports(&self) -> &PortMap;

    /// Host address that combines with [`Workload::host_ports`].
    fn host_address(&self) -> &str;

    /// Stops the workload gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses to stop it.
    fn stop(&self) -> Result<()>;

    /// Stops the workload without grace period.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses to kill it.
    fn kill(&self) -> Result<()>;

    /// Executes a command inside the workload.
    ///
    /// Returns the output even when the command exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be executed at all.
    fn exec(&self, command: &Command, options: ExecOptions) -> Result<ExecOutput>;
}
