//! Runnable state machine: one managed workload inside an environment.
//!
//! Lifecycle: registered (name reserved) -> initialized (start options
//! fixed) -> running -> ready -> stopped. `stop` and `kill` are no-ops on a
//! runnable that is not running, so they may be called any number of times.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rigging_common::config::BackoffConfig;
use rigging_common::constants::STOPPED_ENDPOINT;
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::{LifecycleState, PortMap};

use crate::backend::{LaunchSpec, Workload};
use crate::backoff::Backoff;
use crate::command::{Command, ExecOptions, ExecOutput};
use crate::environment::EnvShared;
use crate::extensions::{Capability, Extensions};
use crate::options::StartOptions;

/// Reserved name waiting for ports and start options.
///
/// Returned by [`Environment::runnable`](crate::environment::Environment::runnable).
#[derive(Debug)]
pub struct RunnableBuilder {
    env: Arc<EnvShared>,
    name: String,
    ports: PortMap,
}

impl RunnableBuilder {
    pub(crate) const fn new(env: Arc<EnvShared>, name: String) -> Self {
        Self {
            env,
            name,
            ports: BTreeMap::new(),
        }
    }

    /// Declares a logical port mapped to a container port.
    #[must_use]
    pub fn with_port(mut self, name: impl Into<String>, port: u16) -> Self {
        let _ = self.ports.insert(name.into(), port);
        self
    }

    /// Declares several logical ports.
    #[must_use]
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        self.ports
            .extend(ports.into_iter().map(|(name, port)| (name.into(), port)));
        self
    }

    /// Fixes the declared ports and creates the working directory, yielding
    /// a handle whose addresses are known before anything starts.
    ///
    /// # Errors
    ///
    /// Returns an error if a port is malformed or the directory cannot be
    /// created.
    pub fn future(self) -> Result<FutureRunnable> {
        for (name, port) in &self.ports {
            if name.is_empty() || *port == 0 {
                return Err(RiggingError::config(format!(
                    "runnable {}: invalid port declaration {name:?} -> {port}",
                    self.name
                )));
            }
        }

        let dir = self.env.scope.dir.join(&self.name);
        std::fs::create_dir_all(&dir).map_err(|e| RiggingError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let backend = &self.env.backend;
        let internal_dir = backend.internal_dir(&self.env.scope, &self.name);
        let internal_endpoints = self
            .ports
            .iter()
            .map(|(port_name, port)| {
                let endpoint = backend.internal_endpoint(&self.env.scope, &self.name, *port);
                (port_name.clone(), endpoint)
            })
            .collect();

        Ok(FutureRunnable {
            env: Arc::downgrade(&self.env),
            environment: self.env.scope.name.clone(),
            ready_backoff: self.env.config.ready_backoff,
            name: self.name,
            ports: self.ports,
            dir,
            internal_dir,
            internal_endpoints,
        })
    }

    /// Shorthand for `future()?.init(options)`.
    ///
    /// # Errors
    ///
    /// See [`RunnableBuilder::future`] and [`FutureRunnable::init`].
    pub fn init(self, options: StartOptions) -> Result<Runnable> {
        self.future()?.init(options)
    }
}

/// A runnable whose name, directories, and internal addresses are known but
/// whose start options are not yet given.
///
/// Lets dependent workloads be configured with each other's addresses
/// before either exists.
#[derive(Debug, Clone)]
pub struct FutureRunnable {
    env: Weak<EnvShared>,
    environment: String,
    ready_backoff: BackoffConfig,
    name: String,
    ports: PortMap,
    dir: PathBuf,
    internal_dir: PathBuf,
    internal_endpoints: BTreeMap<String, String>,
}

impl FutureRunnable {
    /// Runnable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host-visible working directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// In-scope working directory.
    #[must_use]
    pub fn internal_dir(&self) -> &Path {
        &self.internal_dir
    }

    /// Declared ports.
    #[must_use]
    pub const fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// In-scope address of `port`, or `""` if it was never declared.
    #[must_use]
    pub fn internal_endpoint(&self, port: &str) -> String {
        self.internal_endpoints.get(port).cloned().unwrap_or_default()
    }

    /// Fixes the start options.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty, the readiness probe targets an
    /// undeclared port, or the readiness backoff is invalid.
    pub fn init(self, options: StartOptions) -> Result<Runnable> {
        if options.image.trim().is_empty() {
            return Err(RiggingError::config(format!(
                "runnable {}: image reference is required",
                self.name
            )));
        }
        if let Some(port) = options.readiness.as_ref().and_then(|p| p.port()) {
            if !self.ports.contains_key(port) {
                return Err(RiggingError::UndeclaredPort {
                    runnable: self.name,
                    port: port.to_string(),
                });
            }
        }
        let ready_backoff = options.wait_ready_backoff.unwrap_or(self.ready_backoff);
        ready_backoff.validate()?;

        tracing::debug!(runnable = %self.name, image = %options.image, "runnable initialized");
        Ok(Runnable {
            inner: Arc::new(RunnableInner {
                env: self.env,
                environment: self.environment,
                name: self.name,
                ports: self.ports,
                dir: self.dir,
                internal_dir: self.internal_dir,
                internal_endpoints: self.internal_endpoints,
                options,
                ready_backoff,
                state: Mutex::new(RunnableState {
                    lifecycle: LifecycleState::Initialized,
                    workload: None,
                }),
                extensions: Mutex::new(Extensions::new()),
            }),
        })
    }
}

struct RunnableState {
    lifecycle: LifecycleState,
    workload: Option<Arc<dyn Workload>>,
}

struct RunnableInner {
    env: Weak<EnvShared>,
    environment: String,
    name: String,
    ports: PortMap,
    dir: PathBuf,
    internal_dir: PathBuf,
    internal_endpoints: BTreeMap<String, String>,
    options: StartOptions,
    ready_backoff: BackoffConfig,
    state: Mutex<RunnableState>,
    extensions: Mutex<Extensions>,
}

#[derive(Debug, Clone, Copy)]
enum Halt {
    Stop,
    Kill,
}

/// A managed workload. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Runnable {
    inner: Arc<RunnableInner>,
}

impl Runnable {
    /// Runnable name, unique within its environment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Host-visible working directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// In-scope working directory.
    #[must_use]
    pub fn internal_dir(&self) -> &Path {
        &self.inner.internal_dir
    }

    /// Declared logical port name to container port.
    #[must_use]
    pub fn ports(&self) -> &PortMap {
        &self.inner.ports
    }

    /// Start options given at `init`.
    #[must_use]
    pub fn options(&self) -> &StartOptions {
        &self.inner.options
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    /// Returns whether the workload is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Resolved host ports; empty unless running.
    #[must_use]
    pub fn host_ports(&self) -> PortMap {
        let state = self.lock_state();
        match &state.workload {
            Some(workload) if state.lifecycle.is_running() => workload.host_ports().clone(),
            _ => PortMap::new(),
        }
    }

    /// Host-reachable `host:port` of `port`.
    ///
    /// Returns `""` for an undeclared port and `"stopped"` while not running.
    #[must_use]
    pub fn endpoint(&self, port: &str) -> String {
        if !self.inner.ports.contains_key(port) {
            return String::new();
        }
        let state = self.lock_state();
        match &state.workload {
            Some(workload) if state.lifecycle.is_running() => workload
                .host_ports()
                .get(port)
                .map(|host_port| format!("{}:{host_port}", workload.host_address()))
                .unwrap_or_default(),
            _ => STOPPED_ENDPOINT.to_string(),
        }
    }

    /// In-scope address of `port`, or `""` if it was never declared.
    ///
    /// Deterministic and valid whether or not the workload runs.
    #[must_use]
    pub fn internal_endpoint(&self, port: &str) -> String {
        self.inner
            .internal_endpoints
            .get(port)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the capability value of type `T` attached to this runnable.
    #[must_use]
    pub fn extension<T: Capability>(&self) -> Option<T> {
        self.lock_extensions().get::<T>().cloned()
    }

    /// Attaches a capability value, returning the previous one of that type.
    pub fn set_extension<T: Capability>(&self, value: T) -> Option<T> {
        self.lock_extensions().insert(value)
    }

    /// Launches the workload.
    ///
    /// # Errors
    ///
    /// Returns an error if already running, if the environment is closed, or
    /// if the backend fails to launch it.
    pub fn start(&self) -> Result<()> {
        let env = self.environment()?;
        {
            let mut state = self.lock_state();
            if state.lifecycle.is_running() {
                return Err(RiggingError::AlreadyRunning {
                    name: self.inner.name.clone(),
                });
            }
            tracing::info!(
                runnable = %self.inner.name,
                backend = env.backend.name(),
                image = %self.inner.options.image,
                "starting runnable"
            );
            let spec = LaunchSpec {
                scope: &env.scope,
                name: &self.inner.name,
                ports: &self.inner.ports,
                dir: &self.inner.dir,
                internal_dir: &self.inner.internal_dir,
                options: &self.inner.options,
            };
            let workload: Arc<dyn Workload> = Arc::from(env.backend.launch(&spec)?);
            state.workload = Some(workload);
            state.lifecycle = LifecycleState::Running;
        }

        if !env.register_started(self) {
            tracing::warn!(runnable = %self.inner.name, "environment closed during start");
            if let Err(err) = self.kill() {
                tracing::warn!(
                    runnable = %self.inner.name,
                    error = %err,
                    "failed to kill runnable after environment closed"
                );
            }
            return Err(RiggingError::EnvironmentClosed {
                name: self.inner.environment.clone(),
            });
        }
        tracing::info!(runnable = %self.inner.name, "runnable started");
        Ok(())
    }

    /// Polls the readiness probe under the readiness backoff.
    ///
    /// A runnable without probe is ready as soon as it runs.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::NotRunning`] without probing if the workload
    /// is not running, or [`RiggingError::NotReady`] with the last probe
    /// error once the backoff is exhausted.
    pub fn wait_ready(&self) -> Result<()> {
        if !self.is_running() {
            return Err(RiggingError::NotRunning {
                name: self.inner.name.clone(),
            });
        }
        let Some(probe) = self.inner.options.readiness.as_ref() else {
            self.mark_ready();
            return Ok(());
        };

        let mut backoff = Backoff::new(self.inner.ready_backoff);
        let mut last_error = RiggingError::probe("no probe attempt made");
        while backoff.ongoing() {
            if !self.is_running() {
                return Err(RiggingError::NotRunning {
                    name: self.inner.name.clone(),
                });
            }
            match probe.check(self) {
                Ok(()) => {
                    self.mark_ready();
                    tracing::info!(
                        runnable = %self.inner.name,
                        attempts = backoff.retries() + 1,
                        "runnable ready"
                    );
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(runnable = %self.inner.name, error = %err, "not ready yet");
                    last_error = err;
                }
            }
            backoff.wait();
        }

        Err(RiggingError::NotReady {
            name: self.inner.name.clone(),
            attempts: backoff.retries(),
            source: Box::new(last_error),
        })
    }

    /// Stops the workload gracefully. No-op if not running.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to stop it; the runnable then
    /// stays running.
    pub fn stop(&self) -> Result<()> {
        self.halt(Halt::Stop)
    }

    /// Stops the workload without grace period. No-op if not running.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to kill it; the runnable then
    /// stays running.
    pub fn kill(&self) -> Result<()> {
        self.halt(Halt::Kill)
    }

    /// Executes a command inside the running workload.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::NotRunning`] if not running, and
    /// [`RiggingError::ExecFailed`] if the command exits non-zero.
    pub fn exec(&self, command: &Command, options: ExecOptions) -> Result<ExecOutput> {
        let workload = {
            let state = self.lock_state();
            match &state.workload {
                Some(workload) if state.lifecycle.is_running() => Arc::clone(workload),
                _ => {
                    return Err(RiggingError::NotRunning {
                        name: self.inner.name.clone(),
                    });
                }
            }
        };
        tracing::debug!(runnable = %self.inner.name, command = %command, "exec");
        let output = workload.exec(command, options)?;
        if !output.success() {
            return Err(RiggingError::ExecFailed {
                name: self.inner.name.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    fn halt(&self, how: Halt) -> Result<()> {
        {
            let mut state = self.lock_state();
            if !state.lifecycle.is_running() {
                return Ok(());
            }
            if let Some(workload) = &state.workload {
                match how {
                    Halt::Stop => workload.stop()?,
                    Halt::Kill => workload.kill()?,
                }
            }
            state.workload = None;
            state.lifecycle = LifecycleState::Stopped;
        }
        tracing::info!(runnable = %self.inner.name, how = ?how, "runnable stopped");
        if let Some(env) = self.inner.env.upgrade() {
            env.unregister_started(&self.inner.name);
        }
        Ok(())
    }

    fn mark_ready(&self) {
        let mut state = self.lock_state();
        if state.lifecycle == LifecycleState::Running {
            state.lifecycle = LifecycleState::Ready;
        }
    }

    fn environment(&self) -> Result<Arc<EnvShared>> {
        self.inner
            .env
            .upgrade()
            .filter(|env| !env.is_closed())
            .ok_or_else(|| RiggingError::EnvironmentClosed {
                name: self.inner.environment.clone(),
            })
    }

    fn lock_state(&self) -> MutexGuard<'_, RunnableState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_extensions(&self) -> MutexGuard<'_, Extensions> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
            .field("name", &self.inner.name)
            .field("environment", &self.inner.environment)
            .field("ports", &self.inner.ports)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Runnable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Runnable {}
