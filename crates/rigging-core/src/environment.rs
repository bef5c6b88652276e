//! Isolated execution scope hosting runnables.
//!
//! An environment owns a shared host directory, the backend scope (network
//! or cluster), the registry of reserved runnable names, the ordered list of
//! started runnables, and the listener and closer hooks used by
//! collaborators such as monitoring stacks.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rigging_common::config::EnvironmentConfig;
use rigging_common::constants::APP_NAME;
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::validate_name;
use tempfile::TempDir;

use crate::backend::{Backend, Scope};
use crate::runnable::{Runnable, RunnableBuilder};

/// Callback notified with the full list of started runnables whenever it
/// changes.
pub type Listener = Arc<dyn Fn(&[Runnable]) + Send + Sync>;

/// Teardown callback run once during `close`.
pub type Closer = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    names: HashSet<String>,
    started: Vec<Runnable>,
    listeners: Vec<Listener>,
    closers: Vec<Closer>,
    closed: bool,
}

pub(crate) struct EnvShared {
    pub(crate) config: EnvironmentConfig,
    pub(crate) scope: Scope,
    pub(crate) backend: Arc<dyn Backend>,
    registry: Mutex<Registry>,
    notify: Mutex<()>,
    dir: Mutex<Option<TempDir>>,
}

impl EnvShared {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock_registry().closed
    }

    /// Serializes listener delivery so snapshots arrive in mutation order.
    /// Held across listener calls; the registry lock is not, so listeners
    /// may query the environment.
    fn lock_notify(&self) -> MutexGuard<'_, ()> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `runnable` to the started list and notifies listeners.
    /// Returns `false` if the environment was closed meanwhile.
    pub(crate) fn register_started(&self, runnable: &Runnable) -> bool {
        let _delivery = self.lock_notify();
        let (started, listeners) = {
            let mut registry = self.lock_registry();
            if registry.closed {
                return false;
            }
            registry.started.push(runnable.clone());
            (registry.started.clone(), registry.listeners.clone())
        };
        notify(&listeners, &started);
        true
    }

    pub(crate) fn unregister_started(&self, name: &str) {
        let _delivery = self.lock_notify();
        let (started, listeners) = {
            let mut registry = self.lock_registry();
            let before = registry.started.len();
            registry.started.retain(|r| r.name() != name);
            if registry.started.len() == before {
                return;
            }
            (registry.started.clone(), registry.listeners.clone())
        };
        notify(&listeners, &started);
    }

    fn close(&self) {
        let (started, closers) = {
            let mut registry = self.lock_registry();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.listeners.clear();
            (
                std::mem::take(&mut registry.started),
                std::mem::take(&mut registry.closers),
            )
        };
        tracing::info!(
            scope = %self.scope.name,
            runnables = started.len(),
            "closing environment"
        );

        for closer in closers {
            closer();
        }
        for runnable in started.iter().rev() {
            if let Err(err) = runnable.kill() {
                tracing::warn!(
                    scope = %self.scope.name,
                    runnable = %runnable.name(),
                    error = %err,
                    "failed to kill runnable during close"
                );
            }
        }
        self.backend.destroy_scope(&self.scope);
        self.release_dir();
    }

    fn release_dir(&self) {
        let dir = self
            .dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(dir) = dir else {
            return;
        };
        if self.config.keep_dir {
            let path = dir.keep();
            tracing::info!(path = %path.display(), "keeping environment directory");
        } else if let Err(err) = dir.close() {
            tracing::warn!(
                path = %self.scope.dir.display(),
                error = %err,
                "failed to remove environment directory"
            );
        }
    }
}

fn notify(listeners: &[Listener], started: &[Runnable]) {
    for listener in listeners {
        listener(started);
    }
}

/// Isolated scope (network or cluster plus shared directory) hosting
/// runnables. Closing is idempotent and also happens on drop.
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Creates the shared directory and the backend scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or configuration is invalid, the
    /// directory cannot be created, or the backend cannot create the scope.
    /// Anything already created is torn down before returning.
    pub fn new(config: EnvironmentConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        validate_name("environment", &config.name)?;
        config.ready_backoff.validate()?;

        let base = config.resolved_base_dir();
        std::fs::create_dir_all(&base).map_err(|e| RiggingError::Io {
            path: base.clone(),
            source: e,
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{APP_NAME}_{}_", config.name))
            .tempdir_in(&base)
            .map_err(|e| RiggingError::Io {
                path: base.clone(),
                source: e,
            })?;

        let scope = Scope {
            name: config.name.clone(),
            dir: dir.path().to_path_buf(),
            verbose: config.verbose,
        };
        let logs = scope.logs_dir();
        let shared = Arc::new(EnvShared {
            config,
            scope,
            backend,
            registry: Mutex::new(Registry::default()),
            notify: Mutex::new(()),
            dir: Mutex::new(Some(dir)),
        });
        let env = Self { shared };

        std::fs::create_dir_all(&logs).map_err(|e| RiggingError::Io {
            path: logs.clone(),
            source: e,
        })?;

        tracing::info!(
            scope = %env.shared.scope.name,
            backend = env.shared.backend.name(),
            dir = %env.shared.scope.dir.display(),
            "creating environment"
        );
        env.shared.backend.create_scope(&env.shared.scope)?;
        Ok(env)
    }

    /// Scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.scope.name
    }

    /// Host directory shared with every runnable.
    #[must_use]
    pub fn shared_dir(&self) -> &Path {
        &self.shared.scope.dir
    }

    /// Directory holding captured workload logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.shared.scope.logs_dir()
    }

    /// Name of the backend strategy in use.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.shared.backend.name()
    }

    /// Configuration this environment was built with.
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.shared.config
    }

    /// Reserves `name` and returns a builder for the runnable.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::NameConflict`] if the name is taken, a
    /// configuration error if it is not a valid name, or
    /// [`RiggingError::EnvironmentClosed`] after `close`.
    pub fn runnable(&self, name: impl Into<String>) -> Result<RunnableBuilder> {
        let name = name.into();
        validate_name("runnable", &name)?;
        {
            let mut registry = self.shared.lock_registry();
            if registry.closed {
                return Err(RiggingError::EnvironmentClosed {
                    name: self.name().to_string(),
                });
            }
            if !registry.names.insert(name.clone()) {
                return Err(RiggingError::NameConflict {
                    name,
                    environment: self.name().to_string(),
                });
            }
        }
        tracing::debug!(scope = %self.name(), runnable = %name, "runnable registered");
        Ok(RunnableBuilder::new(Arc::clone(&self.shared), name))
    }

    /// Registers a callback notified synchronously with the started
    /// runnables whenever that list changes.
    ///
    /// Deliveries are serialized in the order the list changed. A listener
    /// may read the environment but must not start or stop runnables.
    pub fn add_listener(&self, listener: impl Fn(&[Runnable]) + Send + Sync + 'static) {
        self.shared.lock_registry().listeners.push(Arc::new(listener));
    }

    /// Registers a teardown callback run during `close`, before runnables
    /// are killed.
    pub fn add_closer(&self, closer: impl FnOnce() + Send + 'static) {
        let mut registry = self.shared.lock_registry();
        if registry.closed {
            drop(registry);
            closer();
            return;
        }
        registry.closers.push(Box::new(closer));
    }

    /// Started runnables in start order.
    #[must_use]
    pub fn started(&self) -> Vec<Runnable> {
        self.shared.lock_registry().started.clone()
    }

    /// Returns whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Runs closers, kills started runnables in reverse start order, removes
    /// the backend scope, and deletes the shared directory.
    ///
    /// Best-effort and idempotent: every failure is logged, none returned.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.shared.scope.name)
            .field("backend", &self.shared.backend.name())
            .field("dir", &self.shared.scope.dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Debug for EnvShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvShared")
            .field("scope", &self.scope)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
