//! kind (Kubernetes in Docker) backend.
//!
//! Every environment owns one ephemeral single-node kind cluster named after
//! the scope. The environment directory is mounted into the node and from
//! there into every pod at `/shared`. Every runnable is one Deployment plus
//! a NodePort Service reached through the node's internal address.

pub mod kubectl;
pub mod manifest;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rigging_common::config::{BackoffConfig, EnvironmentConfig};
use rigging_common::constants::{KIND_SHARED_MOUNT, STOP_GRACE};
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::PortMap;
use rigging_core::backend::{Backend, LaunchSpec, Scope, Workload};
use rigging_core::backoff::Backoff;
use rigging_core::command::{Command, ExecOptions, ExecOutput};

use self::kubectl::Kubectl;
use crate::exec::{Tool, reap};
use crate::logs::{LogCapture, append_log};

const CLUSTER_WAIT: &str = "120s";

#[derive(Debug, Clone)]
struct Cluster {
    kubectl: Kubectl,
    node_address: String,
}

/// Drives the `kind` and `kubectl` CLIs.
#[derive(Debug)]
pub struct KindBackend {
    kind: Tool,
    kubectl: Tool,
    node_image: Option<String>,
    ready_backoff: BackoffConfig,
    clusters: Mutex<HashMap<String, Cluster>>,
}

impl KindBackend {
    /// Locates `kind` and `kubectl`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::ToolNotFound`] if either is not installed.
    pub fn new(config: &EnvironmentConfig) -> Result<Self> {
        Ok(Self {
            kind: Tool::locate("kind")?,
            kubectl: Tool::locate("kubectl")?,
            node_image: config.kind_node_image.clone(),
            ready_backoff: config.ready_backoff,
            clusters: Mutex::new(HashMap::new()),
        })
    }

    fn lock_clusters(&self) -> MutexGuard<'_, HashMap<String, Cluster>> {
        self.clusters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cluster(&self, scope: &Scope) -> Result<Cluster> {
        self.lock_clusters()
            .get(&scope.name)
            .cloned()
            .ok_or_else(|| RiggingError::EnvironmentClosed {
                name: scope.name.clone(),
            })
    }

    fn kubeconfig(scope: &Scope) -> PathBuf {
        scope.dir.join("kubeconfig")
    }

    fn cluster_exists(&self, name: &str) -> Result<bool> {
        let clusters = self.kind.output(&["get", "clusters"])?;
        Ok(clusters.lines().map(str::trim).any(|c| c == name))
    }

    fn delete_cluster(&self, scope: &Scope) {
        let kubeconfig = Self::kubeconfig(scope).display().to_string();
        self.kind.run_best_effort(&[
            "delete",
            "cluster",
            "--name",
            scope.name.as_str(),
            "--kubeconfig",
            kubeconfig.as_str(),
        ]);
    }

    fn wait_pod_ready(&self, kubectl: &Kubectl, name: &str) -> Result<()> {
        let mut backoff = Backoff::new(self.ready_backoff);
        let mut last_error = RiggingError::probe("pod was never listed");
        while backoff.ongoing() {
            match kubectl.pod_ready(name) {
                Ok(true) => return Ok(()),
                Ok(false) => last_error = RiggingError::probe("pod is not ready yet"),
                Err(err) => last_error = err,
            }
            backoff.wait();
        }
        Err(RiggingError::NotReady {
            name: name.to_string(),
            attempts: backoff.retries(),
            source: Box::new(last_error),
        })
    }

    fn deploy(&self, spec: &LaunchSpec<'_>, kubectl: &Kubectl, manifest: &Path) -> Result<PortMap> {
        kubectl.apply(manifest)?;
        self.wait_pod_ready(kubectl, spec.name)?;
        if spec.ports.is_empty() {
            return Ok(PortMap::new());
        }
        kubectl.node_ports(spec.name, spec.ports)
    }
}

impl Backend for KindBackend {
    fn name(&self) -> &'static str {
        "kind"
    }

    fn create_scope(&self, scope: &Scope) -> Result<()> {
        if self.cluster_exists(&scope.name)? {
            tracing::info!(scope = %scope.name, "removing leftover kind cluster");
            self.delete_cluster(scope);
        }

        let config_path = scope.dir.join("kind-config.yaml");
        std::fs::write(&config_path, manifest::kind_config(&scope.dir)?).map_err(|e| {
            RiggingError::Io {
                path: config_path.clone(),
                source: e,
            }
        })?;

        let kubeconfig = Self::kubeconfig(scope);
        let config_arg = config_path.display().to_string();
        let kubeconfig_arg = kubeconfig.display().to_string();
        let mut args = vec![
            "create",
            "cluster",
            "--name",
            scope.name.as_str(),
            "--config",
            config_arg.as_str(),
            "--kubeconfig",
            kubeconfig_arg.as_str(),
            "--wait",
            CLUSTER_WAIT,
        ];
        if let Some(image) = &self.node_image {
            args.push("--image");
            args.push(image.as_str());
        }
        tracing::info!(scope = %scope.name, "creating kind cluster");
        self.kind.run(&args)?;

        let kubectl = Kubectl::new(&self.kubectl, &kubeconfig);
        let node_address = match kubectl.node_address() {
            Ok(address) => address,
            Err(err) => {
                self.delete_cluster(scope);
                return Err(err);
            }
        };
        tracing::info!(scope = %scope.name, node = %node_address, "kind cluster created");
        let _ = self.lock_clusters().insert(
            scope.name.clone(),
            Cluster {
                kubectl,
                node_address,
            },
        );
        Ok(())
    }

    fn destroy_scope(&self, scope: &Scope) {
        let _ = self.lock_clusters().remove(&scope.name);
        self.delete_cluster(scope);
        tracing::info!(scope = %scope.name, "kind cluster deleted");
    }

    fn internal_dir(&self, _scope: &Scope, runnable: &str) -> PathBuf {
        Path::new(KIND_SHARED_MOUNT).join(runnable)
    }

    fn internal_endpoint(&self, _scope: &Scope, runnable: &str, port: u16) -> String {
        format!("{runnable}:{port}")
    }

    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn Workload>> {
        let cluster = self.cluster(spec.scope)?;
        let manifest_path = spec.scope.dir.join(format!("{}.manifest.yaml", spec.name));
        let rendered = manifest::workload_manifest(spec)?;
        std::fs::write(&manifest_path, rendered).map_err(|e| RiggingError::Io {
            path: manifest_path.clone(),
            source: e,
        })?;
        let manifest_arg = manifest_path.display().to_string();
        let invocation = cluster
            .kubectl
            .tool()
            .describe(&["apply", "-f", manifest_arg.as_str()]);
        append_log(&spec.scope.dir, spec.name, &format!("$ {invocation}"))?;

        let host_ports = match self.deploy(spec, &cluster.kubectl, &manifest_path) {
            Ok(host_ports) => host_ports,
            Err(err) => {
                tracing::warn!(runnable = %spec.name, error = %err, "start failed, deleting workload");
                if let Err(cleanup) = cluster.kubectl.delete(&manifest_path, Duration::ZERO) {
                    tracing::warn!(runnable = %spec.name, error = %cleanup, "failed to delete workload");
                }
                return Err(err);
            }
        };

        let follower = cluster
            .kubectl
            .follow_logs(spec.name)
            .and_then(|child| {
                LogFollower::attach(child, &spec.scope.dir, spec.name, spec.scope.verbose)
            });
        let follower = match follower {
            Ok(follower) => Some(follower),
            Err(err) => {
                tracing::warn!(runnable = %spec.name, error = %err, "failed to follow workload logs");
                None
            }
        };

        Ok(Box::new(KindWorkload {
            kubectl: cluster.kubectl,
            runnable: spec.name.to_string(),
            manifest: manifest_path,
            node_address: cluster.node_address,
            host_ports,
            follower: Mutex::new(follower),
        }))
    }
}

#[derive(Debug)]
struct LogFollower {
    child: Child,
    logs: LogCapture,
}

impl LogFollower {
    /// Captures `child`'s output, reaping it if capture cannot start.
    fn attach(mut child: Child, env_dir: &Path, runnable: &str, verbose: bool) -> Result<Self> {
        match LogCapture::attach(&mut child, env_dir, runnable, verbose) {
            Ok(logs) => Ok(Self { child, logs }),
            Err(err) => {
                reap(&mut child);
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
struct KindWorkload {
    kubectl: Kubectl,
    runnable: String,
    manifest: PathBuf,
    node_address: String,
    host_ports: PortMap,
    follower: Mutex<Option<LogFollower>>,
}

impl KindWorkload {
    fn stop_following(&self) {
        let follower = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut follower) = follower {
            reap(&mut follower.child);
            follower.logs.join();
        }
    }

    fn delete(&self, grace: Duration) -> Result<()> {
        self.kubectl.delete(&self.manifest, grace)?;
        self.stop_following();
        Ok(())
    }
}

impl Workload for KindWorkload {
    fn host_ports(&self) -> &PortMap {
        &self.host_ports
    }

    fn host_address(&self) -> &str {
        &self.node_address
    }

    fn stop(&self) -> Result<()> {
        self.delete(STOP_GRACE)
    }

    fn kill(&self) -> Result<()> {
        self.delete(Duration::ZERO)
    }

    fn exec(&self, command: &Command, options: ExecOptions) -> Result<ExecOutput> {
        if command.is_empty() {
            return Err(RiggingError::config(format!(
                "exec in {}: command is empty",
                self.runnable
            )));
        }
        self.kubectl.exec(&self.runnable, command, options)
    }
}
