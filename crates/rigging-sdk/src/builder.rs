//! Fluent API for configuring and creating environments.

use std::path::PathBuf;
use std::sync::Arc;

use rigging_common::config::{BackoffConfig, EnvironmentConfig};
use rigging_common::constants::APP_NAME;
use rigging_common::error::Result;
use rigging_core::backend::Backend;
use rigging_core::environment::Environment;
use rigging_runtime::backend::BackendKind;

/// Builder for an [`Environment`].
///
/// Settings made on the builder win over the `RIGGING_*` environment
/// variables, which in turn win over the defaults.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    name: String,
    backend: BackendKind,
    base_dir: Option<PathBuf>,
    keep_dir: Option<bool>,
    verbose: Option<bool>,
    ready_backoff: Option<BackoffConfig>,
    docker_host_address: Option<String>,
    kind_node_image: Option<String>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentBuilder {
    /// Creates a builder for the docker backend with a unique name of the
    /// form `rigging-xxxxxxxx`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: unique_name(),
            backend: BackendKind::default(),
            base_dir: None,
            keep_dir: None,
            verbose: None,
            ready_backoff: None,
            docker_host_address: None,
            kind_node_image: None,
        }
    }

    /// Sets the scope name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Selects the backend strategy.
    #[must_use]
    pub const fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Creates the shared directory under `dir` instead of the temp dir.
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Keeps the shared directory after the environment closes.
    #[must_use]
    pub const fn keep_dir(mut self, keep: bool) -> Self {
        self.keep_dir = Some(keep);
        self
    }

    /// Logs workload output at `info` instead of `debug`.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Default readiness backoff for runnables whose start options carry
    /// none.
    #[must_use]
    pub const fn ready_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.ready_backoff = Some(backoff);
        self
    }

    /// Host address used in docker external endpoints.
    #[must_use]
    pub fn docker_host_address(mut self, address: impl Into<String>) -> Self {
        self.docker_host_address = Some(address.into());
        self
    }

    /// Node image for `kind create cluster`.
    #[must_use]
    pub fn kind_node_image(mut self, image: impl Into<String>) -> Self {
        self.kind_node_image = Some(image.into());
        self
    }

    /// Resolved configuration: defaults, then environment overrides, then
    /// builder settings.
    #[must_use]
    pub fn config(&self) -> EnvironmentConfig {
        let mut config = EnvironmentConfig::from_env(self.name.clone());
        if let Some(dir) = &self.base_dir {
            config.base_dir = Some(dir.clone());
        }
        if let Some(keep) = self.keep_dir {
            config.keep_dir = keep;
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
        if let Some(backoff) = self.ready_backoff {
            config.ready_backoff = backoff;
        }
        if let Some(address) = &self.docker_host_address {
            config.docker_host_address.clone_from(address);
        }
        if let Some(image) = &self.kind_node_image {
            config.kind_node_image = Some(image.clone());
        }
        config
    }

    /// Creates the selected backend and the environment on it.
    ///
    /// # Errors
    ///
    /// Returns an error if a required tool is missing, the configuration is
    /// invalid, or the backend cannot create the scope.
    pub fn build(self) -> Result<Environment> {
        let config = self.config();
        let backend = self.backend.create(&config)?;
        Environment::new(config, backend)
    }

    /// Creates the environment on a caller-provided backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the backend
    /// cannot create the scope.
    pub fn build_with_backend(self, backend: Arc<dyn Backend>) -> Result<Environment> {
        Environment::new(self.config(), backend)
    }
}

fn unique_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{APP_NAME}-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_are_unique_dns_labels() {
        let a = EnvironmentBuilder::new();
        let b = EnvironmentBuilder::new();
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("rigging-"));
        assert_eq!(a.name.len(), "rigging-".len() + 8);
        assert!(
            a.name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        );
    }

    #[test]
    fn builder_settings_override_defaults() {
        let backoff = BackoffConfig::metrics();
        let config = EnvironmentBuilder::new()
            .name("svc")
            .base_dir("/var/tmp/rig")
            .keep_dir(true)
            .verbose(true)
            .ready_backoff(backoff)
            .docker_host_address("10.0.0.2")
            .kind_node_image("kindest/node:v1.31.0")
            .config();
        assert_eq!(config.name, "svc");
        assert_eq!(config.base_dir, Some(PathBuf::from("/var/tmp/rig")));
        assert!(config.keep_dir);
        assert!(config.verbose);
        assert_eq!(config.ready_backoff, backoff);
        assert_eq!(config.docker_host_address, "10.0.0.2");
        assert_eq!(config.kind_node_image.as_deref(), Some("kindest/node:v1.31.0"));
    }

    #[test]
    fn docker_is_the_default_backend() {
        assert_eq!(EnvironmentBuilder::new().backend, BackendKind::Docker);
        assert_eq!(
            EnvironmentBuilder::new().backend(BackendKind::Kind).backend,
            BackendKind::Kind
        );
    }
}
