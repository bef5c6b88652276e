//! Backend strategy selection.

pub mod docker;
pub mod kind;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rigging_common::config::EnvironmentConfig;
use rigging_common::error::{Result, RiggingError};
use rigging_core::backend::Backend;

/// Backend strategy chosen when an environment is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// One docker container per runnable on a per-environment network.
    #[default]
    Docker,
    /// One Deployment (plus NodePort Service) per runnable on an ephemeral
    /// kind cluster.
    Kind,
}

impl BackendKind {
    /// Creates the backend, locating the external tools it drives.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::ToolNotFound`] if a required binary is
    /// missing.
    pub fn create(self, config: &EnvironmentConfig) -> Result<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match self {
            Self::Docker => Arc::new(docker::DockerBackend::new(config)?),
            Self::Kind => Arc::new(kind::KindBackend::new(config)?),
        };
        tracing::debug!(backend = backend.name(), "backend created");
        Ok(backend)
    }

    /// Backend name as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Kind => "kind",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RiggingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "kind" | "kubernetes" | "k8s" => Ok(Self::Kind),
            other => Err(RiggingError::config(format!(
                "unknown backend {other:?} (expected docker or kind)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("docker".parse::<BackendKind>().unwrap(), BackendKind::Docker);
        assert_eq!(" Kind ".parse::<BackendKind>().unwrap(), BackendKind::Kind);
        assert_eq!("k8s".parse::<BackendKind>().unwrap(), BackendKind::Kind);
        assert!("podman".parse::<BackendKind>().is_err());
    }

    #[test]
    fn default_is_docker() {
        assert_eq!(BackendKind::default().to_string(), "docker");
    }
}
