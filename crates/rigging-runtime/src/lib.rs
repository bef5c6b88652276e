//! Backend drivers for the rigging environment engine.
//!
//! Two interchangeable strategies implement the `rigging-core` backend
//! traits: [`backend::docker::DockerBackend`] drives the docker CLI, and
//! [`backend::kind::KindBackend`] drives an ephemeral kind cluster through
//! `kind` and `kubectl`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod exec;
pub mod logs;
