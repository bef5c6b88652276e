//! # rigging-core
//!
//! Engine-agnostic orchestration: environments, the runnable state machine,
//! readiness probes, and the bounded backoff every wait is driven by.
//!
//! Concrete container engines plug in through the [`backend::Backend`]
//! trait; see `rigging-runtime` for the docker and kind implementations.

pub mod backend;
pub mod backoff;
pub mod command;
pub mod environment;
pub mod extensions;
pub mod options;
pub mod probe;
pub mod runnable;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
