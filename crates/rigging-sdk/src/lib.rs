//! # rigging-sdk
//!
//! Public SDK for writing integration tests against throwaway environments
//! of containerized services.
//!
//! - [`EnvironmentBuilder`](builder::EnvironmentBuilder): names the
//!   environment, picks the docker or kind backend, and creates it.
//! - [`start_and_wait_ready`](lifecycle::start_and_wait_ready): starts a set
//!   of runnables and waits until all are ready.
//! - [`logging::init`]: tracing output for tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use rigging_sdk::prelude::*;
//!
//! # fn main() -> rigging_sdk::prelude::Result<()> {
//! rigging_sdk::logging::init();
//! let env = EnvironmentBuilder::new().name("web").build()?;
//! let web = env
//!     .runnable("nginx")?
//!     .with_port("http", 80)
//!     .init(StartOptions::new("nginx:1.27-alpine").readiness(HttpProbe::new("http", "/")))?;
//! start_and_wait_ready(&[&web])?;
//! tracing::info!(endpoint = %web.endpoint("http"), "nginx is up");
//! env.close();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod lifecycle;
pub mod logging;

/// The types most tests need.
pub mod prelude {
    pub use crate::builder::EnvironmentBuilder;
    pub use crate::lifecycle::start_and_wait_ready;
    pub use rigging_common::config::{BackoffConfig, EnvironmentConfig};
    pub use rigging_common::error::{Result, RiggingError};
    pub use rigging_core::command::{Command, ExecOptions, ExecOutput};
    pub use rigging_core::environment::Environment;
    pub use rigging_core::options::StartOptions;
    pub use rigging_core::probe::{HttpProbe, ReadinessProbe, Scheme};
    pub use rigging_core::runnable::Runnable;
    pub use rigging_metrics::{
        CompositeInstrumentedRunnable, Expectation, InstrumentedRunnable, LabelMatcher,
        MetricsOptions, MetricsSource, MetricsTarget,
    };
    pub use rigging_runtime::backend::BackendKind;
}
