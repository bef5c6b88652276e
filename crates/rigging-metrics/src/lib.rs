//! # rigging-metrics
//!
//! Uses live metric values as a synchronization primitive: scrape a
//! runnable's Prometheus text endpoint, select series with label matchers,
//! sum them, and wait under a bounded backoff until an [`Expectation`] holds.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod composite;
pub mod expectation;
pub mod instrumented;
pub mod matcher;
pub mod options;
pub mod parser;
pub mod source;

pub use composite::CompositeInstrumentedRunnable;
pub use expectation::Expectation;
pub use instrumented::{InstrumentedRunnable, MetricsTarget};
pub use matcher::{LabelMatcher, MatchOp};
pub use options::{MetricsOptions, MissingMetrics, ValueMode};
pub use source::{MetricsSource, ScrapeTarget};
