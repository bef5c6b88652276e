//! Runnables exposing a metrics endpoint.

use std::ops::Deref;

use rigging_common::constants::SCRAPE_TIMEOUT;
use rigging_common::error::{Result, RiggingError};
use rigging_core::probe::{Scheme, http_client};
use rigging_core::runnable::Runnable;

use crate::options::{MetricsOptions, MissingMetrics};
use crate::parser::{MetricFamilies, parse};
use crate::source::{MetricsSource, ScrapeTarget};

/// Where a runnable serves its metrics.
///
/// Stored in the runnable's extension registry when it is instrumented, so
/// collaborators holding only a [`Runnable`] can find its endpoint with
/// `runnable.extension::<MetricsTarget>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsTarget {
    /// Logical port name serving the document.
    pub port: String,
    /// HTTP path of the document.
    pub path: String,
    /// URL scheme.
    pub scheme: Scheme,
}

impl MetricsTarget {
    /// `/metrics` over plain HTTP on `port`.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            path: "/metrics".to_string(),
            scheme: Scheme::Http,
        }
    }

    /// Sets the document path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the URL scheme.
    #[must_use]
    pub const fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Scrape target of `runnable` for this endpoint.
    #[must_use]
    pub fn scrape_target(&self, runnable: &Runnable) -> ScrapeTarget {
        ScrapeTarget {
            runnable: runnable.name().to_string(),
            internal_endpoint: runnable.internal_endpoint(&self.port),
            path: self.path.clone(),
            scheme: self.scheme,
        }
    }
}

/// A [`Runnable`] whose metrics can be scraped, summed, and waited on.
///
/// Dereferences to the wrapped runnable for lifecycle operations.
#[derive(Debug, Clone)]
pub struct InstrumentedRunnable {
    runnable: Runnable,
    target: MetricsTarget,
    client: reqwest::blocking::Client,
}

impl InstrumentedRunnable {
    /// Instruments `runnable` and tags it with `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::UndeclaredPort`] if the runnable does not
    /// declare the target's port.
    pub fn new(runnable: Runnable, target: MetricsTarget) -> Result<Self> {
        if !runnable.ports().contains_key(&target.port) {
            return Err(RiggingError::UndeclaredPort {
                runnable: runnable.name().to_string(),
                port: target.port,
            });
        }
        let client = http_client(SCRAPE_TIMEOUT)?;
        let _ = runnable.set_extension(target.clone());
        Ok(Self {
            runnable,
            target,
            client,
        })
    }

    /// Instruments a runnable already tagged with a [`MetricsTarget`].
    ///
    /// Returns `None` if the runnable was never instrumented.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_tagged(runnable: &Runnable) -> Result<Option<Self>> {
        runnable
            .extension::<MetricsTarget>()
            .map(|target| Self::new(runnable.clone(), target))
            .transpose()
    }

    /// Wrapped runnable.
    #[must_use]
    pub const fn runnable(&self) -> &Runnable {
        &self.runnable
    }

    /// Metrics endpoint.
    #[must_use]
    pub const fn target(&self) -> &MetricsTarget {
        &self.target
    }

    fn metrics_error(&self, message: String) -> RiggingError {
        RiggingError::Metrics {
            runnable: self.runnable.name().to_string(),
            message,
        }
    }

    /// Fetches the raw metrics document.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::NotRunning`] if the runnable is not running,
    /// or [`RiggingError::Metrics`] on a transport error or a non-2xx status.
    pub fn metrics(&self) -> Result<String> {
        if !self.runnable.is_running() {
            return Err(RiggingError::NotRunning {
                name: self.runnable.name().to_string(),
            });
        }
        let url = format!(
            "{}://{}{}",
            self.target.scheme,
            self.runnable.endpoint(&self.target.port),
            self.target.path
        );
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.metrics_error(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.metrics_error(format!("GET {url}: unexpected status {status}")));
        }
        response
            .text()
            .map_err(|e| self.metrics_error(format!("GET {url}: reading body: {e}")))
    }

    /// Scrapes and parses the metrics document.
    ///
    /// # Errors
    ///
    /// See [`InstrumentedRunnable::metrics`]; a malformed document is a
    /// [`RiggingError::Metrics`] error.
    pub fn families(&self) -> Result<MetricFamilies> {
        let text = self.metrics()?;
        parse(&text).map_err(|e| self.metrics_error(format!("parsing metrics: {e}")))
    }
}

impl Deref for InstrumentedRunnable {
    type Target = Runnable;

    fn deref(&self) -> &Runnable {
        &self.runnable
    }
}

impl MetricsSource for InstrumentedRunnable {
    fn source_name(&self) -> &str {
        self.runnable.name()
    }

    fn sum_metrics(&self, names: &[&str], options: &MetricsOptions) -> Result<Vec<f64>> {
        let families = self.families()?;
        names
            .iter()
            .map(|name| {
                let sum = families.get(*name).and_then(|family| options.sum(family));
                match (sum, options.missing) {
                    (Some(sum), _) => Ok(sum),
                    (None, MissingMetrics::Skip) => Ok(0.0),
                    (None, MissingMetrics::Error | MissingMetrics::Wait) => {
                        Err(RiggingError::MissingMetric {
                            metric: (*name).to_string(),
                            runnable: self.runnable.name().to_string(),
                        })
                    }
                }
            })
            .collect()
    }

    fn exports(&self, name: &str, options: &MetricsOptions) -> Result<bool> {
        let families = self.families()?;
        Ok(families
            .get(name)
            .is_some_and(|family| family.metrics.iter().any(|m| options.selects(m))))
    }

    fn metric_targets(&self) -> Vec<ScrapeTarget> {
        vec![self.target.scrape_target(&self.runnable)]
    }
}
