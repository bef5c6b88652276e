//! Anything metric sums can be read from, and the waits built on top.

use rigging_common::error::{Result, RiggingError};
use rigging_core::backoff::Backoff;
use rigging_core::probe::Scheme;

use crate::expectation::Expectation;
use crate::options::{MetricsOptions, MissingMetrics};

/// One scrapeable metrics endpoint, addressed from inside the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    /// Runnable serving the endpoint.
    pub runnable: String,
    /// In-scope `host:port`.
    pub internal_endpoint: String,
    /// HTTP path of the document.
    pub path: String,
    /// URL scheme.
    pub scheme: Scheme,
}

/// A source of summed metrics: one instrumented runnable or a composite.
///
/// Implementors provide single-shot reads; the wait operations are shared.
pub trait MetricsSource {
    /// Name used in logs and errors.
    fn source_name(&self) -> &str;

    /// Sums each requested metric, in request order.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::MissingMetric`] for a metric with no selected
    /// series unless `options` skip missing metrics, or a scrape error.
    fn sum_metrics(&self, names: &[&str], options: &MetricsOptions) -> Result<Vec<f64>>;

    /// Returns whether any series of `name` selected by `options` is exported.
    ///
    /// # Errors
    ///
    /// Returns a scrape error.
    fn exports(&self, name: &str, options: &MetricsOptions) -> Result<bool>;

    /// Endpoints a scraper should collect.
    fn metric_targets(&self) -> Vec<ScrapeTarget>;

    /// Waits with default options until `expectation` accepts the sums.
    ///
    /// # Errors
    ///
    /// See [`MetricsSource::wait_sum_metrics_with_options`].
    fn wait_sum_metrics(&self, expectation: &Expectation, names: &[&str]) -> Result<()> {
        self.wait_sum_metrics_with_options(expectation, names, &MetricsOptions::default())
    }

    /// Re-sums `names` under the options' backoff until `expectation`
    /// accepts the sums.
    ///
    /// With [`MissingMetrics::Wait`] a missing metric is retried; any other
    /// error ends the wait immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] if the expectation's arity does not
    /// match `names`, [`RiggingError::ExpectationNotMet`] once the backoff is
    /// exhausted, or the first non-retryable error.
    fn wait_sum_metrics_with_options(
        &self,
        expectation: &Expectation,
        names: &[&str],
        options: &MetricsOptions,
    ) -> Result<()> {
        expectation.check_arity(names.len())?;
        let mut backoff = Backoff::new(options.wait_backoff());
        let mut last_values = Vec::new();
        let mut last_error = None;
        while backoff.ongoing() {
            match self.sum_metrics(names, options) {
                Ok(sums) => {
                    if expectation.matches(&sums) {
                        tracing::debug!(
                            source = self.source_name(),
                            metrics = ?names,
                            sums = ?sums,
                            %expectation,
                            "metric expectation met"
                        );
                        return Ok(());
                    }
                    last_values = sums;
                }
                Err(err) if err.is_missing_metric() && options.missing == MissingMetrics::Wait => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
            backoff.wait();
        }
        Err(RiggingError::ExpectationNotMet {
            runnable: self.source_name().to_string(),
            metrics: names.iter().map(ToString::to_string).collect(),
            expectation: expectation.to_string(),
            last_values,
            last_error: last_error.map_or_else(|| "none".to_string(), |e| e.to_string()),
        })
    }

    /// Waits until no series of `name` selected by `options` is exported.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::ExpectationNotMet`] if the metric is still
    /// exported once the backoff is exhausted, or a scrape error.
    fn wait_removed_metric(&self, name: &str, options: &MetricsOptions) -> Result<()> {
        let mut backoff = Backoff::new(options.wait_backoff());
        while backoff.ongoing() {
            if !self.exports(name, options)? {
                tracing::debug!(source = self.source_name(), metric = name, "metric removed");
                return Ok(());
            }
            backoff.wait();
        }
        Err(RiggingError::ExpectationNotMet {
            runnable: self.source_name().to_string(),
            metrics: vec![name.to_string()],
            expectation: "metric no longer exported".to_string(),
            last_values: Vec::new(),
            last_error: "none".to_string(),
        })
    }
}
