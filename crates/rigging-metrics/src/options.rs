//! Options for summing and waiting on metrics.

use rigging_common::config::BackoffConfig;

use crate::matcher::LabelMatcher;
use crate::parser::{Metric, MetricFamily};

/// Which number is taken from each selected series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueMode {
    /// Counter or gauge value; sum of observations for histograms and
    /// summaries.
    #[default]
    Value,
    /// Observation count of histograms and summaries. Other series count
    /// as zero.
    Count,
}

/// What a sum does when a requested metric has no selected series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingMetrics {
    /// Fail with [`MissingMetric`](rigging_common::error::RiggingError::MissingMetric).
    #[default]
    Error,
    /// Treat the metric as summing to zero.
    Skip,
    /// Like `Error` for a single sum; waits keep retrying instead of failing.
    Wait,
}

/// Series selection, extraction, and retry policy for metric operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsOptions {
    /// Matchers every selected series must satisfy.
    pub matchers: Vec<LabelMatcher>,
    /// Extraction mode.
    pub value_mode: ValueMode,
    /// Missing-metric policy.
    pub missing: MissingMetrics,
    /// Overrides the default metric wait backoff.
    pub backoff: Option<BackoffConfig>,
}

impl MetricsOptions {
    /// Default options: no matchers, instant values, missing is an error.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label matcher.
    #[must_use]
    pub fn label_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Adds several label matchers.
    #[must_use]
    pub fn label_matchers(mut self, matchers: impl IntoIterator<Item = LabelMatcher>) -> Self {
        self.matchers.extend(matchers);
        self
    }

    /// Sums histogram and summary observation counts instead of values.
    #[must_use]
    pub const fn with_metric_count(mut self) -> Self {
        self.value_mode = ValueMode::Count;
        self
    }

    /// Missing metrics sum to zero.
    #[must_use]
    pub const fn skip_missing_metrics(mut self) -> Self {
        self.missing = MissingMetrics::Skip;
        self
    }

    /// Waits retry while a metric is missing.
    #[must_use]
    pub const fn wait_missing_metrics(mut self) -> Self {
        self.missing = MissingMetrics::Wait;
        self
    }

    /// Overrides the wait backoff.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Backoff used by waits.
    #[must_use]
    pub fn wait_backoff(&self) -> BackoffConfig {
        self.backoff.unwrap_or_else(BackoffConfig::metrics)
    }

    /// Returns whether a series passes every matcher.
    #[must_use]
    pub fn selects(&self, metric: &Metric) -> bool {
        self.matchers.iter().all(|m| m.matches_metric(metric))
    }

    /// Number taken from a selected series.
    #[must_use]
    pub fn extract(&self, metric: &Metric) -> f64 {
        match self.value_mode {
            ValueMode::Value => metric.value.value(),
            ValueMode::Count => metric.value.sample_count().unwrap_or(0.0),
        }
    }

    /// Sums the selected series of a family.
    ///
    /// Returns `None` when no series is selected. A NaN in any selected
    /// series makes the sum NaN.
    #[must_use]
    pub fn sum(&self, family: &MetricFamily) -> Option<f64> {
        let mut selected = family.metrics.iter().filter(|m| self.selects(m)).peekable();
        selected.peek()?;
        Some(selected.map(|m| self.extract(m)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const DOCUMENT: &str = r#"
# TYPE metric_a gauge
metric_a{first="value1"} 10
metric_a{first="value1",something="x"} 4
metric_a{first="value1",something2="a"} 203
metric_a{first="value2"} 2
metric_a{second="value1"} 1
metric_a 1
# TYPE latency_seconds histogram
latency_seconds_bucket{le="+Inf"} 5
latency_seconds_sum 2.5
latency_seconds_count 5
metric_nan NaN
metric_nan 1
"#;

    fn family(name: &str) -> MetricFamily {
        parse(DOCUMENT).expect("document should parse")[name].clone()
    }

    #[test]
    fn sums_every_series_without_matchers() {
        let sum = MetricsOptions::new().sum(&family("metric_a"));
        assert_eq!(sum, Some(221.0));
    }

    #[test]
    fn matchers_filter_series() {
        let first = MetricsOptions::new().label_matcher(LabelMatcher::equal("first", "value1"));
        assert_eq!(first.sum(&family("metric_a")), Some(217.0));

        let unlabelled = MetricsOptions::new()
            .label_matcher(LabelMatcher::equal("first", ""))
            .label_matcher(LabelMatcher::equal("second", ""));
        assert_eq!(unlabelled.sum(&family("metric_a")), Some(1.0));

        let regex = MetricsOptions::new()
            .label_matcher(LabelMatcher::regex("first", "value[12]").unwrap())
            .label_matcher(LabelMatcher::not_equal("something", "x"));
        assert_eq!(regex.sum(&family("metric_a")), Some(215.0));
    }

    #[test]
    fn nothing_selected_is_none() {
        let opts = MetricsOptions::new().label_matcher(LabelMatcher::equal("first", "nope"));
        assert_eq!(opts.sum(&family("metric_a")), None);
    }

    #[test]
    fn count_mode_reads_observation_counts() {
        let histogram = family("latency_seconds");
        assert_eq!(MetricsOptions::new().sum(&histogram), Some(2.5));
        assert_eq!(
            MetricsOptions::new().with_metric_count().sum(&histogram),
            Some(5.0)
        );
        assert_eq!(
            MetricsOptions::new().with_metric_count().sum(&family("metric_a")),
            Some(0.0)
        );
    }

    #[test]
    fn nan_propagates_through_sums() {
        let sum = MetricsOptions::new().sum(&family("metric_nan"));
        assert!(sum.is_some_and(f64::is_nan));
    }

    #[test]
    fn wait_backoff_defaults_to_metrics_policy() {
        assert_eq!(MetricsOptions::new().wait_backoff(), BackoffConfig::metrics());
    }
}
