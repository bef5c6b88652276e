//! Parsed metric families.

use std::collections::BTreeMap;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Cumulative buckets plus sum and count.
    Histogram,
    /// Quantiles plus sum and count.
    Summary,
    /// No `# TYPE` line was given.
    #[default]
    Untyped,
}

impl MetricType {
    /// Parses the type keyword of a `# TYPE` line.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "histogram" => Some(Self::Histogram),
            "summary" => Some(Self::Summary),
            "untyped" | "unknown" => Some(Self::Untyped),
            _ => None,
        }
    }

    /// Returns whether series of this type aggregate several sample lines.
    #[must_use]
    pub const fn is_aggregate(self) -> bool {
        matches!(self, Self::Histogram | Self::Summary)
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Inclusive upper bound (`le`).
    pub upper_bound: f64,
    /// Observations at or below the bound.
    pub cumulative_count: f64,
}

/// One summary quantile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    /// Quantile rank in `0..=1`.
    pub quantile: f64,
    /// Observed value at that rank.
    pub value: f64,
}

/// Value of a single series.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Counter, gauge, or untyped sample.
    Simple(f64),
    /// Histogram series.
    Histogram {
        /// Sum of observations.
        sum: f64,
        /// Number of observations.
        count: f64,
        /// Buckets in document order.
        buckets: Vec<Bucket>,
    },
    /// Summary series.
    Summary {
        /// Sum of observations.
        sum: f64,
        /// Number of observations.
        count: f64,
        /// Quantiles in document order.
        quantiles: Vec<Quantile>,
    },
}

impl MetricValue {
    /// Instant value: the sample itself, or the sum of observations for
    /// histograms and summaries.
    #[must_use]
    pub const fn value(&self) -> f64 {
        match self {
            Self::Simple(v) => *v,
            Self::Histogram { sum, .. } | Self::Summary { sum, .. } => *sum,
        }
    }

    /// Observation count of a histogram or summary.
    #[must_use]
    pub const fn sample_count(&self) -> Option<f64> {
        match self {
            Self::Simple(_) => None,
            Self::Histogram { count, .. } | Self::Summary { count, .. } => Some(*count),
        }
    }
}

/// One labelled series of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Label set, without the `le` and `quantile` labels of aggregates.
    pub labels: BTreeMap<String, String>,
    /// Series value.
    pub value: MetricValue,
    /// Optional millisecond timestamp of the last sample line.
    pub timestamp_ms: Option<i64>,
}

impl Metric {
    /// Value of label `name`, or `""` when the series lacks it.
    #[must_use]
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map_or("", String::as_str)
    }
}

/// All series sharing one metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    /// Family name.
    pub name: String,
    /// `# HELP` text, if any.
    pub help: Option<String>,
    /// Declared type.
    pub kind: MetricType,
    /// Series in document order.
    pub metrics: Vec<Metric>,
}

/// Families keyed by name.
pub type MetricFamilies = BTreeMap<String, MetricFamily>;
