//! Parser for the Prometheus text exposition format.
//!
//! A document is lexed line by line (see [`lexer`]) and the samples are then
//! grouped into [`MetricFamily`] values. `# TYPE` declarations decide how
//! suffixed samples attach: `_bucket`, `_sum`, and `_count` samples of a
//! declared histogram (and `_sum`, `_count` of a summary) fold into one
//! series per label set. Samples of undeclared names form untyped families.

pub mod lexer;
pub mod model;

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

pub use self::model::{
    Bucket, Metric, MetricFamilies, MetricFamily, MetricType, MetricValue, Quantile,
};
use self::lexer::{Line, RawSample, lex_line, parse_float};

/// A document that is not valid exposition text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// One-based line number.
    pub line: usize,
    /// What was wrong with it.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Value,
    Bucket,
    Sum,
    Count,
}

#[derive(Debug, Default)]
struct FamilyBuilder {
    help: Option<String>,
    kind: MetricType,
    metrics: Vec<Metric>,
    index: HashMap<BTreeMap<String, String>, usize>,
}

impl FamilyBuilder {
    fn add_simple(&mut self, labels: BTreeMap<String, String>, sample: &RawSample<'_>) {
        self.metrics.push(Metric {
            labels,
            value: MetricValue::Simple(sample.value),
            timestamp_ms: sample.timestamp_ms,
        });
    }

    fn aggregate(&mut self, labels: BTreeMap<String, String>) -> &mut Metric {
        let empty = if self.kind == MetricType::Histogram {
            MetricValue::Histogram {
                sum: 0.0,
                count: 0.0,
                buckets: Vec::new(),
            }
        } else {
            MetricValue::Summary {
                sum: 0.0,
                count: 0.0,
                quantiles: Vec::new(),
            }
        };
        let next = self.metrics.len();
        let idx = *self.index.entry(labels.clone()).or_insert(next);
        if idx == next {
            self.metrics.push(Metric {
                labels,
                value: empty,
                timestamp_ms: None,
            });
        }
        &mut self.metrics[idx]
    }

    fn add_aggregate(
        &mut self,
        mut labels: BTreeMap<String, String>,
        role: Role,
        sample: &RawSample<'_>,
    ) -> Result<(), String> {
        let bound_label = if self.kind == MetricType::Histogram {
            "le"
        } else {
            "quantile"
        };
        let bound = match role {
            Role::Bucket | Role::Value => {
                let raw = labels
                    .remove(bound_label)
                    .ok_or_else(|| format!("{} sample without {bound_label} label", sample.name))?;
                Some(
                    parse_float(&raw)
                        .ok_or_else(|| format!("invalid {bound_label} value {raw:?}"))?,
                )
            }
            Role::Sum | Role::Count => None,
        };

        let metric = self.aggregate(labels);
        metric.timestamp_ms = sample.timestamp_ms.or(metric.timestamp_ms);
        match (&mut metric.value, role, bound) {
            (MetricValue::Histogram { buckets, .. }, Role::Bucket, Some(upper_bound)) => {
                buckets.push(Bucket {
                    upper_bound,
                    cumulative_count: sample.value,
                });
            }
            (MetricValue::Summary { quantiles, .. }, Role::Value, Some(quantile)) => {
                quantiles.push(Quantile {
                    quantile,
                    value: sample.value,
                });
            }
            (
                MetricValue::Histogram { sum, .. } | MetricValue::Summary { sum, .. },
                Role::Sum,
                _,
            ) => *sum = sample.value,
            (
                MetricValue::Histogram { count, .. } | MetricValue::Summary { count, .. },
                Role::Count,
                _,
            ) => *count = sample.value,
            _ => return Err(format!("sample {} does not fit its family", sample.name)),
        }
        Ok(())
    }
}

/// Resolves which family a sample name belongs to and in which role.
fn resolve<'a>(name: &'a str, types: &HashMap<&str, MetricType>) -> (&'a str, Role) {
    let declared = |base: &str, allowed: &[MetricType]| {
        types.get(base).is_some_and(|kind| allowed.contains(kind))
    };
    let aggregates = [MetricType::Histogram, MetricType::Summary];
    if let Some(base) = name.strip_suffix("_bucket") {
        if declared(base, &[MetricType::Histogram]) {
            return (base, Role::Bucket);
        }
    }
    if let Some(base) = name.strip_suffix("_sum") {
        if declared(base, &aggregates) {
            return (base, Role::Sum);
        }
    }
    if let Some(base) = name.strip_suffix("_count") {
        if declared(base, &aggregates) {
            return (base, Role::Count);
        }
    }
    (name, Role::Value)
}

/// Parses an exposition document into families keyed by name.
///
/// # Errors
///
/// Returns a [`ParseError`] naming the first offending line: a malformed
/// line, a name declared with two types, or a histogram or summary sample
/// that cannot be attached to its family.
pub fn parse(text: &str) -> Result<MetricFamilies, ParseError> {
    let mut lines = Vec::new();
    let mut types: HashMap<&str, MetricType> = HashMap::new();
    let mut helps: HashMap<&str, String> = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let error = |message: String| ParseError {
            line: line_no,
            message,
        };
        match lex_line(raw).map_err(error)? {
            Line::Type { name, kind } => {
                if let Some(previous) = types.insert(name, kind) {
                    if previous != kind {
                        return Err(error(format!("{name} declared as {previous:?} and {kind:?}")));
                    }
                }
            }
            Line::Help { name, text } => {
                let _ = helps.insert(name, text);
            }
            Line::Sample(sample) => lines.push((line_no, sample)),
            Line::Blank | Line::Comment => {}
        }
    }

    let mut builders: BTreeMap<String, FamilyBuilder> = BTreeMap::new();
    for (line_no, sample) in lines {
        let (family, role) = resolve(sample.name, &types);
        let kind = types.get(family).copied().unwrap_or_default();
        let builder = builders.entry(family.to_string()).or_insert_with(|| FamilyBuilder {
            kind,
            ..FamilyBuilder::default()
        });

        let mut labels = BTreeMap::new();
        for (name, value) in &sample.labels {
            if labels.insert((*name).to_string(), value.clone()).is_some() {
                return Err(ParseError {
                    line: line_no,
                    message: format!("duplicate label {name}"),
                });
            }
        }

        if kind.is_aggregate() {
            builder
                .add_aggregate(labels, role, &sample)
                .map_err(|message| ParseError {
                    line: line_no,
                    message,
                })?;
        } else {
            builder.add_simple(labels, &sample);
        }
    }

    Ok(builders
        .into_iter()
        .map(|(name, builder)| {
            let family = MetricFamily {
                help: helps.remove(name.as_str()),
                name: name.clone(),
                kind: builder.kind,
                metrics: builder.metrics,
            };
            (name, family)
        })
        .collect())
}
