//! Predicates over metric sums.
//!
//! An [`Expectation`] receives one sum per requested metric name, in request
//! order, and declares how many it needs. Waits check that arity before the
//! first scrape.

use std::fmt;
use std::sync::Arc;

use rigging_common::error::{Result, RiggingError};

type Predicate = Arc<dyn Fn(&[f64]) -> bool + Send + Sync>;

/// A named predicate over a fixed number of metric sums.
#[derive(Clone)]
pub struct Expectation {
    arity: usize,
    description: String,
    predicate: Predicate,
}

impl Expectation {
    /// Builds an expectation from an arbitrary predicate.
    ///
    /// The predicate is only ever called with exactly `arity` sums.
    #[must_use]
    pub fn custom(
        arity: usize,
        description: impl Into<String>,
        predicate: impl Fn(&[f64]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            arity,
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The single sum equals `value`. NaN equals NaN here.
    #[must_use]
    pub fn equals(value: f64) -> Self {
        Self::custom(1, format!("== {value}"), move |sums| {
            nan_aware_eq(sums[0], value)
        })
    }

    /// The single sum is strictly greater than `value`.
    #[must_use]
    pub fn greater(value: f64) -> Self {
        Self::custom(1, format!("> {value}"), move |sums| sums[0] > value)
    }

    /// The single sum is greater than or equal to `value`.
    #[must_use]
    pub fn greater_or_equal(value: f64) -> Self {
        Self::custom(1, format!(">= {value}"), move |sums| sums[0] >= value)
    }

    /// The single sum is strictly less than `value`.
    #[must_use]
    pub fn less(value: f64) -> Self {
        Self::custom(1, format!("< {value}"), move |sums| sums[0] < value)
    }

    /// The single sum lies in the open interval `(min, max)`.
    #[must_use]
    pub fn between(min: f64, max: f64) -> Self {
        Self::custom(1, format!("in ({min}, {max})"), move |sums| {
            sums[0] > min && sums[0] < max
        })
    }

    /// The first sum equals the second. NaN equals NaN here.
    #[must_use]
    pub fn equals_among_two() -> Self {
        Self::custom(2, "first == second", |sums| nan_aware_eq(sums[0], sums[1]))
    }

    /// The first sum is strictly greater than the second.
    #[must_use]
    pub fn greater_among_two() -> Self {
        Self::custom(2, "first > second", |sums| sums[0] > sums[1])
    }

    /// The first sum is strictly less than the second.
    #[must_use]
    pub fn less_among_two() -> Self {
        Self::custom(2, "first < second", |sums| sums[0] < sums[1])
    }

    /// Number of sums the predicate needs.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// Checks that `names` metric names fit this expectation.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] on an arity mismatch.
    pub fn check_arity(&self, names: usize) -> Result<()> {
        if names == self.arity {
            return Ok(());
        }
        Err(RiggingError::config(format!(
            "expectation {self} needs {} metric names, got {names}",
            self.arity
        )))
    }

    /// Evaluates the predicate. A wrong number of sums never matches.
    #[must_use]
    pub fn matches(&self, sums: &[f64]) -> bool {
        sums.len() == self.arity && (self.predicate)(sums)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("arity", &self.arity)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::float_cmp)]
fn nan_aware_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
