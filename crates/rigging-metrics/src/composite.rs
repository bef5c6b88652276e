//! Several instrumented runnables summed as one logical service.

use rigging_common::error::{Result, RiggingError};

use crate::instrumented::InstrumentedRunnable;
use crate::options::MetricsOptions;
use crate::source::{MetricsSource, ScrapeTarget};

/// Sums the same metric names across every member before a predicate sees
/// them.
#[derive(Debug, Clone)]
pub struct CompositeInstrumentedRunnable {
    name: String,
    members: Vec<InstrumentedRunnable>,
}

impl CompositeInstrumentedRunnable {
    /// Groups `members` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] if `members` is empty.
    pub fn new(
        name: impl Into<String>,
        members: impl IntoIterator<Item = InstrumentedRunnable>,
    ) -> Result<Self> {
        let name = name.into();
        let members: Vec<_> = members.into_iter().collect();
        if members.is_empty() {
            return Err(RiggingError::config(format!(
                "composite {name} needs at least one member"
            )));
        }
        Ok(Self { name, members })
    }

    /// Members in construction order.
    #[must_use]
    pub fn members(&self) -> &[InstrumentedRunnable] {
        &self.members
    }

    /// Starts every member.
    ///
    /// # Errors
    ///
    /// Returns the first start failure.
    pub fn start(&self) -> Result<()> {
        self.members.iter().try_for_each(|m| m.start())
    }

    /// Waits for every member to become ready.
    ///
    /// # Errors
    ///
    /// Returns the first readiness failure.
    pub fn wait_ready(&self) -> Result<()> {
        self.members.iter().try_for_each(|m| m.wait_ready())
    }

    /// Stops every member, attempting all of them.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure.
    pub fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for member in &self.members {
            if let Err(err) = member.stop() {
                tracing::warn!(composite = %self.name, runnable = member.name(), error = %err, "member stop failed");
                let _ = first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl MetricsSource for CompositeInstrumentedRunnable {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn sum_metrics(&self, names: &[&str], options: &MetricsOptions) -> Result<Vec<f64>> {
        let mut sums = vec![0.0; names.len()];
        for member in &self.members {
            let partials = member.sum_metrics(names, options)?;
            for (sum, partial) in sums.iter_mut().zip(partials) {
                *sum += partial;
            }
        }
        Ok(sums)
    }

    fn exports(&self, name: &str, options: &MetricsOptions) -> Result<bool> {
        for member in &self.members {
            if member.exports(name, options)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn metric_targets(&self) -> Vec<ScrapeTarget> {
        self.members
            .iter()
            .flat_map(|member| member.metric_targets())
            .collect()
    }
}
