//! Helpers spanning several runnables.

use rigging_common::error::Result;
use rigging_core::runnable::Runnable;

/// Starts every runnable, then waits for each to become ready.
///
/// Starting all of them first lets slow images pull and boot in parallel.
///
/// # Errors
///
/// Returns the first start or readiness failure. Runnables started before
/// the failure keep running until stopped or the environment closes.
pub fn start_and_wait_ready(runnables: &[&Runnable]) -> Result<()> {
    for runnable in runnables {
        runnable.start()?;
    }
    for runnable in runnables {
        runnable.wait_ready()?;
    }
    tracing::info!(count = runnables.len(), "runnables ready");
    Ok(())
}
