//! Aggregate teardown
//!
//! Every component is given the chance to stop before any failure is
//! reported, so one misbehaving build cannot leak the resources of the
//! components after it.

use std::sync::Arc;

use tracing::warn;

use crate::error::StopError;

/// A component that releases resources when stopped
pub trait Stoppable {
    /// Human-readable name used in teardown errors
    fn describe(&self) -> String;

    /// Release the component's resources
    fn stop(&self) -> Result<(), StopError>;
}

impl<T: Stoppable + ?Sized> Stoppable for Arc<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn stop(&self) -> Result<(), StopError> {
        (**self).stop()
    }
}

/// Stop every component, then report the collected failures
///
/// A single failure is returned unchanged; several are combined into
/// [`StopError::Aggregate`].
pub fn stop_all<'a, I, S>(components: I) -> Result<(), StopError>
where
    I: IntoIterator<Item = &'a S>,
    S: Stoppable + ?Sized + 'a,
{
    run_all(components, |component| component.stop())
}

/// Apply a fallible teardown step to every item, collecting failures
pub fn run_all<'a, I, S, F>(items: I, mut step: F) -> Result<(), StopError>
where
    I: IntoIterator<Item = &'a S>,
    S: Stoppable + ?Sized + 'a,
    F: FnMut(&S) -> Result<(), StopError>,
{
    let mut failures = Vec::new();
    for item in items {
        if let Err(e) = step(item) {
            warn!("Failed to stop {}: {e}", item.describe());
            failures.push(e);
        }
    }
    StopError::from_failures(failures)
}
