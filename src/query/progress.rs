//! Execution progress hooks
//!
//! A [`ProgressCallback`] observes a live run step by step. Fan-out steps
//! also report each finished member, and FETCH reports each page.

use super::error::QueryError;
use super::planner::Step;

/// Observer of plan execution. Every method is a no-op unless overridden.
///
/// Members of a fan-out finish concurrently, so `on_step_progress` may be
/// called from several tasks; `current` still counts up by one per call.
pub trait ProgressCallback: Send + Sync {
    fn on_step_start(&self, _step: &Step) {}

    /// `total` is `None` while the size of the step is unknown (paged FETCH)
    fn on_step_progress(&self, _step: &Step, _current: usize, _total: Option<usize>) {}

    fn on_step_complete(&self, _step: &Step, _records: usize) {}

    fn on_step_error(&self, _step: &Step, _error: &QueryError) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressCallback for NullProgress {}
