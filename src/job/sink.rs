// SPDX-License-Identifier: GPL-3.0-only
use crate::job::models::JobOutcome;

/// Receives the terminal outcome of one job.
///
/// `complete` consumes the sink, so it can run at most once. Implementations
/// must return promptly: follow-on work such as downloading a result belongs
/// in a spawned task.
pub trait CompletionSink: Send + 'static {
    fn complete(self: Box<Self>, outcome: JobOutcome);
}

impl<F> CompletionSink for F
where
    F: FnOnce(JobOutcome) + Send + 'static,
{
    fn complete(self: Box<Self>, outcome: JobOutcome) {
        (*self)(outcome)
    }
}
