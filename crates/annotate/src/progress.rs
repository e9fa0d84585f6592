use crate::error::AnnotateError;

/// Receives progress of long-running batch and export jobs.
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, current: usize, total: usize, message: &str);
    fn report_failure(&self, error: &AnnotateError);
}

/// Forwards progress to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report_progress(&self, current: usize, total: usize, message: &str) {
        tracing::info!(current, total, "{}", message);
    }

    fn report_failure(&self, error: &AnnotateError) {
        tracing::error!(error = %error, kind = error.kind().as_str(), "Job step failed");
    }
}

/// Discards all reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report_progress(&self, _: usize, _: usize, _: &str) {}
    fn report_failure(&self, _: &AnnotateError) {}
}
