//! Job progress reporting. `JobContext` already logs every event, so sinks
//! only forward them to whoever is watching.

use crate::core::types::JobPhase;

/// Receives phase transitions as a job advances.
pub trait ProgressSink {
    fn phase(&self, job_id: &str, phase: JobPhase);
    /// Free-form notice (non-fatal problems, the final URL).
    fn note(&self, job_id: &str, message: &str);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn phase(&self, _job_id: &str, _phase: JobPhase) {}

    fn note(&self, _job_id: &str, _message: &str) {}
}
