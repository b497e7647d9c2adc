//! Per-job reporting handle shared by the pipeline stages.

use tracing::{info, warn};

use crate::core::text::{cap_chars, redact_secrets, tail_chars};
use crate::core::types::JobPhase;
use crate::error::JobError;
use crate::io::brain::{ErrorSlot, StateStore, timestamp_now};
use crate::io::progress::ProgressSink;

const MESSAGE_CAP_CHARS: usize = 2_000;
const RAW_SNIPPET_CAP_CHARS: usize = 1_500;

/// Publishes phases and records terminal failures for one job.
pub struct JobContext<'a> {
    pub job_id: &'a str,
    pub thread_key: &'a str,
    pub store: &'a StateStore,
    pub progress: &'a dyn ProgressSink,
    pub log_tail_chars: usize,
}

impl JobContext<'_> {
    pub fn phase(&self, phase: JobPhase) {
        info!(job_id = self.job_id, %phase, "job phase");
        self.progress.phase(self.job_id, phase);
    }

    pub fn note(&self, message: &str) {
        self.progress.note(self.job_id, message);
    }

    /// Record `err` in the thread's error slot and hand it back for propagation.
    pub fn fail(&self, err: JobError) -> JobError {
        warn!(job_id = self.job_id, context = %err.tag(), err = %err, "job failed");
        self.store.record_error(self.thread_key, self.error_slot(&err));
        err
    }

    fn error_slot(&self, err: &JobError) -> ErrorSlot {
        ErrorSlot {
            message: cap_chars(&redact_secrets(&err.to_string()), MESSAGE_CAP_CHARS),
            at: timestamp_now(),
            job_id: Some(self.job_id.to_string()),
            context: err.tag().as_str().to_string(),
            logs: err
                .logs()
                .filter(|l| !l.trim().is_empty())
                .map(|l| tail_chars(&redact_secrets(l), self.log_tail_chars)),
            raw_snippet: err
                .raw_snippet()
                .map(|s| cap_chars(&redact_secrets(s), RAW_SNIPPET_CAP_CHARS)),
        }
    }
}
