//! Pull request submission and success bookkeeping.

use tracing::{info, instrument, warn};

use crate::context::JobContext;
use crate::core::body::{pr_title, render_body};
use crate::core::plan::Plan;
use crate::core::types::{Job, JobPhase};
use crate::error::JobError;
use crate::io::brain::{RepoPatch, ThreadPatch, timestamp_now};
use crate::io::code_host::{CodeHost, PullRequest};
use crate::io::workspace::Workspace;

/// An opened pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub url: String,
    pub branch: String,
}

pub struct ChangeSubmitter<'a> {
    host: &'a dyn CodeHost,
}

impl<'a> ChangeSubmitter<'a> {
    pub fn new(host: &'a dyn CodeHost) -> Self {
        Self { host }
    }

    /// Open the pull request for a pushed job branch and record it in the brain.
    #[instrument(skip_all, fields(job_id = %job.id, branch = %workspace.branch))]
    pub fn submit(
        &self,
        ctx: &JobContext<'_>,
        job: &Job,
        workspace: &Workspace,
        plan: &Plan,
    ) -> Result<Submission, JobError> {
        let request = PullRequest {
            title: pr_title(plan),
            head: workspace.branch.clone(),
            base: workspace.base_branch.clone(),
            body: render_body(plan, &job.task),
        };
        let url = self
            .host
            .open_pull_request(&job.target, &request)
            .map_err(|err| {
                ctx.fail(JobError::CodeHost {
                    message: format!("{err:#}"),
                })
            })?;
        ctx.phase(JobPhase::Submitted);
        info!(url = %url, "job submitted");

        let thread_patch = ThreadPatch {
            last_pr_url: Some(url.clone()),
            last_branch: Some(workspace.branch.clone()),
            last_job_id: Some(job.id.clone()),
            last_error: Some(None),
            ..ThreadPatch::default()
        };
        if let Err(err) = ctx.store.save_thread(&job.thread_key, &thread_patch) {
            warn!(err = %format!("{err:#}"), "failed to record success on thread");
        }
        let repo_patch = RepoPatch {
            last_touched_at: Some(timestamp_now()),
            last_pr_url: Some(url.clone()),
            last_branch: Some(workspace.branch.clone()),
            ..RepoPatch::default()
        };
        if let Err(err) = ctx.store.save_repo(&job.target.key(), &repo_patch) {
            warn!(err = %format!("{err:#}"), "failed to record success on repo");
        }

        Ok(Submission {
            url,
            branch: workspace.branch.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::VERIFICATION_WARNING_HEADING;
    use crate::core::plan::Verification;
    use crate::core::types::Target;
    use crate::io::brain::{ErrorSlot, MemoryObjectStore, StateStore};
    use crate::io::git::{Git, GitLimits};
    use crate::io::progress::NoProgress;
    use crate::test_support::RecordingCodeHost;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn job() -> Job {
        Job {
            id: "abcd1234".to_string(),
            target: Target::new("acme", "web"),
            branch: "prsmith/20260101-000000-abcd1234".to_string(),
            task: "Add a /health endpoint".to_string(),
            thread_key: "t1".to_string(),
            requester: "u1".to_string(),
            description: None,
        }
    }

    fn workspace() -> Workspace {
        Workspace {
            path: PathBuf::from("/unused"),
            branch: "prsmith/20260101-000000-abcd1234".to_string(),
            base_branch: "develop".to_string(),
            git: Git::new("/unused", GitLimits::default()),
        }
    }

    fn store_with_error() -> StateStore {
        let store = StateStore::new(Arc::new(MemoryObjectStore::new()), "ns");
        store.record_error(
            "t1",
            ErrorSlot {
                message: "old failure".to_string(),
                context: "step".to_string(),
                ..ErrorSlot::default()
            },
        );
        store
    }

    #[test]
    fn submit_opens_pr_against_base_and_clears_error() {
        let store = store_with_error();
        let host = RecordingCodeHost::new("develop");
        let ctx = JobContext {
            job_id: "abcd1234",
            thread_key: "t1",
            store: &store,
            progress: &NoProgress,
            log_tail_chars: 100,
        };
        let plan = Plan {
            title: "Add health endpoint".to_string(),
            summary_bullets: vec!["Adds GET /health".to_string()],
            verification: Some(Verification {
                commands: vec![vec!["npm".to_string(), "test".to_string()]],
                failed: true,
                log: "$ npm test\nboom".to_string(),
            }),
            ..Plan::default()
        };

        let submission = ChangeSubmitter::new(&host)
            .submit(&ctx, &job(), &workspace(), &plan)
            .expect("submit");
        assert_eq!(submission.url, "https://example.test/acme/web/pull/1");

        let (target, request) = &host.requests()[0];
        assert_eq!(target, &Target::new("acme", "web"));
        assert_eq!(request.base, "develop");
        assert_eq!(request.title, "Add health endpoint");
        assert!(request.body.contains("## Task\n\nAdd a /health endpoint"));
        assert!(request.body.contains(VERIFICATION_WARNING_HEADING));

        let thread = store.load_thread("t1").expect("thread");
        assert!(thread.last_error.is_none());
        assert_eq!(thread.last_pr_url.as_deref(), Some(submission.url.as_str()));
        assert_eq!(thread.last_job_id.as_deref(), Some("abcd1234"));
        let repo = store.load_repo("acme/web").expect("repo");
        assert_eq!(repo.last_branch.as_deref(), Some(submission.branch.as_str()));
        assert!(repo.last_touched_at.is_some());
    }

    #[test]
    fn host_failure_is_recorded_as_pull_request_error() {
        let store = store_with_error();
        let host = RecordingCodeHost::failing("422 Validation Failed");
        let ctx = JobContext {
            job_id: "abcd1234",
            thread_key: "t1",
            store: &store,
            progress: &NoProgress,
            log_tail_chars: 100,
        };
        let err = ChangeSubmitter::new(&host)
            .submit(&ctx, &job(), &workspace(), &Plan::default())
            .unwrap_err();
        assert!(matches!(err, JobError::CodeHost { .. }));
        let slot = store.load_thread("t1").and_then(|t| t.last_error).expect("slot");
        assert_eq!(slot.context, "pull-request");
        assert!(slot.message.contains("422"));
    }
}
