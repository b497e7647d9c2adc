//! One job, end to end: admission, workspace, plan, execution, submission.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{info, instrument, warn};

use crate::context::JobContext;
use crate::core::naming::branch_name;
use crate::core::plan::Plan;
use crate::core::rate_limit::{Clock, RateLimiter, SystemClock};
use crate::core::types::{Job, JobPhase, Target};
use crate::engine::{EngineConfig, ExecutionEngine, ExecutionOutcome, StepRunner};
use crate::error::JobError;
use crate::io::brain::{RepoState, StateStore, ThreadPatch, ThreadState};
use crate::io::code_host::CodeHost;
use crate::io::config::Config;
use crate::io::git::GitLimits;
use crate::io::model::ModelClient;
use crate::io::progress::ProgressSink;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::workspace::{Workspace, WorkspaceManager, repo_context};
use crate::planner::PlanGenerator;
use crate::submit::{ChangeSubmitter, Submission};

const JOB_ID_LEN: usize = 8;
const JOB_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase alphanumeric job id.
pub fn new_job_id() -> String {
    let mut rng = rand::thread_rng();
    (0..JOB_ID_LEN)
        .map(|_| char::from(JOB_ID_ALPHABET[rng.gen_range(0..JOB_ID_ALPHABET.len())]))
        .collect()
}

/// What the caller asks for.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub task: String,
    pub target: Target,
    pub thread_key: String,
    pub requester: String,
    pub description: Option<String>,
}

/// Everything a successful job produced.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub submission: Submission,
    pub plan: Plan,
    pub outcome: ExecutionOutcome,
}

/// External collaborators a runner drives.
pub struct Collaborators<'a> {
    pub model: &'a dyn ModelClient,
    pub host: &'a dyn CodeHost,
    pub steps: &'a dyn StepRunner,
    pub progress: &'a dyn ProgressSink,
}

/// Runs jobs one at a time. Owns the per-requester rate limiter.
pub struct JobRunner<'a> {
    config: Config,
    store: StateStore,
    workspaces: WorkspaceManager,
    deps: Collaborators<'a>,
    limiter: RateLimiter,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        config: Config,
        store: StateStore,
        github_token: &str,
        deps: Collaborators<'a>,
    ) -> Self {
        Self::with_clock(config, store, github_token, deps, Box::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        store: StateStore,
        github_token: &str,
        deps: Collaborators<'a>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let limits = GitLimits {
            timeout: config.limits.git_timeout(),
            output_limit_bytes: config.limits.output_limit_bytes,
        };
        let workspaces = WorkspaceManager::new(
            &config.workspace,
            &config.github.remote_base,
            github_token,
            limits,
        );
        let limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max_jobs,
            clock,
        );
        Self {
            config,
            store,
            workspaces,
            deps,
            limiter,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run one job. Failures are recorded in the thread's error slot before
    /// they are returned; the workspace is removed either way unless kept.
    #[instrument(skip_all, fields(target = %request.target, requester = %request.requester))]
    pub fn run(&self, request: &JobRequest) -> Result<JobReport, JobError> {
        let id = new_job_id();
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let job = Job {
            branch: branch_name(&timestamp, &id),
            id,
            target: request.target.clone(),
            task: request.task.clone(),
            thread_key: request.thread_key.clone(),
            requester: request.requester.clone(),
            description: request.description.clone(),
        };
        let ctx = JobContext {
            job_id: &job.id,
            thread_key: &job.thread_key,
            store: &self.store,
            progress: self.deps.progress,
            log_tail_chars: self.config.limits.log_tail_chars,
        };
        info!(job_id = %job.id, branch = %job.branch, "job started");

        if let Err(limited) = self.limiter.acquire(&job.requester) {
            return Err(ctx.fail(JobError::RateLimited {
                requester: job.requester.clone(),
                retry_after: limited.retry_after,
            }));
        }

        // Read memory before this job's own writes land.
        let thread_state = self.store.load_thread(&job.thread_key);
        let repo_state = self.store.load_repo(&job.target.key());
        self.save_thread(
            &job,
            ThreadPatch {
                last_repo: Some(job.target.key()),
                last_task: Some(job.task.clone()),
                last_job_id: Some(job.id.clone()),
                ..ThreadPatch::default()
            },
        );

        let default_branch = self.deps.host.default_branch(&job.target).map_err(|err| {
            ctx.fail(JobError::CodeHost {
                message: format!("default branch lookup: {err:#}"),
            })
        })?;

        let workspace = self.workspaces.prepare(&ctx, &job, &default_branch);
        let workspace = match workspace {
            Ok(workspace) => workspace,
            Err(err) => {
                self.workspaces.teardown(&self.workspaces.path_for(&job));
                return Err(err);
            }
        };

        let result = self.execute(&ctx, &job, &workspace, thread_state, repo_state);
        self.workspaces.teardown(&workspace.path);
        result
    }

    fn execute(
        &self,
        ctx: &JobContext<'_>,
        job: &Job,
        workspace: &Workspace,
        thread_state: Option<ThreadState>,
        repo_state: Option<RepoState>,
    ) -> Result<JobReport, JobError> {
        let context = repo_context(&workspace.path, job, &workspace.base_branch);
        let prompts = PromptBuilder::new(
            self.config.limits.prompt_budget_bytes,
            self.config.limits.state_snapshot_bytes,
        );
        let mut plan = PlanGenerator::new(self.deps.model, prompts).generate(
            ctx,
            &PromptInputs {
                task: &job.task,
                repo_context: Some(&context),
                thread: thread_state.as_ref(),
                repo: repo_state.as_ref(),
            },
        )?;
        ctx.phase(JobPhase::Planned);
        self.save_thread(
            job,
            ThreadPatch {
                last_plan: Some(plan.snapshot(self.config.limits.state_snapshot_bytes)),
                ..ThreadPatch::default()
            },
        );

        let engine = ExecutionEngine::new(
            self.deps.steps,
            EngineConfig {
                verify_enabled: self.config.verify.enabled,
                log_tail_chars: self.config.limits.log_tail_chars,
                author_name: self.config.workspace.git_user_name.clone(),
                author_email: self.config.workspace.git_user_email.clone(),
            },
        );
        let outcome = engine.run(ctx, workspace, &mut plan)?;
        if outcome.verification_failed {
            ctx.note("verification failed; the pull request is flagged");
        }

        let submission =
            ChangeSubmitter::new(self.deps.host).submit(ctx, job, workspace, &plan)?;
        ctx.note(&submission.url);
        Ok(JobReport {
            job_id: job.id.clone(),
            submission,
            plan,
            outcome,
        })
    }

    fn save_thread(&self, job: &Job, patch: ThreadPatch) {
        if let Err(err) = self.store.save_thread(&job.thread_key, &patch) {
            warn!(job_id = %job.id, err = %format!("{err:#}"), "failed to update thread state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_short_lowercase_alphanumeric() {
        for _ in 0..100 {
            let id = new_job_id();
            assert_eq!(id.len(), JOB_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()), "{id}");
        }
    }
}
