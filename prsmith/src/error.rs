//! Terminal failures of a job.
//!
//! Adapters inside `io` return `anyhow::Result`; the pipeline converts those into
//! a [`JobError`] at the point where the failing phase is known.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::ContextTag;
use crate::exit_codes;

/// Git operations that can fail a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Clone,
    Config,
    Checkout,
    Status,
    Commit,
    Push,
}

impl GitOp {
    pub fn tag(self) -> ContextTag {
        match self {
            Self::Clone => ContextTag::GitClone,
            Self::Config => ContextTag::GitConfig,
            Self::Checkout => ContextTag::GitCheckout,
            Self::Status => ContextTag::GitStatus,
            Self::Commit => ContextTag::GitCommit,
            Self::Push => ContextTag::GitPush,
        }
    }
}

/// One terminal failure per job attempt.
#[derive(Error, Debug)]
pub enum JobError {
    /// A credential or dependency is missing; raised before any workspace exists.
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("rate limited: '{requester}' may start another job in {}s", retry_after.as_secs())]
    RateLimited {
        requester: String,
        retry_after: Duration,
    },

    /// A plan step or verification command failed the allowlist.
    #[error("command rejected: `{command}`: {reason}")]
    Validation {
        command: String,
        reason: String,
        tag: ContextTag,
    },

    /// No plan could be recovered after the repair attempt.
    #[error("could not parse plan from model output: {message}")]
    PlanParse { message: String, snippet: String },

    #[error("model request failed: {message}")]
    Model { message: String },

    #[error("{} failed: {output}", op.tag())]
    Git { op: GitOp, output: String },

    /// A plan step exited non-zero or timed out.
    #[error("step {} `{command}` failed ({}): {output}", index + 1, describe_exit(*exit_code, *timed_out))]
    Execution {
        index: usize,
        command: String,
        exit_code: Option<i32>,
        timed_out: bool,
        output: String,
    },

    /// Every step succeeded but the working tree is unchanged.
    #[error("no changes produced: the plan ran cleanly but modified no files")]
    NoChanges,

    #[error("opening pull request failed: {message}")]
    CodeHost { message: String },
}

fn describe_exit(code: Option<i32>, timed_out: bool) -> String {
    if timed_out {
        return "timed out".to_string();
    }
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl JobError {
    pub fn git(op: GitOp, err: &anyhow::Error) -> Self {
        Self::Git {
            op,
            output: format!("{err:#}"),
        }
    }

    /// Context tag stored alongside the error in the brain.
    pub fn tag(&self) -> ContextTag {
        match self {
            Self::Config { .. } => ContextTag::Config,
            Self::RateLimited { .. } => ContextTag::RateLimit,
            Self::Validation { tag, .. } => *tag,
            Self::PlanParse { .. } => ContextTag::Plan,
            Self::Model { .. } => ContextTag::Model,
            Self::Git { op, .. } => op.tag(),
            Self::Execution { .. } => ContextTag::Step,
            Self::NoChanges => ContextTag::NoChanges,
            Self::CodeHost { .. } => ContextTag::PullRequest,
        }
    }

    /// Captured process output, when the failure carried any.
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::Git { output, .. } | Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Raw model output, for plan failures.
    pub fn raw_snippet(&self) -> Option<&str> {
        match self {
            Self::PlanParse { snippet, .. } => Some(snippet),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_codes::CONFIG,
            Self::RateLimited { .. } => exit_codes::RATE_LIMITED,
            Self::Validation { .. } => exit_codes::REJECTED,
            Self::NoChanges => exit_codes::NO_CHANGES,
            _ => exit_codes::FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_names_step_and_exit() {
        let err = JobError::Execution {
            index: 1,
            command: "npm test".to_string(),
            exit_code: Some(2),
            timed_out: false,
            output: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "step 2 `npm test` failed (exit code 2): boom");
        assert_eq!(err.tag(), ContextTag::Step);
        assert_eq!(err.logs(), Some("boom"));
    }

    #[test]
    fn git_error_uses_operation_tag() {
        let err = JobError::git(GitOp::Push, &anyhow::anyhow!("rejected"));
        assert_eq!(err.tag(), ContextTag::GitPush);
        assert_eq!(err.to_string(), "git.push failed: rejected");
    }

    #[test]
    fn timed_out_step_says_so() {
        let err = JobError::Execution {
            index: 0,
            command: "npm install".to_string(),
            exit_code: None,
            timed_out: true,
            output: String::new(),
        };
        assert!(err.to_string().contains("(timed out)"));
    }
}
