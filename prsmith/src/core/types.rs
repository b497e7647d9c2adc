//! Shared deterministic types for the job pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Repository a job targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub owner: String,
    pub repo: String,
}

impl Target {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse `owner/repo`.
    pub fn parse(slug: &str) -> Option<Self> {
        let (owner, repo) = slug.trim().split_once('/')?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(owner, repo))
    }

    /// Brain key for the repository scope.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Identity of one job invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Random 8-char lowercase alphanumeric token.
    pub id: String,
    pub target: Target,
    pub branch: String,
    pub task: String,
    /// Conversation the job was requested from; keys the thread record.
    pub thread_key: String,
    pub requester: String,
    /// Optional repository description supplied by the caller.
    pub description: Option<String>,
}

/// Strictly sequential phases of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Cloned,
    Configured,
    Branched,
    Planned,
    /// Running step `index` (0-based) of `total`.
    Executing { index: usize, total: usize },
    Verifying,
    ChangeChecked,
    Committed,
    Pushed,
    Submitted,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloned => f.write_str("cloned"),
            Self::Configured => f.write_str("configured"),
            Self::Branched => f.write_str("branched"),
            Self::Planned => f.write_str("planned"),
            Self::Executing { index, total } => write!(f, "executing({}/{total})", index + 1),
            Self::Verifying => f.write_str("verifying"),
            Self::ChangeChecked => f.write_str("change-checked"),
            Self::Committed => f.write_str("committed"),
            Self::Pushed => f.write_str("pushed"),
            Self::Submitted => f.write_str("submitted"),
        }
    }
}

/// Which part of the pipeline an error came from, as stored in the error slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextTag {
    Config,
    RateLimit,
    Plan,
    Model,
    Validation,
    Step,
    Verify,
    GitClone,
    GitConfig,
    GitCheckout,
    GitStatus,
    GitCommit,
    GitPush,
    NoChanges,
    PullRequest,
}

impl ContextTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::RateLimit => "rate-limit",
            Self::Plan => "plan",
            Self::Model => "model",
            Self::Validation => "validation",
            Self::Step => "step",
            Self::Verify => "verify",
            Self::GitClone => "git.clone",
            Self::GitConfig => "git.config",
            Self::GitCheckout => "git.checkout",
            Self::GitStatus => "git.status",
            Self::GitCommit => "git.commit",
            Self::GitPush => "git.push",
            Self::NoChanges => "no-changes",
            Self::PullRequest => "pull-request",
        }
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
