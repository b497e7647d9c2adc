//! Code host (GitHub REST) access: default branch lookup and pull requests.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::core::text::cap_chars;
use crate::core::types::Target;
use crate::io::config::GithubConfig;

/// Pull request fields sent to the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// Abstraction over the code host so jobs can run against a fake in tests.
pub trait CodeHost {
    fn default_branch(&self, target: &Target) -> Result<String>;
    /// Open a pull request and return its URL.
    fn open_pull_request(&self, target: &Target, request: &PullRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Deserialize)]
struct PullResponse {
    html_url: String,
}

/// Blocking GitHub REST client.
pub struct GithubClient {
    client: reqwest::blocking::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(config: &GithubConfig, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("prsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build GitHub HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn repo_url(&self, target: &Target) -> String {
        format!("{}/repos/{}/{}", self.api_base, target.owner, target.repo)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::blocking::Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().context("read GitHub response body")?;
        if !status.is_success() {
            return Err(anyhow!("GitHub returned {status}: {}", cap_chars(&text, 500)));
        }
        serde_json::from_str(&text).context("parse GitHub response JSON")
    }
}

impl CodeHost for GithubClient {
    #[instrument(skip_all, fields(target = %target))]
    fn default_branch(&self, target: &Target) -> Result<String> {
        let resp = self
            .client
            .get(self.repo_url(target))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .context("GitHub repository lookup failed")?;
        let repo: RepoResponse = Self::read_json(resp)?;
        Ok(repo.default_branch)
    }

    #[instrument(skip_all, fields(target = %target, head = %request.head))]
    fn open_pull_request(&self, target: &Target, request: &PullRequest) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/pulls", self.repo_url(target)))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(request)
            .send()
            .context("GitHub pull request creation failed")?;
        let pr: PullResponse = Self::read_json(resp)?;
        info!(url = %pr.html_url, "pull request opened");
        Ok(pr.html_url)
    }
}
