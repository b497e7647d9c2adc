//! prsmith configuration (`prsmith.toml`) and credentials.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Environment variable holding the GitHub token used for clone, push and API calls.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Environment variable holding the model API key.
pub const MODEL_API_KEY_ENV: &str = "PRSMITH_MODEL_API_KEY";

/// Top-level configuration (TOML).
///
/// Missing fields default to values suitable for a single-host deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub workspace: WorkspaceConfig,
    pub model: ModelConfig,
    pub github: GithubConfig,
    pub limits: LimitsConfig,
    pub verify: VerifyConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    /// Directory backing the brain. Unset disables the brain entirely.
    pub root: Option<PathBuf>,
    /// Namespace prefix for every brain object.
    pub namespace: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: "prsmith".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for job checkouts. Unset uses the system temp dir.
    pub root: Option<PathBuf>,
    /// Keep the checkout after the job finishes (for inspection).
    pub keep: bool,
    pub git_user_name: String,
    pub git_user_email: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            keep: false,
            git_user_name: "prsmith-bot".to_string(),
            git_user_email: "prsmith-bot@users.noreply.github.com".to_string(),
        }
    }
}

impl WorkspaceConfig {
    pub fn resolved_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("prsmith"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    /// Base for clone/push URLs. An `https://` base gets the token embedded;
    /// anything else (e.g. a local directory) is used verbatim.
    pub remote_base: String,
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            remote_base: "https://github.com".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock limit for each plan step and verification command.
    pub step_timeout_secs: u64,
    /// Wall-clock limit for each git subprocess.
    pub git_timeout_secs: u64,
    /// Bytes of stdout/stderr kept per subprocess.
    pub output_limit_bytes: usize,
    /// Chars of captured output kept in errors and the brain's error slot.
    pub log_tail_chars: usize,
    /// Byte budget for the planner prompt.
    pub prompt_budget_bytes: usize,
    /// Byte cap for each serialized brain record placed in the prompt.
    pub state_snapshot_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 10 * 60,
            git_timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
            log_tail_chars: 4_000,
            prompt_budget_bytes: 40_000,
            state_snapshot_bytes: 4_000,
        }
    }
}

impl LimitsConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Run the plan's verification commands after its steps.
    pub enabled: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_jobs: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_jobs: 3,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.state.namespace.trim().is_empty() || self.state.namespace.contains(['/', '\\']) {
            return Err(anyhow!("state.namespace must be a non-empty single path segment"));
        }
        if self.model.endpoint.trim().is_empty() || self.model.model.trim().is_empty() {
            return Err(anyhow!("model.endpoint and model.model must be set"));
        }
        if self.model.timeout_secs == 0 || self.github.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs and github.timeout_secs must be > 0"));
        }
        if self.limits.step_timeout_secs == 0 || self.limits.git_timeout_secs == 0 {
            return Err(anyhow!(
                "limits.step_timeout_secs and limits.git_timeout_secs must be > 0"
            ));
        }
        if self.limits.output_limit_bytes == 0 || self.limits.log_tail_chars == 0 {
            return Err(anyhow!(
                "limits.output_limit_bytes and limits.log_tail_chars must be > 0"
            ));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_jobs == 0 {
            return Err(anyhow!("rate_limit.window_secs and rate_limit.max_jobs must be > 0"));
        }
        if self.workspace.git_user_name.trim().is_empty()
            || self.workspace.git_user_email.trim().is_empty()
        {
            return Err(anyhow!("workspace git identity must be set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Secrets read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub github_token: String,
    pub model_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read credentials, naming every missing variable in the error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let github_token = read(GITHUB_TOKEN_ENV);
        let model_api_key = read(MODEL_API_KEY_ENV);
        match (github_token, model_api_key) {
            (Some(github_token), Some(model_api_key)) => Ok(Self {
                github_token,
                model_api_key,
            }),
            (github, model) => {
                let missing: Vec<&str> = [
                    github.is_none().then_some(GITHUB_TOKEN_ENV),
                    model.is_none().then_some(MODEL_API_KEY_ENV),
                ]
                .into_iter()
                .flatten()
                .collect();
                Err(anyhow!("missing environment variables: {}", missing.join(", ")))
            }
        }
    }
}
