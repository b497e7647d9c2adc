//! Test-only fixtures: local git remotes and scripted collaborators.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::command::ValidatedCommand;
use crate::core::types::{JobPhase, Target};
use crate::engine::{StepOutput, StepRunner};
use crate::io::code_host::{CodeHost, PullRequest};
use crate::io::git::{Git, GitLimits};
use crate::io::model::{Message, ModelClient};
use crate::io::progress::ProgressSink;
use crate::io::workspace::{Workspace, clone_url};

pub const TEST_USER_NAME: &str = "prsmith-test";
pub const TEST_USER_EMAIL: &str = "prsmith-test@example.test";

/// Run git in `dir`, panicking with its output on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", TEST_USER_NAME)
        .env("GIT_AUTHOR_EMAIL", TEST_USER_EMAIL)
        .env("GIT_COMMITTER_NAME", TEST_USER_NAME)
        .env("GIT_COMMITTER_EMAIL", TEST_USER_EMAIL)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// Initialize a repository on `main` with one committed README.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.name", TEST_USER_NAME]);
    git(dir, &["config", "user.email", TEST_USER_EMAIL]);
    fs::write(dir.join("README.md"), "# fixture\n").expect("write README");
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

/// Bare repositories laid out as `<base>/<owner>/<repo>.git`, usable as
/// `github.remote_base`.
pub struct BareRemote {
    dir: TempDir,
    pub target: Target,
}

impl BareRemote {
    /// Create `owner/repo` with `files` committed on `main`.
    pub fn new(owner: &str, repo: &str, files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = Target::new(owner, repo);
        let bare = dir.path().join(owner).join(format!("{repo}.git"));
        fs::create_dir_all(&bare).expect("create bare dir");
        git(&bare, &["init", "-q", "--bare", "-b", "main"]);

        let seed = dir.path().join("seed");
        fs::create_dir_all(&seed).expect("create seed dir");
        git(&seed, &["init", "-q", "-b", "main"]);
        for (path, contents) in files {
            let file = seed.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::write(file, contents).expect("write seed file");
        }
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "--allow-empty", "-m", "seed"]);
        let bare_arg = bare.to_string_lossy().into_owned();
        git(&seed, &["push", "-q", &bare_arg, "main"]);
        fs::remove_dir_all(&seed).expect("remove seed");

        Self { dir, target }
    }

    /// Value for `github.remote_base`.
    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn bare_path(&self) -> PathBuf {
        self.dir
            .path()
            .join(&self.target.owner)
            .join(format!("{}.git", self.target.repo))
    }

    pub fn branches(&self) -> Vec<String> {
        git(
            &self.bare_path(),
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )
        .lines()
        .map(str::to_string)
        .collect()
    }

    /// File contents at the tip of `branch`, if present.
    pub fn file_at(&self, branch: &str, path: &str) -> Option<String> {
        let out = Command::new("git")
            .args(["show", &format!("{branch}:{path}")])
            .current_dir(self.bare_path())
            .output()
            .expect("spawn git");
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).into_owned())
    }

    pub fn commit_count(&self, branch: &str) -> usize {
        git(&self.bare_path(), &["rev-list", "--count", branch])
            .trim()
            .parse()
            .expect("commit count")
    }

    /// Clone `main` into a fresh directory checked out on `branch`.
    pub fn checkout(&self, branch: &str) -> (TempDir, Workspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ws");
        let url = clone_url(&self.base().to_string_lossy(), "unused", &self.target);
        let repo = Git::clone_shallow(&url, "main", &path, GitLimits::default()).expect("clone");
        repo.set_config("user.name", TEST_USER_NAME).expect("config");
        repo.set_config("user.email", TEST_USER_EMAIL).expect("config");
        repo.checkout_new_branch(branch).expect("checkout");
        let workspace = Workspace {
            path,
            branch: branch.to_string(),
            base_branch: "main".to_string(),
            git: repo,
        };
        (temp, workspace)
    }
}

/// Model that replays canned replies and records every conversation it receives.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, messages: &[Message]) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no more replies"))
    }
}

/// One scripted command result, optionally writing files into the workspace.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub exit_code: i32,
    pub output: String,
    pub writes: Vec<(String, String)>,
}

impl ScriptedStep {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn writes(path: &str, contents: &str) -> Self {
        Self {
            writes: vec![(path.to_string(), contents.to_string())],
            ..Self::default()
        }
    }

    pub fn fails(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code,
            output: output.to_string(),
            writes: Vec::new(),
        }
    }
}

/// Step runner that never spawns anything. Unscripted commands succeed.
#[derive(Debug, Default)]
pub struct ScriptedStepRunner {
    script: Mutex<VecDeque<ScriptedStep>>,
    calls: Mutex<Vec<Vec<String>>>,
    envs: Mutex<Vec<Vec<(String, String)>>>,
}

impl ScriptedStepRunner {
    pub fn new(script: impl IntoIterator<Item = ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every command received, as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn envs(&self) -> Vec<Vec<(String, String)>> {
        self.envs.lock().expect("envs lock").clone()
    }
}

impl StepRunner for ScriptedStepRunner {
    fn run(
        &self,
        workdir: &Path,
        command: &ValidatedCommand,
        env: &[(String, String)],
    ) -> Result<StepOutput> {
        let mut argv = vec![command.program.as_str().to_string()];
        argv.extend(command.args.iter().cloned());
        self.calls.lock().expect("calls lock").push(argv);
        self.envs.lock().expect("envs lock").push(env.to_vec());

        let step = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_default();
        for (path, contents) in &step.writes {
            let file = workdir.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(file, contents)?;
        }
        Ok(StepOutput {
            exit_code: Some(step.exit_code),
            timed_out: false,
            output: step.output,
        })
    }
}

/// Code host that records pull requests instead of opening them.
#[derive(Debug)]
pub struct RecordingCodeHost {
    pub default_branch: String,
    pub fail_with: Option<String>,
    requests: Mutex<Vec<(Target, PullRequest)>>,
}

impl RecordingCodeHost {
    pub fn new(default_branch: &str) -> Self {
        Self {
            default_branch: default_branch.to_string(),
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new("main")
        }
    }

    pub fn requests(&self) -> Vec<(Target, PullRequest)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl CodeHost for RecordingCodeHost {
    fn default_branch(&self, _target: &Target) -> Result<String> {
        Ok(self.default_branch.clone())
    }

    fn open_pull_request(&self, target: &Target, request: &PullRequest) -> Result<String> {
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{message}"));
        }
        let mut requests = self.requests.lock().expect("requests lock");
        requests.push((target.clone(), request.clone()));
        Ok(format!(
            "https://example.test/{}/{}/pull/{}",
            target.owner,
            target.repo,
            requests.len()
        ))
    }
}

/// Progress sink that keeps every event as a string.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn phases(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("phase:").map(str::to_string))
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn phase(&self, _job_id: &str, phase: JobPhase) {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("phase:{phase}"));
    }

    fn note(&self, _job_id: &str, message: &str) {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("note:{message}"));
    }
}
