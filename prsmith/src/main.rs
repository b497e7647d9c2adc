//! `prsmith` command-line entry point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use prsmith::core::command::{render_command, validate};
use prsmith::core::text::redact_secrets;
use prsmith::core::types::{JobPhase, Target};
use prsmith::engine::ProcessStepRunner;
use prsmith::error::JobError;
use prsmith::exit_codes;
use prsmith::io::brain::{ErrorSlot, Scope, StateStore, timestamp_now};
use prsmith::io::code_host::GithubClient;
use prsmith::io::config::{Config, Credentials, load_config, write_config};
use prsmith::io::model::HttpModelClient;
use prsmith::io::progress::ProgressSink;
use prsmith::job::{Collaborators, JobRequest, JobRunner};

#[derive(Parser)]
#[command(
    name = "prsmith",
    version,
    about = "Turn a task description into a pull request"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "prsmith.toml")]
    config: PathBuf,
    /// Log at info level unless `RUST_LOG` is set.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, execute, and submit one task against a repository.
    Run {
        /// Target repository as `owner/repo`.
        #[arg(long, value_parser = parse_target)]
        repo: Target,
        /// Conversation key used for the thread record.
        #[arg(long)]
        thread: String,
        /// Identity the rate limit applies to.
        #[arg(long, default_value = "cli")]
        requester: String,
        /// Optional repository description passed to the planner.
        #[arg(long)]
        description: Option<String>,
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
    },
    /// Print the stored record for a thread or a repository.
    State {
        #[arg(long, conflicts_with = "repo", required_unless_present = "repo")]
        thread: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Check whether a command would pass the allowlist.
    Check {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Write a default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_target(raw: &str) -> Result<Target, String> {
    Target::parse(raw).ok_or_else(|| format!("expected owner/repo, got '{raw}'"))
}

/// Prints phase transitions for the operator.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn phase(&self, job_id: &str, phase: JobPhase) {
        eprintln!("[{job_id}] {phase}");
    }

    fn note(&self, job_id: &str, message: &str) {
        eprintln!("[{job_id}] {message}");
    }
}

fn main() {
    let cli = Cli::parse();
    prsmith::logging::init(cli.verbose);
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::CONFIG
        }
    };
    std::process::exit(code);
}

/// Errors returned here are configuration problems; job outcomes map to
/// their own exit codes.
fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            repo,
            thread,
            requester,
            description,
            task,
        } => {
            let request = JobRequest {
                task: task.join(" "),
                target: repo,
                thread_key: thread,
                requester,
                description,
            };
            cmd_run(&cli.config, &request)
        }
        Command::State { thread, repo } => cmd_state(&cli.config, thread, repo),
        Command::Check { program, args } => Ok(cmd_check(&program, &args)),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn open_store(config: &Config) -> StateStore {
    StateStore::from_root(config.state.root.as_deref(), &config.state.namespace)
}

fn cmd_run(config_path: &Path, request: &JobRequest) -> Result<i32> {
    let config = load_config(config_path)?;
    let store = open_store(&config);

    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(err) => {
            let err = JobError::Config {
                message: format!("{err:#}"),
            };
            store.record_error(
                &request.thread_key,
                ErrorSlot {
                    message: err.to_string(),
                    at: timestamp_now(),
                    job_id: None,
                    context: err.tag().as_str().to_string(),
                    logs: None,
                    raw_snippet: None,
                },
            );
            eprintln!("{err}");
            return Ok(err.exit_code());
        }
    };

    let model = HttpModelClient::new(&config.model, credentials.model_api_key.as_str())?;
    let host = GithubClient::new(&config.github, credentials.github_token.as_str())?;
    let steps = ProcessStepRunner {
        timeout: config.limits.step_timeout(),
        output_limit_bytes: config.limits.output_limit_bytes,
    };
    let runner = JobRunner::new(
        config,
        store,
        &credentials.github_token,
        Collaborators {
            model: &model,
            host: &host,
            steps: &steps,
            progress: &ConsoleProgress,
        },
    );

    match runner.run(request) {
        Ok(report) => {
            if report.outcome.verification_failed {
                eprintln!("warning: verification failed; see the pull request body");
            }
            println!("{}", report.submission.url);
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("error: {}", redact_secrets(&err.to_string()));
            Ok(err.exit_code())
        }
    }
}

fn cmd_state(config_path: &Path, thread: Option<String>, repo: Option<String>) -> Result<i32> {
    let config = load_config(config_path)?;
    let store = open_store(&config);
    if !store.is_enabled() {
        bail!("state.root is not configured; the brain is disabled");
    }
    let (scope, key) = match (thread, repo) {
        (Some(thread), _) => (Scope::Thread, thread),
        (None, Some(repo)) => (Scope::Repo, repo),
        (None, None) => bail!("pass --thread or --repo"),
    };
    match store.load_raw(scope, &key) {
        Some(record) => {
            let json = serde_json::to_string_pretty(&Value::Object(record))
                .context("serialize record")?;
            println!("{json}");
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("no {} record for '{key}'", scope.segment());
            Ok(exit_codes::NOT_FOUND)
        }
    }
}

fn cmd_check(program: &str, args: &[String]) -> i32 {
    match validate(program, args) {
        Ok(command) => {
            println!("allowed: {}", command.display());
            exit_codes::OK
        }
        Err(rejection) => {
            println!("rejected: {}: {rejection}", render_command(program, args));
            exit_codes::REJECTED
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &Config::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_joins_task_words() {
        let cli = Cli::parse_from([
            "prsmith", "run", "--repo", "acme/web", "--thread", "t1", "add", "health",
        ]);
        let Command::Run { repo, task, requester, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(repo, Target::new("acme", "web"));
        assert_eq!(task.join(" "), "add health");
        assert_eq!(requester, "cli");
    }

    #[test]
    fn parse_check_keeps_hyphen_args() {
        let cli = Cli::parse_from(["prsmith", "check", "bash", "-c", "curl x"]);
        let Command::Check { program, args } = cli.command else {
            panic!("expected check");
        };
        assert_eq!(program, "bash");
        assert_eq!(args, vec!["-c".to_string(), "curl x".to_string()]);
    }

    #[test]
    fn bad_repo_slug_is_a_usage_error() {
        assert!(
            Cli::try_parse_from(["prsmith", "run", "--repo", "nope", "--thread", "t", "x"]).is_err()
        );
    }

    #[test]
    fn state_requires_a_key() {
        assert!(Cli::try_parse_from(["prsmith", "state"]).is_err());
    }
}
