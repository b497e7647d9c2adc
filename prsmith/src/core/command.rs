//! Command allowlist for plan steps and verification commands.
//!
//! Plans come from a language model and are never trusted. Every command is
//! resolved into the closed [`Program`] vocabulary and screened for dangerous
//! text before anything is spawned. The screen is a substring/token check, not a
//! parser, and deliberately errs towards rejection.

use std::fmt;

/// Programs a plan may invoke. There is no shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// Version control.
    Git,
    /// Package manager.
    Npm,
    /// General-purpose runtime.
    Node,
}

impl Program {
    /// Resolve a raw program name. Matching is exact: `Git`, `git.exe` or
    /// `/usr/bin/git` are all outside the vocabulary.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "git" => Some(Self::Git),
            "npm" => Some(Self::Npm),
            "node" => Some(Self::Node),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Npm => "npm",
            Self::Node => "node",
        }
    }

    pub const ALL: [Program; 3] = [Program::Git, Program::Npm, Program::Node];
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substrings that reject a command wherever they appear in the lowercased
/// `program args...` text.
const BLOCKED_SUBSTRINGS: &[&str] = &[
    "bash",
    "sh -c",
    "zsh",
    "powershell",
    "curl",
    "wget",
    "ssh ",
    "scp ",
    "netcat",
    "telnet",
    "child_process",
    "| sh",
];

/// Argument tokens that reject a command when an argument equals one of them.
const BLOCKED_TOKENS: &[&str] = &["sh", "ssh", "scp", "nc", "rsh"];

/// Git settings and options that make git run an arbitrary command. Matched
/// as substrings of each lowercased git argument, so `-c key=...`,
/// `--config-env=key=...` and `git config key ...` are all caught.
const BLOCKED_GIT_SETTINGS: &[&str] = &[
    "alias.",
    "core.pager",
    "core.editor",
    "core.sshcommand",
    "core.fsmonitor",
    "core.hookspath",
    "core.gitproxy",
    "core.askpass",
    "sequence.editor",
    "diff.external",
    "credential.helper",
    "pager.",
    "uploadpack.",
    "protocol.ext",
    "ext::",
    "--upload-pack",
    "--receive-pack",
    "--exec",
];

/// A command that passed the allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub program: Program,
    pub args: Vec<String>,
}

impl ValidatedCommand {
    /// Human-readable `program arg1 arg2` rendering for logs and errors.
    pub fn display(&self) -> String {
        render_command(self.program.as_str(), &self.args)
    }
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownProgram(String),
    BlockedPattern(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProgram(name) => write!(
                f,
                "program '{name}' is not allowed (allowed: {})",
                Program::ALL.map(Program::as_str).join(", ")
            ),
            Self::BlockedPattern(pattern) => write!(f, "contains blocked pattern '{pattern}'"),
        }
    }
}

/// Validate a `(program, args)` pair against the allowlist.
pub fn validate(program: &str, args: &[String]) -> Result<ValidatedCommand, Rejection> {
    let Some(resolved) = Program::parse(program) else {
        return Err(Rejection::UnknownProgram(program.to_string()));
    };

    let joined = render_command(program, args).to_lowercase();
    if let Some(pattern) = BLOCKED_SUBSTRINGS.iter().find(|p| joined.contains(*p)) {
        return Err(Rejection::BlockedPattern(pattern));
    }
    for arg in args {
        let token = arg.trim().to_lowercase();
        if let Some(pattern) = BLOCKED_TOKENS.iter().find(|t| **t == token) {
            return Err(Rejection::BlockedPattern(pattern));
        }
        if resolved == Program::Git
            && let Some(pattern) = BLOCKED_GIT_SETTINGS.iter().find(|p| token.contains(*p))
        {
            return Err(Rejection::BlockedPattern(pattern));
        }
    }

    Ok(ValidatedCommand {
        program: resolved,
        args: args.to_vec(),
    })
}

/// True if the command may run.
pub fn allowed(program: &str, args: &[String]) -> bool {
    validate(program, args).is_ok()
}

/// Render `program args...` with single spaces.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn programs_outside_vocabulary_are_rejected_regardless_of_args() {
        for program in ["bash", "sh", "python", "rm", "Git", "/usr/bin/git", "", "npx"] {
            for argv in [args(&[]), args(&["status"]), args(&["install", "left-pad"])] {
                assert!(!allowed(program, &argv), "{program} {argv:?} must be rejected");
            }
        }
    }

    #[test]
    fn vocabulary_programs_with_plain_args_are_allowed() {
        assert!(allowed("git", &args(&["status"])));
        assert!(allowed("npm", &args(&["install"])));
        assert!(allowed(
            "node",
            &args(&["-e", "require('fs').writeFileSync('a.txt','hi')"])
        ));
    }

    #[test]
    fn blocked_substrings_reject_allowed_programs() {
        let cases = [
            ("node", args(&["-e", "require('child_process').execSync('id')"])),
            ("npm", args(&["exec", "--", "bash", "-c", "id"])),
            ("git", args(&["clone", "x", "&&", "curl", "evil"])),
            ("npm", args(&["run", "WGET http://x"])),
            ("git", args(&["-c", "core.sshCommand=ssh -i key", "fetch"])),
            ("node", args(&["x.js", "|", "sh"])),
            ("git", args(&["-c", "alias.hang=!(sleep 12 &) ; sleep 12", "hang"])),
            ("git", args(&["-c", "Alias.p=!echo $GITHUB_TOKEN; exit 1", "p"])),
            ("git", args(&["config", "alias.x", "!id"])),
            ("git", args(&["-c", "core.pager=id", "log"])),
            ("git", args(&["-c", "core.editor=id", "commit"])),
            ("git", args(&["--config-env=core.sshCommand=CMD", "fetch"])),
            ("git", args(&["clone", "--upload-pack=id", "x"])),
        ];
        for (program, argv) in cases {
            assert!(
                matches!(validate(program, &argv), Err(Rejection::BlockedPattern(_))),
                "{program} {argv:?} must be blocked"
            );
        }
    }

    #[test]
    fn blocked_tokens_match_whole_arguments_only() {
        assert!(!allowed("npm", &args(&["exec", "sh"])));
        assert!(!allowed("npm", &args(&["exec", "NC"])));
        assert!(allowed("npm", &args(&["install", "snc-utils"])));
    }

    #[test]
    fn harmless_git_settings_are_allowed() {
        assert!(allowed("git", &args(&["-c", "color.ui=false", "status"])));
        assert!(allowed("git", &args(&["config", "user.name", "bot"])));
        assert!(allowed("npm", &args(&["run", "alias.build"])));
    }

    #[test]
    fn shell_invocation_is_rejected_as_unknown_program() {
        let err = validate("bash", &args(&["-c", "curl evil"])).unwrap_err();
        assert_eq!(err, Rejection::UnknownProgram("bash".to_string()));
        assert!(err.to_string().contains("git, npm, node"));
    }

    #[test]
    fn validated_command_renders_for_logs() {
        let cmd = validate("git", &args(&["add", "-A"])).expect("allowed");
        assert_eq!(cmd.program, Program::Git);
        assert_eq!(cmd.display(), "git add -A");
    }
}
