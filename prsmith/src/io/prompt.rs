//! Planner prompt builder.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! After rendering, droppable sections are removed in a fixed order until the
//! prompt fits the byte budget.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::command::Program;
use crate::core::plan::{MAX_STEPS, MAX_VERIFY_COMMANDS, PLAN_SCHEMA};
use crate::core::text::{cap_chars, redact_secrets};
use crate::io::brain::{RepoState, ThreadState};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Sections removed first when the prompt is over budget.
const DROP_ORDER: [&str; 4] = ["repo_state", "thread_state", "repo_context", "last_error"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern should compile")
});

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("planner", PLANNER_TEMPLATE)
        .expect("planner template should be valid");
    env.add_template("repair", REPAIR_TEMPLATE)
        .expect("repair template should be valid");
    env
});

/// Inserted text must not open sections of its own.
fn strip_markers(text: &str) -> String {
    SECTION_RE
        .replace_all(text, "[section marker removed]")
        .into_owned()
}

fn program_names() -> Vec<&'static str> {
    Program::ALL.iter().map(|p| p.as_str()).collect()
}

/// Everything the planner prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub task: &'a str,
    pub repo_context: Option<&'a str>,
    pub thread: Option<&'a ThreadState>,
    pub repo: Option<&'a RepoState>,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over: cut the tail of the last section. The contract always survives intact.
    let total = total_len(sections);
    if total <= budget || sections.len() < 2 {
        return;
    }
    let excess = total - budget;
    if let Some(last) = sections.last_mut() {
        let keep = floor_char_boundary(&last.content, last.content.len().saturating_sub(excess));
        last.content.truncate(keep);
        last.content.push_str("\n[truncated]");
        debug!(section = %last.key, after_len = last.content.len(), "truncated section for budget");
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Serialize a brain record for the prompt: secrets redacted, at most `max_bytes`.
fn snapshot<T: serde::Serialize>(record: &T, max_bytes: usize) -> Option<String> {
    let json = serde_json::to_string_pretty(record).ok()?;
    let json = redact_secrets(&json);
    if json.len() <= max_bytes {
        return Some(json);
    }
    let cut = floor_char_boundary(&json, max_bytes);
    Some(format!("{}\n[truncated]", &json[..cut]))
}

fn last_error_hint(thread: Option<&ThreadState>) -> Option<String> {
    let slot = thread?.last_error.as_ref()?;
    let mut hint = format!("Failed during `{}`: {}", slot.context, cap_chars(&slot.message, 600));
    if let Some(logs) = slot.logs.as_deref().filter(|l| !l.trim().is_empty()) {
        hint.push_str("\nOutput tail:\n");
        hint.push_str(&cap_chars(logs, 1200));
    }
    Some(redact_secrets(&hint))
}

/// Builds planner prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    snapshot_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize, snapshot_bytes: usize) -> Self {
        Self {
            budget_bytes,
            snapshot_bytes,
        }
    }

    pub fn build_planner(&self, input: &PromptInputs<'_>) -> Result<String> {
        let thread_state = input.thread.and_then(|t| {
            // The error slot is rendered as its own section.
            let without_error = ThreadState {
                last_error: None,
                ..t.clone()
            };
            snapshot(&without_error, self.snapshot_bytes)
        });
        let repo_state = input.repo.and_then(|r| snapshot(r, self.snapshot_bytes));
        let repo_context = input
            .repo_context
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(strip_markers);

        let rendered = ENGINE.get_template("planner")?.render(context! {
            schema => PLAN_SCHEMA.trim(),
            programs => program_names(),
            max_steps => MAX_STEPS,
            max_verify => MAX_VERIFY_COMMANDS,
            task => strip_markers(input.task.trim()),
            repo_context => repo_context,
            last_error => last_error_hint(input.thread).map(|h| strip_markers(&h)),
            thread_state => thread_state.map(|t| strip_markers(&t)),
            repo_state => repo_state.map(|r| strip_markers(&r)),
        })?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Follow-up instruction sent after an unusable reply.
    pub fn build_repair(&self, problem: &str) -> Result<String> {
        let rendered = ENGINE.get_template("repair")?.render(context! {
            problem => cap_chars(problem, 500),
            programs => program_names(),
            max_steps => MAX_STEPS,
        })?;
        Ok(rendered.trim().to_string())
    }
}
