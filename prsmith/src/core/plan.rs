//! Plan model and its JSON wire contract.
//!
//! The same struct serves as the parsed model output and as the snapshot kept in
//! the brain, so field names follow the wire schema (`prTitle`, `steps[].cmd`, ...).

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::text::{cap_chars, redact_secrets};

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Maximum number of steps kept from a model plan.
pub const MAX_STEPS: usize = 30;
/// Maximum number of verification commands kept from a model plan.
pub const MAX_VERIFY_COMMANDS: usize = 6;

static PLAN_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).expect("plan schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("plan schema should compile")
});

/// The model's proposed unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    #[serde(rename = "prTitle")]
    pub title: String,
    #[serde(rename = "prBody")]
    pub body: String,
    #[serde(rename = "commitMessage")]
    pub commit_message: String,
    #[serde(rename = "summaryBullets")]
    pub summary_bullets: Vec<String>,
    #[serde(rename = "testPlanBullets")]
    pub test_plan_bullets: Vec<String>,
    pub steps: Vec<Step>,
    #[serde(rename = "verify", skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
}

/// One proposed command. `program` stays a raw string until validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "cmd")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Step {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Advisory verification commands plus the outcome filled in by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub commands: Vec<Vec<String>>,
    pub failed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log: String,
}

impl Plan {
    /// Check a parsed JSON value against the plan schema.
    pub fn check_schema(value: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = PLAN_VALIDATOR
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Convert a schema-conforming value into a clamped plan.
    pub fn from_value(value: Value) -> Result<Self, String> {
        Self::check_schema(&value).map_err(|errors| errors.join("; "))?;
        let plan: Plan = serde_json::from_value(value).map_err(|err| err.to_string())?;
        Ok(plan.clamped())
    }

    /// Apply size caps and normalize the verification block.
    ///
    /// Any outcome the model may have written into `verify` is discarded; only the
    /// engine sets it.
    pub fn clamped(mut self) -> Self {
        self.steps.truncate(MAX_STEPS);
        self.verification = self.verification.and_then(|v| {
            let commands: Vec<Vec<String>> = v
                .commands
                .into_iter()
                .filter(|argv| argv.first().is_some_and(|p| !p.trim().is_empty()))
                .take(MAX_VERIFY_COMMANDS)
                .collect();
            (!commands.is_empty()).then(|| Verification {
                commands,
                failed: false,
                log: String::new(),
            })
        });
        self
    }

    pub fn verification_failed(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| v.failed)
    }

    /// Copy for durable storage: credential-shaped text redacted, long text
    /// capped, and trailing steps dropped until the JSON fits `max_bytes`.
    pub fn snapshot(&self, max_bytes: usize) -> Plan {
        let redact = |text: &str, max: usize| cap_chars(&redact_secrets(text), max);
        let mut snap = Plan {
            title: redact(&self.title, 200),
            body: redact(&self.body, 1_000),
            commit_message: redact(&self.commit_message, 500),
            summary_bullets: self.summary_bullets.iter().map(|b| redact(b, 200)).collect(),
            test_plan_bullets: self.test_plan_bullets.iter().map(|b| redact(b, 200)).collect(),
            steps: self
                .steps
                .iter()
                .map(|step| Step {
                    program: redact(&step.program, 100),
                    args: step.args.iter().map(|a| redact(a, 300)).collect(),
                })
                .collect(),
            verification: self.verification.as_ref().map(|v| Verification {
                commands: v
                    .commands
                    .iter()
                    .map(|argv| argv.iter().map(|a| redact(a, 300)).collect())
                    .collect(),
                failed: v.failed,
                log: redact(&v.log, 1_000),
            }),
        };
        let size = |plan: &Plan| serde_json::to_vec(plan).map_or(0, |bytes| bytes.len());
        while size(&snap) > max_bytes && snap.steps.pop().is_some() {}
        snap
    }
}
