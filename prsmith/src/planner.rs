//! Plan generation: prompt, extraction, local repair, and one repair request.

use tracing::{debug, info, instrument, warn};

use crate::context::JobContext;
use crate::core::extract::parse_plan;
use crate::core::plan::Plan;
use crate::core::text::cap_chars;
use crate::error::JobError;
use crate::io::model::{Message, ModelClient};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Chars of the last raw model output kept on a parse failure.
pub const RAW_SNIPPET_CHARS: usize = 1_500;

const SYSTEM_PROMPT: &str =
    "You are prsmith's planner. You answer with a single JSON object and nothing else.";

/// Turns a task and accumulated context into a [`Plan`].
pub struct PlanGenerator<'a> {
    model: &'a dyn ModelClient,
    prompts: PromptBuilder,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(model: &'a dyn ModelClient, prompts: PromptBuilder) -> Self {
        Self { model, prompts }
    }

    /// Ask the model for a plan.
    ///
    /// Malformed output gets the local repairs first; if none yields a valid
    /// plan, the model is asked exactly once more to fix its reply.
    #[instrument(skip_all, fields(job_id = ctx.job_id))]
    pub fn generate(&self, ctx: &JobContext<'_>, input: &PromptInputs<'_>) -> Result<Plan, JobError> {
        let prompt = self.prompts.build_planner(input).map_err(|err| {
            ctx.fail(JobError::Model {
                message: format!("render planner prompt: {err:#}"),
            })
        })?;
        debug!(prompt_bytes = prompt.len(), "planner prompt built");

        let mut messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        let first = self.complete(ctx, &messages)?;
        let problem = match parse_plan(&first) {
            Ok(plan) => {
                info!(steps = plan.steps.len(), "plan parsed");
                return Ok(plan);
            }
            Err(problem) => problem,
        };

        warn!(problem = %problem, "model output unusable, requesting repair");
        let repair = self.prompts.build_repair(&problem).map_err(|err| {
            ctx.fail(JobError::Model {
                message: format!("render repair prompt: {err:#}"),
            })
        })?;
        messages.push(Message::assistant(first));
        messages.push(Message::user(repair));
        let second = self.complete(ctx, &messages)?;

        match parse_plan(&second) {
            Ok(plan) => {
                info!(steps = plan.steps.len(), "plan parsed after repair request");
                Ok(plan)
            }
            Err(message) => Err(ctx.fail(JobError::PlanParse {
                message,
                snippet: cap_chars(&second, RAW_SNIPPET_CHARS),
            })),
        }
    }

    fn complete(&self, ctx: &JobContext<'_>, messages: &[Message]) -> Result<String, JobError> {
        self.model.complete(messages).map_err(|err| {
            ctx.fail(JobError::Model {
                message: format!("{err:#}"),
            })
        })
    }
}
