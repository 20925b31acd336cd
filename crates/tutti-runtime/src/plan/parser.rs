//! 计划解析
//! Plan parsing
//!
//! Turns raw model output into a validated [`RoutingPlan`].  Parsing is a
//! pure pipeline over the extractor; generation wraps it with a bounded
//! regeneration loop that feeds the parse error back into the prompt.

use super::extract::extract_json_object;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::{CompletionRequest, LLMProvider};
use tutti_kernel::plan::{RoutingPlan, RoutingStep, StepMetadata};

/// Wire shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    step_id: String,
    component_name: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    capability: String,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
}

/// Parse raw model output into a plan for `original_request`.
pub fn parse_plan(raw: &str, original_request: &str) -> OrchestratorResult<RoutingPlan> {
    let json_text = extract_json_object(raw)?;
    let raw_plan: RawPlan = serde_json::from_str(&json_text)
        .map_err(|e| OrchestratorError::PlanParseFailed(e.to_string()))?;

    if raw_plan.steps.is_empty() {
        return Err(OrchestratorError::PlanParseFailed(
            "plan contains no steps".to_string(),
        ));
    }

    let mut plan = RoutingPlan::new(original_request);
    for raw_step in raw_plan.steps {
        plan.steps.push(RoutingStep {
            step_id: raw_step.step_id,
            component_name: raw_step.component_name,
            instruction: raw_step.instruction,
            depends_on: raw_step.depends_on,
            metadata: StepMetadata {
                capability: raw_step.metadata.capability,
                parameters: raw_step.metadata.parameters,
            },
        });
    }

    Ok(plan)
}

/// Appended to the prompt when a parse attempt fails.
fn parse_error_section(error: &OrchestratorError) -> String {
    format!(
        "\n\nParse Error: {error}\n\
         Your previous response could not be parsed as JSON. Reply again with ONLY a JSON object.\n\
         - NO arithmetic or expressions in values (write 200, not 100 * 2)\n\
         - NO markdown emphasis or prose\n\
         - NO code fences\n\
         - NO trailing commas"
    )
}

/// Plan generator: model call plus the bounded parse-retry loop.
pub struct PlanParser {
    provider: Arc<dyn LLMProvider>,
    retry_enabled: bool,
    max_retries: u32,
}

impl PlanParser {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            retry_enabled: true,
            max_retries: 2,
        }
    }

    pub fn with_retry(mut self, enabled: bool, max_retries: u32) -> Self {
        self.retry_enabled = enabled;
        self.max_retries = max_retries;
        self
    }

    /// Generate a plan for `original_request` from the given planning prompt.
    pub async fn generate(
        &self,
        ctx: &ExecutionContext,
        prompt: &str,
        original_request: &str,
    ) -> OrchestratorResult<RoutingPlan> {
        let max_attempts = if self.retry_enabled {
            self.max_retries + 1
        } else {
            1
        };
        let mut prompt = prompt.to_string();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if ctx.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let completion = self
                .provider
                .generate(
                    CompletionRequest::new(prompt.clone())
                        .system(
                            "You are a routing planner. Respond with a single JSON object \
                             describing the execution plan. No markdown, no commentary.",
                        )
                        .temperature(0.1),
                )
                .await?;

            match parse_plan(&completion.content, original_request) {
                Ok(plan) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "plan parse succeeded after retry");
                    }
                    return Ok(plan);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "plan parse failed");
                    prompt.push_str(&parse_error_section(&e));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OrchestratorError::PlanParseFailed("no parse attempt was made".to_string())
        }))
    }
}
