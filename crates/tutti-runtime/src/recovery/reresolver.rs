//! 上下文重解析
//! Contextual re-resolution
//!
//! Last recovery rung for independent-step semantic retry: when the analyzer
//! says a failure cannot be fixed but the step *does* have upstream
//! dependency data, a model call may still derive the needed value from that
//! data (a currency from a country field, a coordinate from a city name).

use crate::plan::extract::extract_json_object;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::{CompletionRequest, LLMProvider};

pub struct ContextualReresolver {
    provider: Arc<dyn LLMProvider>,
}

impl ContextualReresolver {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Try to derive corrected parameter values from dependency data.
    ///
    /// Returns `Ok(None)` when the model finds nothing derivable — the
    /// caller then lets the failure stand.
    pub async fn derive(
        &self,
        ctx: &ExecutionContext,
        dependency_source: &Map<String, Value>,
        failed_parameters: &BTreeMap<String, Value>,
        error_body: &str,
    ) -> OrchestratorResult<Option<BTreeMap<String, Value>>> {
        if ctx.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if dependency_source.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            "A tool call failed with this error:\n{}\n\n\
             Parameters that were sent:\n{}\n\n\
             Data available from earlier steps:\n{}\n\n\
             Derive corrected parameter values from the available data (for example, a \
             currency code from a country field). Respond with ONLY a JSON object of the \
             corrected parameters, or {{}} if nothing can be derived.",
            error_body,
            serde_json::to_string_pretty(failed_parameters).unwrap_or_default(),
            serde_json::to_string_pretty(dependency_source).unwrap_or_default(),
        );

        let completion = match self
            .provider
            .generate(
                CompletionRequest::new(prompt)
                    .system(
                        "You derive missing values from structured data. \
                         Respond with bare JSON only.",
                    )
                    .temperature(0.0),
            )
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "contextual re-resolution model call failed");
                return Ok(None);
            }
        };

        let json = match extract_json_object(&completion.content) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "re-resolution reply had no JSON object");
                return Ok(None);
            }
        };

        match serde_json::from_str::<BTreeMap<String, Value>>(&json) {
            Ok(derived) if derived.is_empty() => Ok(None),
            Ok(derived) => Ok(Some(derived)),
            Err(e) => {
                debug!(error = %e, "re-resolution reply was not an object");
                Ok(None)
            }
        }
    }
}
