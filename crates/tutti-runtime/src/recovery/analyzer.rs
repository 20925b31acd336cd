//! 错误分析器
//! Error analyzer
//!
//! Classifies a non-transport invocation failure: retryable with changed
//! parameters, retryable as-is, or fatal.  Statuses with an unambiguous
//! meaning are decided locally; the ambiguous middle band is put to the
//! model.  A `None` decision delegates to the outer transport retry with
//! backoff.

use crate::plan::extract::extract_json_object;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::{CompletionRequest, LLMProvider};

/// Statuses that are never worth retrying: auth and method problems do not
/// change between attempts.
const FATAL_STATUSES: [u16; 3] = [401, 403, 405];

/// Statuses the transport-level retry/backoff owns.
const TRANSPORT_STATUSES: [u16; 5] = [408, 429, 500, 502, 504];

/// Statuses where the body may reveal a fixable semantic problem.
const CONSULT_STATUSES: [u16; 5] = [400, 404, 409, 422, 503];

/// The analyzer's verdict for one failure.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    #[serde(default)]
    pub reason: String,
    /// Parameter overrides to merge before the next attempt.
    #[serde(default)]
    pub suggested_changes: Option<Map<String, Value>>,
}

impl RetryDecision {
    fn fatal(reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            reason: reason.into(),
            suggested_changes: None,
        }
    }
}

/// Everything the analyzer gets to look at for one failed invocation.
#[derive(Debug)]
pub struct InvocationFailure<'a> {
    pub status: u16,
    pub body: &'a str,
    pub parameters: &'a BTreeMap<String, Value>,
    pub user_query: &'a str,
    pub capability_name: &'a str,
    pub capability_description: &'a str,
}

pub struct ErrorAnalyzer {
    provider: Arc<dyn LLMProvider>,
}

impl ErrorAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Classify a failure.
    ///
    /// - `Ok(None)` — delegate to the outer transport retry (backoff,
    ///   circuit breaker).
    /// - `Ok(Some(decision))` — explicit verdict, possibly with corrected
    ///   parameters.
    /// - `Err(Cancelled)` — the request scope ended before the model call.
    pub async fn analyze(
        &self,
        ctx: &ExecutionContext,
        failure: &InvocationFailure<'_>,
    ) -> OrchestratorResult<Option<RetryDecision>> {
        if FATAL_STATUSES.contains(&failure.status) {
            return Ok(Some(RetryDecision::fatal(format!(
                "status {} is not retryable",
                failure.status
            ))));
        }

        if TRANSPORT_STATUSES.contains(&failure.status) {
            debug!(status = failure.status, "delegating failure to transport retry");
            return Ok(None);
        }

        if !CONSULT_STATUSES.contains(&failure.status) {
            return Ok(Some(RetryDecision::fatal(format!(
                "status {} has no recovery path",
                failure.status
            ))));
        }

        // Cancellation short-circuits before spending a model call.
        if ctx.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        Ok(Some(self.consult_model(failure).await))
    }

    async fn consult_model(&self, failure: &InvocationFailure<'_>) -> RetryDecision {
        let prompt = format!(
            "A capability invocation failed.\n\n\
             Capability: {} — {}\n\
             HTTP status: {}\n\
             Response body:\n{}\n\n\
             Parameters sent:\n{}\n\n\
             Original user query: {}\n\n\
             Decide whether a retry can succeed. If the parameters are wrong and you can see \
             the correct values, include them. Respond with ONLY this JSON object:\n\
             {{\"should_retry\": true|false, \"reason\": \"...\", \"suggested_changes\": {{...}} or null}}",
            failure.capability_name,
            failure.capability_description,
            failure.status,
            failure.body,
            serde_json::to_string_pretty(failure.parameters).unwrap_or_default(),
            failure.user_query,
        );

        let completion = match self
            .provider
            .generate(
                CompletionRequest::new(prompt)
                    .system("You analyze tool invocation failures. Respond with bare JSON only.")
                    .temperature(0.0),
            )
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "error analyzer model call failed, defaulting to no-retry");
                return RetryDecision::fatal(format!("analyzer unavailable: {e}"));
            }
        };

        match extract_json_object(&completion.content)
            .and_then(|json| {
                serde_json::from_str::<RetryDecision>(&json)
                    .map_err(|e| OrchestratorError::Serialization(e.to_string()))
            }) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "analyzer reply unparseable, defaulting to no-retry");
                RetryDecision::fatal("analyzer reply was not valid JSON")
            }
        }
    }
}
