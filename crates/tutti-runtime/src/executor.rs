//! 步骤执行器
//! Step executor
//!
//! Runs a single plan step end-to-end: resolve parameters, invoke the
//! component, classify failures, apply corrections, retry within bounded
//! budgets.  Transport retries, validation-feedback retries, and semantic
//! retries each draw from their own budget so a pathology in one layer
//! cannot starve the others.
//!
//! State machine per attempt:
//! `Pending → Invoking → (Success | Classifying)`, then
//! `Classifying → (Fatal | TransportRetry | ValidationFeedback | SemanticRetry)`.

use crate::binding::hybrid::{HybridResolver, merge_dependency_outputs};
use crate::binding::{coerce_map, interpolate};
use crate::catalog::ComponentCatalog;
use crate::metrics::ExecutionMetrics;
use crate::recovery::{ContextualReresolver, ErrorAnalyzer, InvocationFailure, is_type_error};
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info_span, warn};
use tutti_kernel::component::{Capability, Component, ParameterType};
use tutti_kernel::config::OrchestratorConfig;
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::OrchestratorResult;
use tutti_kernel::llm::LLMProvider;
use tutti_kernel::plan::{RoutingStep, StepResult};

/// Base delay for the linear transport backoff; multiplied by the attempt
/// number, plus jitter.
const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_JITTER_MS: u64 = 50;

/// External correction hook for the validation-feedback layer.
///
/// Given the capability schema and the failing body, produce replacement
/// parameters.  Implementations typically put the schema to an LLM.
#[async_trait]
pub trait CorrectionCallback: Send + Sync {
    async fn correct(
        &self,
        capability: &Capability,
        parameters: &BTreeMap<String, Value>,
        error_body: &str,
    ) -> OrchestratorResult<BTreeMap<String, Value>>;
}

/// What one invocation attempt produced.
enum InvokeOutcome {
    Success { body: String },
    HttpFailure { status: u16, body: String },
    TransportFailure { error: String },
    Cancelled,
}

pub struct StepExecutor {
    catalog: Arc<ComponentCatalog>,
    resolver: HybridResolver,
    analyzer: ErrorAnalyzer,
    reresolver: ContextualReresolver,
    correction: Option<Arc<dyn CorrectionCallback>>,
    http: reqwest::Client,
    config: Arc<OrchestratorConfig>,
    metrics: Arc<ExecutionMetrics>,
}

impl StepExecutor {
    pub fn new(
        catalog: Arc<ComponentCatalog>,
        provider: Arc<dyn LLMProvider>,
        config: Arc<OrchestratorConfig>,
        metrics: Arc<ExecutionMetrics>,
    ) -> Self {
        Self {
            catalog,
            resolver: HybridResolver::new(provider.clone()),
            analyzer: ErrorAnalyzer::new(provider.clone()),
            reresolver: ContextualReresolver::new(provider),
            correction: None,
            http: reqwest::Client::new(),
            config,
            metrics,
        }
    }

    pub fn with_correction(mut self, correction: Arc<dyn CorrectionCallback>) -> Self {
        self.correction = Some(correction);
        self
    }

    /// Execute one step against its resolved component.
    ///
    /// Never returns an error: every failure mode lands in the
    /// [`StepResult`] so siblings and downstream steps keep running.
    pub async fn execute_step(
        &self,
        ctx: &ExecutionContext,
        step: &RoutingStep,
        dependency_results: &[StepResult],
        user_query: &str,
    ) -> StepResult {
        let span = info_span!(
            "step.execute",
            step_id = %step.step_id,
            component = %step.component_name,
        );
        self.execute_step_inner(ctx, step, dependency_results, user_query)
            .instrument(span)
            .await
    }

    async fn execute_step_inner(
        &self,
        ctx: &ExecutionContext,
        step: &RoutingStep,
        dependency_results: &[StepResult],
        user_query: &str,
    ) -> StepResult {
        let started = Instant::now();

        // 1. Locate the component and its capability schema.
        let Some(component) = self.catalog.find_component(&step.component_name).await else {
            self.metrics.steps_failed.inc();
            return StepResult::failure(
                &step.step_id,
                &step.component_name,
                "agent_not_found",
                0,
                started.elapsed(),
            );
        };
        let Some(capability) = component.capability(&step.metadata.capability).cloned() else {
            self.metrics.steps_failed.inc();
            return StepResult::failure(
                &step.step_id,
                &step.component_name,
                format!("capability_not_found: {}", step.metadata.capability),
                0,
                started.elapsed(),
            );
        };

        // 2-4. Assemble and coerce parameters.
        let mut parameters = match self
            .assemble_parameters(step, dependency_results, &capability)
            .await
        {
            Ok(parameters) => parameters,
            Err(e) => {
                self.metrics.steps_failed.inc();
                return StepResult::failure(
                    &step.step_id,
                    &step.component_name,
                    e.to_string(),
                    0,
                    started.elapsed(),
                );
            }
        };

        // 5-7. Invocation with the retry state machine.
        let mut attempts: u32 = 0;
        let mut transport_attempts: u32 = 0;
        let mut validation_retries: u32 = 0;
        let mut semantic_retries: u32 = 0;
        let mut last_status: Option<u16> = None;
        let mut last_error = String::new();

        loop {
            if ctx.is_cancelled() {
                self.metrics.steps_failed.inc();
                return StepResult::failure(
                    &step.step_id,
                    &step.component_name,
                    "cancelled",
                    attempts,
                    started.elapsed(),
                );
            }

            attempts += 1;
            tracing::debug!(attempt = attempts, "transition: Invoking");

            match self.invoke(ctx, &component, &capability, step, &parameters).await {
                InvokeOutcome::Success { body } => {
                    self.metrics.steps_succeeded.inc();
                    self.metrics.step_duration_ms.observe_duration(started.elapsed());
                    tracing::debug!(attempt = attempts, "transition: Success");
                    return StepResult::success(
                        &step.step_id,
                        &step.component_name,
                        body,
                        attempts,
                        started.elapsed(),
                    );
                }
                InvokeOutcome::Cancelled => {
                    self.metrics.steps_failed.inc();
                    return StepResult::failure(
                        &step.step_id,
                        &step.component_name,
                        "cancelled",
                        attempts,
                        started.elapsed(),
                    );
                }
                InvokeOutcome::TransportFailure { error } => {
                    tracing::debug!(attempt = attempts, "transition: Classifying (transport)");
                    last_status = None;
                    last_error = error;
                    if transport_attempts < self.config.retry_attempts {
                        transport_attempts += 1;
                        self.metrics.transport_retries.inc();
                        tracing::debug!(attempt = attempts, "transition: TransportRetry");
                        self.backoff(transport_attempts).await;
                        continue;
                    }
                }
                InvokeOutcome::HttpFailure { status, body } => {
                    tracing::debug!(
                        attempt = attempts,
                        status,
                        "transition: Classifying"
                    );
                    last_status = Some(status);
                    last_error = format!("HTTP {status}: {body}");

                    // ValidationFeedback: type errors are the cheapest fix
                    // and never consume the main budget.
                    if self.config.validation_feedback_enabled
                        && is_type_error(&body)
                        && validation_retries < self.config.max_validation_retries
                    {
                        if let Some(correction) = &self.correction {
                            match correction.correct(&capability, &parameters, &body).await {
                                Ok(corrected) => {
                                    validation_retries += 1;
                                    self.metrics.validation_retries.inc();
                                    tracing::debug!(
                                        attempt = attempts,
                                        "transition: ValidationFeedback"
                                    );
                                    parameters = coerce_map(&corrected, &capability);
                                    continue;
                                }
                                Err(e) => {
                                    warn!(error = %e, "correction callback failed");
                                }
                            }
                        }
                    }

                    let failure = InvocationFailure {
                        status,
                        body: &body,
                        parameters: &parameters,
                        user_query,
                        capability_name: &capability.name,
                        capability_description: &capability.description,
                    };

                    match self.analyzer.analyze(ctx, &failure).await {
                        Err(_) => {
                            // Cancelled mid-analysis.
                            self.metrics.steps_failed.inc();
                            return StepResult::failure(
                                &step.step_id,
                                &step.component_name,
                                "cancelled",
                                attempts,
                                started.elapsed(),
                            );
                        }
                        Ok(None) => {
                            // Delegate to the transport budget with backoff.
                            if transport_attempts < self.config.retry_attempts {
                                transport_attempts += 1;
                                self.metrics.transport_retries.inc();
                                tracing::debug!(
                                    attempt = attempts,
                                    "transition: TransportRetry"
                                );
                                self.backoff(transport_attempts).await;
                                continue;
                            }
                        }
                        Ok(Some(decision)) if decision.should_retry => {
                            if let Some(changes) = decision.suggested_changes {
                                if self.config.semantic_retry.enabled
                                    && semantic_retries < self.config.semantic_retry.max_attempts
                                {
                                    semantic_retries += 1;
                                    self.metrics.semantic_retries.inc();
                                    tracing::debug!(
                                        attempt = attempts,
                                        reason = %decision.reason,
                                        "transition: SemanticRetry"
                                    );
                                    for (name, value) in changes {
                                        parameters.insert(name, value);
                                    }
                                    parameters = coerce_map(&parameters, &capability);
                                    continue;
                                }
                            } else if transport_attempts < self.config.retry_attempts {
                                // Retry-as-is rides the main budget.
                                transport_attempts += 1;
                                tracing::debug!(
                                    attempt = attempts,
                                    reason = %decision.reason,
                                    "transition: TransportRetry (as-is)"
                                );
                                self.backoff(transport_attempts).await;
                                continue;
                            }
                        }
                        Ok(Some(decision)) => {
                            // Analyzer says cannot fix — independent-step
                            // semantic retry may still derive the value from
                            // dependency data.
                            if let Some(derived) = self
                                .try_contextual_reresolution(
                                    ctx,
                                    status,
                                    &body,
                                    dependency_results,
                                    &parameters,
                                    semantic_retries,
                                )
                                .await
                            {
                                semantic_retries += 1;
                                self.metrics.semantic_retries.inc();
                                tracing::debug!(
                                    attempt = attempts,
                                    reason = %decision.reason,
                                    "transition: SemanticRetry (contextual)"
                                );
                                for (name, value) in derived {
                                    parameters.insert(name, value);
                                }
                                parameters = coerce_map(&parameters, &capability);
                                continue;
                            }
                        }
                    }
                }
            }

            // Fatal: no recovery layer accepted the failure.
            tracing::debug!(attempt = attempts, "transition: Fatal");
            self.metrics.fatal_failures.inc();
            self.metrics.steps_failed.inc();
            let mut result = StepResult::failure(
                &step.step_id,
                &step.component_name,
                last_error,
                attempts,
                started.elapsed(),
            );
            if let Some(status) = last_status {
                result = result.with_status_code(status);
            }
            return result;
        }
    }

    /// Parameter assembly: metadata → template interpolation → semantic
    /// fallback for missed paths → hybrid fill → schema coercion.
    async fn assemble_parameters(
        &self,
        step: &RoutingStep,
        dependency_results: &[StepResult],
        capability: &Capability,
    ) -> OrchestratorResult<BTreeMap<String, Value>> {
        let dependency_responses: BTreeMap<String, Value> = dependency_results
            .iter()
            .filter_map(|r| r.response_json().map(|json| (r.step_id.clone(), json)))
            .collect();

        let templated = interpolate(&step.metadata.parameters, &dependency_responses);
        let mut parameters = templated.parameters;

        // Template paths that evaluated to nothing: ask the resolver to
        // derive the value from the merged dependency data.
        if !templated.misses.is_empty() {
            let source = merge_dependency_outputs(dependency_results);
            for miss in &templated.misses {
                if source.is_empty() {
                    break;
                }
                let target = capability
                    .parameter(&miss.parameter)
                    .map(|p| p.param_type)
                    .unwrap_or(ParameterType::String);
                let hint = format!(
                    "The template path '{}' under step '{}' was missing. Step instruction: {}",
                    miss.path, miss.step_id, step.instruction
                );
                match self
                    .resolver
                    .resolve_semantic_value(&source, &miss.parameter, &hint, target)
                    .await
                {
                    Ok(value) => {
                        parameters.insert(miss.parameter.clone(), value);
                    }
                    Err(e) => {
                        debug!(parameter = %miss.parameter, error = %e, "semantic value fallback failed");
                    }
                }
            }
        }

        // Fill remaining gaps from dependency data; existing values win, so
        // the resolver only sees the parameters still missing.
        let missing: Vec<_> = capability
            .parameters
            .iter()
            .filter(|p| !parameters.contains_key(&p.name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let gaps = Capability {
                parameters: missing,
                ..capability.clone()
            };
            match self.resolver.resolve(dependency_results, &gaps).await {
                Ok(filled) => {
                    for (name, value) in filled {
                        parameters.entry(name).or_insert(value);
                    }
                }
                Err(e) => {
                    // Incomplete wiring is not fatal here: the component is
                    // the source of truth and its rejection feeds recovery.
                    debug!(error = %e, "dependency fill left gaps");
                }
            }
        }

        Ok(coerce_map(&parameters, capability))
    }

    async fn try_contextual_reresolution(
        &self,
        ctx: &ExecutionContext,
        status: u16,
        body: &str,
        dependency_results: &[StepResult],
        parameters: &BTreeMap<String, Value>,
        semantic_retries: u32,
    ) -> Option<BTreeMap<String, Value>> {
        if !self.config.semantic_retry.enabled
            || semantic_retries >= self.config.semantic_retry.max_attempts
            || !self.config.semantic_retry.trigger_status_codes.contains(&status)
        {
            return None;
        }
        let source = merge_dependency_outputs(dependency_results);
        if source.is_empty() {
            return None;
        }
        self.reresolver
            .derive(ctx, &source, parameters, body)
            .await
            .ok()
            .flatten()
    }

    /// Transport invocation: POST the parameter object, read the body
    /// regardless of status — it is needed for error classification.
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        component: &Component,
        capability: &Capability,
        step: &RoutingStep,
        parameters: &BTreeMap<String, Value>,
    ) -> InvokeOutcome {
        let url = component.invocation_url(capability);

        let mut request = self
            .http
            .post(&url)
            .timeout(self.config.step_timeout)
            .header("Content-Type", "application/json")
            .header("X-Step-ID", &step.step_id)
            .json(parameters);
        if let Some(workflow_id) = &ctx.workflow_id {
            request = request.header("X-Workflow-ID", workflow_id);
        }

        let response = tokio::select! {
            _ = ctx.cancelled() => return InvokeOutcome::Cancelled,
            response = request.send() => response,
        };

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if status == 200 {
                    InvokeOutcome::Success { body }
                } else {
                    InvokeOutcome::HttpFailure { status, body }
                }
            }
            Err(e) => InvokeOutcome::TransportFailure {
                error: format!("transport failure calling {url}: {e}"),
            },
        }
    }

    /// Linear backoff × attempt with jitter.
    async fn backoff(&self, attempt: u32) {
        let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
        let delay = BACKOFF_BASE * attempt + Duration::from_millis(jitter);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::{Json, Router, routing::post};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tutti_kernel::component::CapabilityParameter;
    use tutti_kernel::llm::{Completion, CompletionRequest};

    struct NullProvider;

    #[async_trait]
    impl LLMProvider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }

        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> OrchestratorResult<Completion> {
            Ok(Completion {
                content: "{}".into(),
                model: "null".into(),
                provider: "null".into(),
                usage: None,
            })
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn catalog_for(addr: SocketAddr) -> Arc<ComponentCatalog> {
        let catalog = ComponentCatalog::new();
        catalog
            .register(
                Component::new("c1", "weather-service", addr.ip().to_string(), addr.port())
                    .with_capability(
                        Capability::new("get_weather")
                            .with_parameter(
                                CapabilityParameter::new("lat", ParameterType::Number).required(),
                            )
                            .with_parameter(
                                CapabilityParameter::new("lon", ParameterType::Number).required(),
                            ),
                    ),
            )
            .await
            .unwrap();
        Arc::new(catalog)
    }

    fn executor(catalog: Arc<ComponentCatalog>) -> StepExecutor {
        StepExecutor::new(
            catalog,
            Arc::new(NullProvider),
            Arc::new(OrchestratorConfig::default()),
            Arc::new(ExecutionMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_unknown_component_reports_agent_not_found() {
        let executor = executor(Arc::new(ComponentCatalog::new()));
        let ctx = ExecutionContext::new("r");
        let step = RoutingStep::new("s1", "ghost-service").with_capability("x");

        let result = executor.execute_step(&ctx, &step, &[], "query").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("agent_not_found"));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_coercion_end_to_end() {
        // Server asserts the outbound body carries numbers, not strings.
        let router = Router::new().route(
            "/api/capabilities/get_weather",
            post(|Json(body): Json<Value>| async move {
                assert!(body["lat"].is_f64(), "lat must arrive numeric: {body}");
                assert!(body["lon"].is_f64(), "lon must arrive numeric: {body}");
                Json(json!({"temp": 21.5}))
            }),
        );
        let addr = serve(router).await;
        let executor = executor(catalog_for(addr).await);
        let ctx = ExecutionContext::new("r");

        let step = RoutingStep::new("s1", "weather-service")
            .with_capability("get_weather")
            .with_parameter("lat", json!("48.8566"))
            .with_parameter("lon", json!("2.3522"));

        let result = executor.execute_step(&ctx, &step, &[], "weather in Paris").await;
        assert!(result.success, "step failed: {:?}", result.error);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.response_json().unwrap()["temp"], json!(21.5));
    }

    #[tokio::test]
    async fn test_template_interpolation_from_dependencies() {
        let router = Router::new().route(
            "/api/capabilities/get_weather",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["lat"], json!(35.68));
                Json(json!({"ok": true}))
            }),
        );
        let addr = serve(router).await;
        let executor = executor(catalog_for(addr).await);
        let ctx = ExecutionContext::new("r");

        let step = RoutingStep::new("s2", "weather-service")
            .with_capability("get_weather")
            .with_parameter("lat", json!("{{s1.response.coords.lat}}"))
            .with_parameter("lon", json!("{{s1.response.coords.lon}}"))
            .depends_on("s1");

        let dep = StepResult::success(
            "s1",
            "geo-service",
            json!({"coords": {"lat": 35.68, "lon": 139.69}}).to_string(),
            1,
            Duration::from_millis(2),
        );

        let result = executor.execute_step(&ctx, &step, &[dep], "query").await;
        assert!(result.success, "step failed: {:?}", result.error);
    }

    struct FixedCorrection {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CorrectionCallback for FixedCorrection {
        async fn correct(
            &self,
            _capability: &Capability,
            _parameters: &BTreeMap<String, Value>,
            _error_body: &str,
        ) -> OrchestratorResult<BTreeMap<String, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok([
                ("lat".to_string(), json!(35.6897)),
                ("lon".to_string(), json!(139.69)),
            ]
            .into())
        }
    }

    #[tokio::test]
    async fn test_validation_feedback_recovery() {
        // First call: 400 with a type-error body. Second call: success.
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let router = Router::new().route(
            "/api/capabilities/get_weather",
            post(move |Json(_): Json<Value>| {
                let hits = hits_clone.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            axum::http::StatusCode::BAD_REQUEST,
                            "json: cannot unmarshal string into Go struct field .lat of type float64"
                                .to_string(),
                        )
                            .into_response()
                    } else {
                        Json(json!({"temp": 18.0})).into_response()
                    }
                }
            }),
        );
        let addr = serve(router).await;

        let correction = Arc::new(FixedCorrection {
            calls: AtomicUsize::new(0),
        });
        let executor =
            executor(catalog_for(addr).await).with_correction(correction.clone());
        let ctx = ExecutionContext::new("r");

        let step = RoutingStep::new("s1", "weather-service")
            .with_capability("get_weather")
            .with_parameter("lat", json!("35.6897"))
            .with_parameter("lon", json!("139.69"));

        let result = executor.execute_step(&ctx, &step, &[], "weather in Tokyo").await;
        assert!(result.success, "step failed: {:?}", result.error);
        assert_eq!(result.attempts, 2);
        assert_eq!(correction.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_status_fails_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let router = Router::new().route(
            "/api/capabilities/get_weather",
            post(move |Json(_): Json<Value>| {
                let hits = hits_clone.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::FORBIDDEN, "no access".to_string()).into_response()
                }
            }),
        );
        let addr = serve(router).await;
        let executor = executor(catalog_for(addr).await);
        let ctx = ExecutionContext::new("r");

        let step = RoutingStep::new("s1", "weather-service")
            .with_capability("get_weather")
            .with_parameter("lat", json!(1.0))
            .with_parameter("lon", json!(2.0));

        let result = executor.execute_step(&ctx, &step, &[], "query").await;
        assert!(!result.success);
        assert_eq!(result.status_code, Some(403));
        assert_eq!(result.attempts, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1, "403 must not be retried");
    }

    #[tokio::test]
    async fn test_transport_failure_exhausts_budget() {
        // Nothing listens on this port.
        let catalog = ComponentCatalog::new();
        catalog
            .register(
                Component::new("c1", "weather-service", "127.0.0.1", 1)
                    .with_capability(Capability::new("get_weather")),
            )
            .await
            .unwrap();
        let executor = executor(Arc::new(catalog));
        let ctx = ExecutionContext::new("r");

        let step = RoutingStep::new("s1", "weather-service").with_capability("get_weather");
        let result = executor.execute_step(&ctx, &step, &[], "query").await;
        assert!(!result.success);
        // retry_attempts=2 → 1 initial + 2 retries
        assert_eq!(result.attempts, 3);
        assert!(result.error.unwrap().contains("transport failure"));
    }
}
