//! Orchestrator — composition root for the execution engine.
//!
//! Wires the catalog, planner, scheduler, and synthesis stage into the full
//! request path: select capabilities → generate plan → validate → execute →
//! synthesize.  Capability selection and synthesis are pluggable contracts;
//! the defaults here are deliberately plain (full catalog, concatenation)
//! because the interesting implementations live with the caller.

use crate::cache::PlanCache;
use crate::catalog::ComponentCatalog;
use crate::executor::StepExecutor;
use crate::history::ExecutionHistory;
use crate::metrics::ExecutionMetrics;
use crate::plan::{PlanParser, generate_validated};
use crate::scheduler::{InterruptGate, PlanScheduler};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use tutti_kernel::checkpoint::InterruptPoint;
use tutti_kernel::component::Component;
use tutti_kernel::config::OrchestratorConfig;
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::LLMProvider;
use tutti_kernel::plan::{ExecutionResult, RoutingPlan, StepResult};

/// Capability-selection tier contract.  The default hands the planner the
/// whole catalog; smarter tiers narrow it per request.
#[async_trait]
pub trait CapabilitySelector: Send + Sync {
    async fn select(
        &self,
        catalog: &ComponentCatalog,
        request: &str,
    ) -> OrchestratorResult<Vec<Component>>;
}

pub struct FullCatalogSelector;

#[async_trait]
impl CapabilitySelector for FullCatalogSelector {
    async fn select(
        &self,
        catalog: &ComponentCatalog,
        _request: &str,
    ) -> OrchestratorResult<Vec<Component>> {
        let snapshot = catalog.snapshot().await;
        let mut components: Vec<Component> = snapshot.values().cloned().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(components)
    }
}

/// Synthesis stage contract: compose the final answer from step results.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        request: &str,
        result: &ExecutionResult,
    ) -> OrchestratorResult<String>;
}

/// Default synthesis: successful step responses joined in plan order.
pub struct ConcatSynthesizer;

#[async_trait]
impl Synthesizer for ConcatSynthesizer {
    async fn synthesize(
        &self,
        _request: &str,
        result: &ExecutionResult,
    ) -> OrchestratorResult<String> {
        let parts: Vec<String> = result
            .steps
            .iter()
            .filter(|s| s.success)
            .filter_map(|s| s.response.clone())
            .collect();
        Ok(parts.join("\n"))
    }
}

/// What the orchestrator hands back for one request.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResponse {
    pub request_id: String,
    pub plan: RoutingPlan,
    pub result: ExecutionResult,
    /// Absent when execution suspended at a checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

pub struct Orchestrator {
    catalog: Arc<ComponentCatalog>,
    parser: PlanParser,
    scheduler: PlanScheduler,
    selector: Arc<dyn CapabilitySelector>,
    synthesizer: Arc<dyn Synthesizer>,
    gate: Option<Arc<dyn InterruptGate>>,
    cache: PlanCache,
    history: Arc<ExecutionHistory>,
    metrics: Arc<ExecutionMetrics>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<ComponentCatalog>,
        provider: Arc<dyn LLMProvider>,
        config: OrchestratorConfig,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(ExecutionMetrics::new());
        let executor = Arc::new(StepExecutor::new(
            catalog.clone(),
            provider.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let scheduler = PlanScheduler::new(executor, config.clone(), metrics.clone());
        let parser = PlanParser::new(provider).with_retry(
            config.plan_parse_retry_enabled,
            config.plan_parse_max_retries,
        );
        Ok(Self {
            catalog,
            parser,
            scheduler,
            selector: Arc::new(FullCatalogSelector),
            synthesizer: Arc::new(ConcatSynthesizer),
            gate: None,
            cache: PlanCache::new(config.cache_enabled, config.cache_ttl),
            history: Arc::new(ExecutionHistory::new(config.history_size)),
            metrics,
            config,
        })
    }

    pub fn with_selector(mut self, selector: Arc<dyn CapabilitySelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn InterruptGate>) -> Self {
        self.scheduler.set_gate(gate.clone());
        self.gate = Some(gate);
        self
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    /// Full request path.  Always returns a response unless plan generation
    /// itself fails or the caller context was cancelled.
    pub async fn process(
        &self,
        ctx: &ExecutionContext,
        request: &str,
    ) -> OrchestratorResult<OrchestratorResponse> {
        if ctx.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let plan = match self.cache.get(request) {
            Some(plan) => plan,
            None => {
                let components = self.selector.select(&self.catalog, request).await?;
                if components.is_empty() {
                    return Err(OrchestratorError::PlanInvalid(
                        "no components available for planning".to_string(),
                    ));
                }
                let prompt = build_planning_prompt(&components, request);
                let plan =
                    generate_validated(&self.parser, ctx, &prompt, request, &self.catalog).await?;
                self.cache.put(request, plan.clone());
                plan
            }
        };

        info!(
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            request_id = %ctx.request_id,
            "plan ready"
        );

        // plan_generated suspension point.
        if let Some(gate) = &self.gate {
            match gate
                .check(ctx, InterruptPoint::PlanGenerated, &plan, &[], None)
                .await
            {
                Ok(()) => {}
                Err(OrchestratorError::Interrupted(checkpoint_id)) => {
                    info!(checkpoint_id = %checkpoint_id, "suspended after plan generation");
                    self.metrics.interrupts_raised.inc();
                    let result =
                        ExecutionResult::from_steps(&plan.plan_id, Vec::new()).interrupted();
                    return Ok(OrchestratorResponse {
                        request_id: ctx.request_id.clone(),
                        plan,
                        result,
                        answer: None,
                    });
                }
                Err(e) => {
                    debug!(error = %e, "plan_generated gate check failed, continuing");
                }
            }
        }

        let result = self.scheduler.execute(ctx, &plan).await?;
        self.finish(ctx, request, plan, result).await
    }

    /// Continue a suspended plan from its completed results (HITL resume).
    pub async fn resume_plan(
        &self,
        ctx: &ExecutionContext,
        plan: RoutingPlan,
        completed: Vec<StepResult>,
    ) -> OrchestratorResult<OrchestratorResponse> {
        let result = self.scheduler.execute_from(ctx, &plan, completed).await?;
        let request = plan.original_request.clone();
        self.finish(ctx, &request, plan, result).await
    }

    async fn finish(
        &self,
        ctx: &ExecutionContext,
        request: &str,
        plan: RoutingPlan,
        result: ExecutionResult,
    ) -> OrchestratorResult<OrchestratorResponse> {
        let answer = if result.interrupted {
            None
        } else {
            Some(self.synthesizer.synthesize(request, &result).await?)
        };

        self.history
            .record(ctx.request_id.clone(), request, result.clone());

        Ok(OrchestratorResponse {
            request_id: ctx.request_id.clone(),
            plan,
            result,
            answer,
        })
    }
}

/// Planning prompt: the component inventory plus the output contract.
fn build_planning_prompt(components: &[Component], request: &str) -> String {
    let mut inventory = String::new();
    for component in components {
        inventory.push_str(&format!("Component: {}\n", component.name));
        for capability in &component.capabilities {
            inventory.push_str(&format!(
                "  Capability: {} — {}\n",
                capability.name, capability.description
            ));
            for param in &capability.parameters {
                inventory.push_str(&format!(
                    "    Parameter: {} ({:?}{}) {}\n",
                    param.name,
                    param.param_type,
                    if param.required { ", required" } else { "" },
                    param.description,
                ));
            }
        }
    }

    format!(
        "Available components:\n{inventory}\n\
         User request: {request}\n\n\
         Produce an execution plan as a JSON object:\n\
         {{\"steps\": [{{\"step_id\": \"s1\", \"component_name\": \"...\", \
         \"instruction\": \"...\", \"depends_on\": [], \
         \"metadata\": {{\"capability\": \"...\", \"parameters\": {{}}}}}}]}}\n\n\
         Rules:\n\
         - step_id values must be unique; depends_on may only reference step_ids in this plan.\n\
         - Use {{{{step-id.response.path}}}} to reference output of earlier steps.\n\
         - Only use components and capabilities from the inventory.\n\
         - Respond with ONLY the JSON object."
    )
}
