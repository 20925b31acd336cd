//! DAG 调度器
//! DAG scheduler
//!
//! Levelized parallel execution: each step is assigned the smallest level
//! such that all of its dependencies sit at strictly smaller levels, then
//! levels run in order with all members launched concurrently under a
//! counting semaphore.  A step failure never cancels siblings; downstream
//! steps whose dependencies failed are still attempted and may succeed on
//! independent data.  Panics inside a step are recovered into failed
//! results, and result delivery has a short send-timeout so a wedged
//! collector cannot block the level.

use crate::executor::StepExecutor;
use crate::metrics::ExecutionMetrics;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tutti_kernel::checkpoint::InterruptPoint;
use tutti_kernel::config::OrchestratorConfig;
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::plan::{ExecutionResult, RoutingPlan, RoutingStep, StepResult};

/// Result delivery must not wedge the level if the collector stalls.
const RESULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Suspension hook consulted at `before_step` / `after_step`.
///
/// An implementation that decides to suspend persists its checkpoint and
/// returns [`OrchestratorError::Interrupted`]; the scheduler then returns
/// the partial result without cancelling in-flight siblings.
#[async_trait]
pub trait InterruptGate: Send + Sync {
    async fn check(
        &self,
        ctx: &ExecutionContext,
        point: InterruptPoint,
        plan: &RoutingPlan,
        completed: &[StepResult],
        current_step: Option<&RoutingStep>,
    ) -> OrchestratorResult<()>;
}

pub struct PlanScheduler {
    executor: Arc<StepExecutor>,
    config: Arc<OrchestratorConfig>,
    metrics: Arc<ExecutionMetrics>,
    semaphore: Arc<Semaphore>,
    gate: Option<Arc<dyn InterruptGate>>,
}

impl PlanScheduler {
    pub fn new(
        executor: Arc<StepExecutor>,
        config: Arc<OrchestratorConfig>,
        metrics: Arc<ExecutionMetrics>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            executor,
            config,
            metrics,
            semaphore,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn InterruptGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_gate(&mut self, gate: Arc<dyn InterruptGate>) {
        self.gate = Some(gate);
    }

    /// Execute a validated plan from scratch.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &RoutingPlan,
    ) -> OrchestratorResult<ExecutionResult> {
        self.execute_from(ctx, plan, Vec::new()).await
    }

    /// Execute a plan, seeding results completed in an earlier run (resume).
    pub async fn execute_from(
        &self,
        ctx: &ExecutionContext,
        plan: &RoutingPlan,
        completed: Vec<StepResult>,
    ) -> OrchestratorResult<ExecutionResult> {
        let levels = levelize(plan)?;
        debug!(
            plan_id = %plan.plan_id,
            levels = levels.len(),
            steps = plan.steps.len(),
            "plan stratified"
        );

        let started = std::time::Instant::now();
        let child = ctx.child();
        let mut results: HashMap<String, StepResult> = completed
            .into_iter()
            .map(|r| (r.step_id.clone(), r))
            .collect();

        let run = self.run_levels(&child, plan, &levels, &mut results);
        let interrupted = tokio::select! {
            interrupted = run => interrupted,
            _ = tokio::time::sleep(self.config.total_timeout) => {
                warn!(plan_id = %plan.plan_id, "total execution timeout, cancelling outstanding steps");
                child.cancel();
                false
            }
        };

        self.metrics.plan_duration_ms.observe_duration(started.elapsed());

        // Aggregate in plan order regardless of completion order.
        let ordered: Vec<StepResult> = plan
            .steps
            .iter()
            .filter_map(|step| results.remove(&step.step_id))
            .collect();

        let mut result = ExecutionResult::from_steps(&plan.plan_id, ordered);
        if interrupted {
            result = result.interrupted();
        }
        let missing = plan.steps.len() - result.steps.len();
        if missing > 0 {
            result.success = false;
            if !result.interrupted {
                result.errors.push(format!("{missing} step(s) did not run"));
            }
        }
        info!(
            plan_id = %plan.plan_id,
            success = result.success,
            interrupted = result.interrupted,
            steps = result.steps.len(),
            "plan execution finished"
        );
        Ok(result)
    }

    /// Run levels in order; returns `true` when a gate suspended the plan.
    async fn run_levels(
        &self,
        ctx: &ExecutionContext,
        plan: &RoutingPlan,
        levels: &[Vec<usize>],
        results: &mut HashMap<String, StepResult>,
    ) -> bool {
        for (level_index, level) in levels.iter().enumerate() {
            if ctx.is_cancelled() {
                return false;
            }

            let mut tasks = JoinSet::new();
            let (tx, mut rx) = mpsc::channel::<(String, StepResult)>(level.len().max(1));
            let mut launched = 0usize;
            let mut interrupted = false;

            for &step_index in level {
                let step = &plan.steps[step_index];
                if results.contains_key(&step.step_id) {
                    debug!(step_id = %step.step_id, "skipping already completed step");
                    continue;
                }

                // before_step suspension point
                let completed_so_far = ordered_results(plan, results);
                if let Some(gate) = &self.gate {
                    match gate
                        .check(ctx, InterruptPoint::BeforeStep, plan, &completed_so_far, Some(step))
                        .await
                    {
                        Ok(()) => {}
                        Err(OrchestratorError::Interrupted(checkpoint_id)) => {
                            info!(
                                step_id = %step.step_id,
                                checkpoint_id = %checkpoint_id,
                                "execution suspended before step"
                            );
                            self.metrics.interrupts_raised.inc();
                            interrupted = true;
                            break;
                        }
                        Err(e) => {
                            // Gate trouble must not take the plan down.
                            warn!(error = %e, "interrupt gate check failed, continuing");
                        }
                    }
                }

                let dependency_results: Vec<StepResult> = step
                    .depends_on
                    .iter()
                    .filter_map(|dep| results.get(dep).cloned())
                    .collect();

                let executor = self.executor.clone();
                let semaphore = self.semaphore.clone();
                let step = step.clone();
                let step_ctx = ctx.child();
                let user_query = plan.original_request.clone();
                let tx = tx.clone();

                launched += 1;
                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };

                    let step_id = step.step_id.clone();
                    let component = step.component_name.clone();
                    let capability = step.metadata.capability.clone();

                    // Recovered scope: a panicking step becomes a failed
                    // result instead of crashing the scheduler.
                    let outcome = AssertUnwindSafe(executor.execute_step(
                        &step_ctx,
                        &step,
                        &dependency_results,
                        &user_query,
                    ))
                    .catch_unwind()
                    .await;

                    let result = match outcome {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            warn!(step_id = %step_id, %message, "step panicked");
                            StepResult::failure(
                                &step_id,
                                &component,
                                format!(
                                    "panic in capability call '{capability}' on '{component}': {message}"
                                ),
                                0,
                                Duration::ZERO,
                            )
                        }
                    };

                    if tx
                        .send_timeout((step_id.clone(), result), RESULT_SEND_TIMEOUT)
                        .await
                        .is_err()
                    {
                        warn!(step_id = %step_id, "result delivery timed out, dropping");
                    }
                });
            }
            drop(tx);

            // Collect this level; sibling ordering is unspecified.
            let mut collected = 0usize;
            while collected < launched {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    received = rx.recv() => match received {
                        Some((step_id, result)) => {
                            collected += 1;
                            results.insert(step_id, result);
                        }
                        None => break,
                    }
                }
            }
            tasks.abort_all();

            // after_step suspension point, once per completed level member.
            if !interrupted {
                if let Some(gate) = &self.gate {
                    for &step_index in level {
                        let step = &plan.steps[step_index];
                        if !results.contains_key(&step.step_id) {
                            continue;
                        }
                        let completed_so_far = ordered_results(plan, results);
                        match gate
                            .check(ctx, InterruptPoint::AfterStep, plan, &completed_so_far, Some(step))
                            .await
                        {
                            Ok(()) => {}
                            Err(OrchestratorError::Interrupted(checkpoint_id)) => {
                                info!(
                                    step_id = %step.step_id,
                                    checkpoint_id = %checkpoint_id,
                                    "execution suspended after step"
                                );
                                self.metrics.interrupts_raised.inc();
                                interrupted = true;
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "interrupt gate check failed, continuing");
                            }
                        }
                    }
                }
            }

            if interrupted {
                return true;
            }
            debug!(level = level_index, collected, "level complete");
        }
        false
    }
}

/// Results so far, in plan order.
fn ordered_results(plan: &RoutingPlan, results: &HashMap<String, StepResult>) -> Vec<StepResult> {
    plan.steps
        .iter()
        .filter_map(|step| results.get(&step.step_id).cloned())
        .collect()
}

/// Assign each step the smallest level with all dependencies strictly
/// smaller.  Level 0 = steps with no dependencies.
pub fn levelize(plan: &RoutingPlan) -> OrchestratorResult<Vec<Vec<usize>>> {
    let index_of: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id.as_str(), i))
        .collect();

    let mut level_of: Vec<Option<usize>> = vec![None; plan.steps.len()];
    let mut remaining = plan.steps.len();

    while remaining > 0 {
        let mut progressed = false;
        for (index, step) in plan.steps.iter().enumerate() {
            if level_of[index].is_some() {
                continue;
            }
            let mut level = 0usize;
            let mut ready = true;
            for dep in &step.depends_on {
                let dep_index = *index_of.get(dep.as_str()).ok_or_else(|| {
                    OrchestratorError::PlanInvalid(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    ))
                })?;
                match level_of[dep_index] {
                    Some(dep_level) => level = level.max(dep_level + 1),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                level_of[index] = Some(level);
                remaining -= 1;
                progressed = true;
            }
        }
        if !progressed {
            return Err(OrchestratorError::PlanInvalid(
                "step graph contains a cycle".to_string(),
            ));
        }
    }

    let max_level = level_of.iter().flatten().copied().max().unwrap_or(0);
    let mut levels: Vec<Vec<usize>> = vec![Vec::new(); max_level + 1];
    for (index, level) in level_of.into_iter().enumerate() {
        levels[level.expect("assigned above")].push(index);
    }
    Ok(levels)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
