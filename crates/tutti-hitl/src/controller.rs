//! 中断控制器
//! Interrupt controller
//!
//! Implements the scheduler's [`InterruptGate`]: at each configured
//! interrupt point it assembles a checkpoint, persists it with
//! `status=pending`, fires the notifier, and raises the typed `Interrupted`
//! signal.  A decision ledger keyed by `(original_request_id, point, step)`
//! keeps resumed executions from re-suspending at the point a human already
//! decided.

use crate::notify::CheckpointNotifier;
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use tracing::{info, warn};
use tutti_kernel::checkpoint::{
    CheckpointStore, ExecutionCheckpoint, InterruptPoint,
};
use tutti_kernel::config::HitlConfig;
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::plan::{RoutingPlan, RoutingStep, StepResult};
use tutti_runtime::scheduler::InterruptGate;

/// Which steps actually warrant a human decision.
///
/// The default interrupts every step at the configured points; deployments
/// typically narrow this to sensitive capabilities.
pub trait InterruptPolicy: Send + Sync {
    fn should_interrupt(
        &self,
        point: InterruptPoint,
        plan: &RoutingPlan,
        step: Option<&RoutingStep>,
    ) -> bool;
}

pub struct InterruptAll;

impl InterruptPolicy for InterruptAll {
    fn should_interrupt(
        &self,
        _point: InterruptPoint,
        _plan: &RoutingPlan,
        _step: Option<&RoutingStep>,
    ) -> bool {
        true
    }
}

pub struct InterruptController {
    store: Arc<dyn CheckpointStore>,
    config: HitlConfig,
    notifier: Option<Arc<dyn CheckpointNotifier>>,
    policy: Arc<dyn InterruptPolicy>,
    /// `(original_request_id, point, step)` markers already decided by a
    /// human; resumes must pass through without re-suspending.
    decided: DashSet<String>,
}

impl InterruptController {
    pub fn new(store: Arc<dyn CheckpointStore>, config: HitlConfig) -> Self {
        Self {
            store,
            config,
            notifier: None,
            policy: Arc::new(InterruptAll),
            decided: DashSet::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CheckpointNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn InterruptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn marker(
        original_request_id: &str,
        point: InterruptPoint,
        step: Option<&RoutingStep>,
    ) -> String {
        format!(
            "{original_request_id}/{point:?}/{}",
            step.map(|s| s.step_id.as_str()).unwrap_or("plan")
        )
    }

    /// Record that the suspension point behind `checkpoint` has a decision;
    /// called before resuming so the gate lets execution through.
    pub fn mark_decided(&self, checkpoint: &ExecutionCheckpoint) {
        let step_marker = checkpoint
            .current_step
            .as_deref()
            .unwrap_or("plan")
            .to_string();
        self.decided.insert(format!(
            "{}/{:?}/{}",
            checkpoint.original_request_id, checkpoint.interrupt_point, step_marker
        ));
    }

    /// Forget decisions for a request (terminal outcome, tests).
    pub fn clear_decisions(&self, original_request_id: &str) {
        self.decided
            .retain(|marker| !marker.starts_with(&format!("{original_request_id}/")));
    }

    async fn suspend(
        &self,
        ctx: &ExecutionContext,
        point: InterruptPoint,
        plan: &RoutingPlan,
        completed: &[StepResult],
        current_step: Option<&RoutingStep>,
    ) -> OrchestratorResult<()> {
        let mut checkpoint = ExecutionCheckpoint::new(
            ctx.request_id.clone(),
            point,
            plan.clone(),
            self.config.wait_window,
        )
        .with_original_request_id(ctx.original_request_id.clone())
        .with_request_mode(ctx.request_mode);

        checkpoint.completed_results = completed.to_vec();
        if let Some(step) = current_step {
            checkpoint.current_step = Some(step.step_id.clone());
            checkpoint.resolved_parameters = step.metadata.parameters.clone();
            checkpoint.decision_metadata.insert(
                "component".to_string(),
                serde_json::Value::String(step.component_name.clone()),
            );
            checkpoint.decision_metadata.insert(
                "capability".to_string(),
                serde_json::Value::String(step.metadata.capability.clone()),
            );
            checkpoint.decision_metadata.insert(
                "instruction".to_string(),
                serde_json::Value::String(step.instruction.clone()),
            );
        }

        if let Err(e) = self.store.put(&checkpoint, self.config.wait_window).await {
            // A checkpoint that cannot be persisted cannot be resumed; better
            // to keep executing than to strand the plan.
            warn!(error = %e, "checkpoint persist failed, continuing without suspension");
            return Ok(());
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(&checkpoint).await;
        }

        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            point = ?point,
            step = ?checkpoint.current_step,
            "execution suspended, awaiting human decision"
        );

        Err(OrchestratorError::Interrupted(checkpoint.checkpoint_id))
    }
}

#[async_trait]
impl InterruptGate for InterruptController {
    async fn check(
        &self,
        ctx: &ExecutionContext,
        point: InterruptPoint,
        plan: &RoutingPlan,
        completed: &[StepResult],
        current_step: Option<&RoutingStep>,
    ) -> OrchestratorResult<()> {
        if !self.config.enabled || !self.config.interrupt_points.contains(&point) {
            return Ok(());
        }
        if !self.policy.should_interrupt(point, plan, current_step) {
            return Ok(());
        }
        if self
            .decided
            .contains(&Self::marker(&ctx.original_request_id, point, current_step))
        {
            return Ok(());
        }

        self.suspend(ctx, point, plan, completed, current_step).await
    }
}
