//! HITL 服务
//! HITL service
//!
//! Owns the command half of the suspension protocol: load checkpoint,
//! transition its status atomically, apply the command's side effects, and
//! (in a second phase) resume the DAG.  Command acceptance is deliberately
//! decoupled from the long-running resume so clients get fast confirmation
//! and tolerate disconnects between the two phases.

use crate::command::{CommandRequest, HitlCommand, ResumeResult};
use crate::controller::InterruptController;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use tutti_kernel::checkpoint::{CheckpointStatus, CheckpointStore, ExecutionCheckpoint};
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::plan::StepResult;
use tutti_runtime::catalog::ComponentCatalog;
use tutti_runtime::orchestrator::{Orchestrator, OrchestratorResponse};
use tutti_runtime::plan::validate_plan;

pub struct HitlService {
    store: Arc<dyn CheckpointStore>,
    controller: Arc<InterruptController>,
    orchestrator: Arc<Orchestrator>,
    catalog: Arc<ComponentCatalog>,
}

impl HitlService {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        controller: Arc<InterruptController>,
        orchestrator: Arc<Orchestrator>,
        catalog: Arc<ComponentCatalog>,
    ) -> Self {
        Self {
            store,
            controller,
            orchestrator,
            catalog,
        }
    }

    /// Phase one: accept a command against a pending checkpoint.
    pub async fn ingest_command(
        &self,
        request: CommandRequest,
    ) -> OrchestratorResult<ResumeResult> {
        let mut checkpoint = self
            .store
            .get(&request.checkpoint_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::CheckpointNotFound(request.checkpoint_id.clone())
            })?;

        if !checkpoint.status.is_pending() {
            return Err(OrchestratorError::InvalidCommand(format!(
                "checkpoint {} is {:?}, not pending",
                checkpoint.checkpoint_id, checkpoint.status
            )));
        }

        // Side effects that can fail run before the transition so a bad
        // command leaves the checkpoint pending.
        if let HitlCommand::Edit { plan: Some(plan), .. } = &request.command {
            validate_plan(plan, &self.catalog).await?;
        }

        let (next_status, should_resume) = match &request.command {
            HitlCommand::Approve | HitlCommand::Skip | HitlCommand::Retry
            | HitlCommand::Respond { .. } => (CheckpointStatus::Approved, true),
            HitlCommand::Edit { .. } => (CheckpointStatus::Edited, true),
            HitlCommand::Reject { .. } => (CheckpointStatus::Rejected, false),
            HitlCommand::Abort => (CheckpointStatus::Aborted, false),
        };

        // Exactly one concurrent command wins the CAS.
        let transitioned = self
            .store
            .compare_and_set_status(
                &checkpoint.checkpoint_id,
                CheckpointStatus::Pending,
                next_status,
            )
            .await?;
        if !transitioned {
            return Err(OrchestratorError::InvalidCommand(format!(
                "checkpoint {} received a concurrent command",
                checkpoint.checkpoint_id
            )));
        }
        checkpoint.status = next_status;

        // Content updates after the status is owned by this command.
        match request.command {
            HitlCommand::Edit { plan, parameters } => {
                if let Some(plan) = plan {
                    checkpoint.plan = plan;
                }
                if let Some(parameters) = parameters {
                    checkpoint.resolved_parameters = parameters.clone();
                    if let Some(step_id) = checkpoint.current_step.clone() {
                        if let Some(step) = checkpoint.plan.step_mut(&step_id) {
                            step.metadata.parameters = parameters;
                        }
                    }
                }
                self.store.update(&checkpoint).await?;
            }
            HitlCommand::Skip => {
                if let Some(step_id) = checkpoint.current_step.clone() {
                    let component = checkpoint
                        .plan
                        .step(&step_id)
                        .map(|s| s.component_name.clone())
                        .unwrap_or_default();
                    checkpoint.completed_results.push(StepResult::success(
                        &step_id,
                        component,
                        json!({"skipped": true}).to_string(),
                        0,
                        std::time::Duration::ZERO,
                    ));
                    checkpoint
                        .decision_metadata
                        .insert("skipped_step".to_string(), Value::String(step_id));
                    self.store.update(&checkpoint).await?;
                }
            }
            HitlCommand::Reject { reason } => {
                let reason =
                    reason.unwrap_or_else(|| "rejected by operator".to_string());
                checkpoint
                    .decision_metadata
                    .insert("rejection_reason".to_string(), Value::String(reason));
                self.store.update(&checkpoint).await?;
            }
            HitlCommand::Respond { message } => {
                let responses = checkpoint
                    .decision_metadata
                    .entry("responses".to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = responses {
                    items.push(Value::String(message));
                }
                self.store.update(&checkpoint).await?;
            }
            HitlCommand::Retry => {
                // An after_step checkpoint already carries the current
                // step's result; the scheduler skips seeded results on
                // resume, so the entry must go for the step to re-run.
                if let Some(step_id) = checkpoint.current_step.clone() {
                    checkpoint
                        .completed_results
                        .retain(|r| r.step_id != step_id);
                    self.store.update(&checkpoint).await?;
                }
            }
            HitlCommand::Approve | HitlCommand::Abort => {}
        }

        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            status = ?checkpoint.status,
            should_resume,
            "command accepted"
        );

        Ok(ResumeResult {
            should_resume,
            checkpoint,
        })
    }

    /// Phase two: continue a resumable checkpoint's DAG.
    pub async fn resume(
        &self,
        checkpoint_id: &str,
    ) -> OrchestratorResult<OrchestratorResponse> {
        let checkpoint = self
            .store
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| OrchestratorError::CheckpointNotFound(checkpoint_id.to_string()))?;

        if !checkpoint.status.is_resumable() {
            return Err(OrchestratorError::InvalidCommand(format!(
                "checkpoint {} is {:?}, not resumable",
                checkpoint_id, checkpoint.status
            )));
        }

        // Let the gate pass the decided point on re-entry, and restore the
        // request mode into the execution context.
        self.controller.mark_decided(&checkpoint);
        let ctx = ExecutionContext::resumed(
            uuid::Uuid::new_v4().to_string(),
            checkpoint.original_request_id.clone(),
        )
        .with_request_mode(checkpoint.request_mode);

        let response = self
            .orchestrator
            .resume_plan(
                &ctx,
                checkpoint.plan.clone(),
                checkpoint.completed_results.clone(),
            )
            .await?;

        if response.result.interrupted {
            // Suspended again further down the plan; this checkpoint keeps
            // its resumable status and a fresh one now exists.
            return Ok(response);
        }

        let completed = self
            .store
            .compare_and_set_status(
                checkpoint_id,
                checkpoint.status,
                CheckpointStatus::Completed,
            )
            .await?;
        if !completed {
            warn!(checkpoint_id, "checkpoint status moved during resume");
        }

        Ok(response)
    }

    pub async fn get_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> OrchestratorResult<ExecutionCheckpoint> {
        self.store
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| OrchestratorError::CheckpointNotFound(checkpoint_id.to_string()))
    }

    pub async fn list_pending(
        &self,
        request_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> OrchestratorResult<Vec<ExecutionCheckpoint>> {
        self.store.list_pending(request_id, limit, offset).await
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }
}
