//! 计划校验
//! Plan validation
//!
//! A parsed plan is only executable when every step resolves against the
//! catalog and the dependency graph is a well-formed DAG.  Validation
//! failures trigger one regeneration attempt with the error appended to the
//! prompt.

use super::parser::PlanParser;
use crate::catalog::ComponentCatalog;
use tracing::warn;
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::plan::RoutingPlan;

/// Check a plan against the catalog and its own step graph.
pub async fn validate_plan(
    plan: &RoutingPlan,
    catalog: &ComponentCatalog,
) -> OrchestratorResult<()> {
    for step in &plan.steps {
        let component = catalog
            .find_component(&step.component_name)
            .await
            .ok_or_else(|| {
                OrchestratorError::PlanInvalid(format!(
                    "step '{}' references unknown component '{}'",
                    step.step_id, step.component_name
                ))
            })?;

        let capability = &step.metadata.capability;
        if !capability.is_empty() && component.capability(capability).is_none() {
            return Err(OrchestratorError::PlanInvalid(format!(
                "step '{}' references unknown capability '{}' on component '{}'",
                step.step_id, capability, step.component_name
            )));
        }
    }

    if let Err(e) = plan.dependencies_resolve() {
        return Err(OrchestratorError::PlanInvalid(e));
    }
    if !plan.is_acyclic() {
        return Err(OrchestratorError::PlanInvalid(
            "step graph contains a cycle".to_string(),
        ));
    }

    Ok(())
}

/// Generate a plan and validate it, regenerating once on validation failure.
pub async fn generate_validated(
    parser: &PlanParser,
    ctx: &ExecutionContext,
    prompt: &str,
    original_request: &str,
    catalog: &ComponentCatalog,
) -> OrchestratorResult<RoutingPlan> {
    let plan = parser.generate(ctx, prompt, original_request).await?;

    match validate_plan(&plan, catalog).await {
        Ok(()) => Ok(plan),
        Err(validation_error) => {
            warn!(error = %validation_error, "plan validation failed, regenerating once");
            let augmented = format!(
                "{prompt}\n\nValidation Error: {validation_error}\n\
                 Regenerate the plan. Use only component and capability names listed above, \
                 and make every depends_on entry reference a step_id present in the plan."
            );
            let plan = parser.generate(ctx, &augmented, original_request).await?;
            validate_plan(&plan, catalog).await?;
            Ok(plan)
        }
    }
}
