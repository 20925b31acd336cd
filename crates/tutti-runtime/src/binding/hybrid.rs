//! 混合参数解析
//! Hybrid parameter resolution
//!
//! Coordinates the auto-wirer and the micro-resolver into the final
//! parameter map for a step: name matching first, model inference only for
//! the required gaps, and auto-wired values always win so LLM guesses can
//! never overwrite exact matches.

use super::autowire::{WireOutcome, auto_wire};
use super::micro::MicroResolver;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use tutti_kernel::component::{Capability, ParameterType};
use tutti_kernel::error::OrchestratorResult;
use tutti_kernel::llm::LLMProvider;
use tutti_kernel::plan::StepResult;

pub struct HybridResolver {
    micro: MicroResolver,
}

impl HybridResolver {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            micro: MicroResolver::new(provider),
        }
    }

    /// Produce the parameter map for `capability` from upstream results.
    pub async fn resolve(
        &self,
        dependency_results: &[StepResult],
        capability: &Capability,
    ) -> OrchestratorResult<BTreeMap<String, Value>> {
        let source = merge_dependency_outputs(dependency_results);
        if source.is_empty() {
            return Ok(BTreeMap::new());
        }

        let wired = auto_wire(&source, &capability.parameters);

        if fully_resolved(&wired, capability) {
            return Ok(wired.resolved);
        }

        let missing: Vec<String> = wired
            .missing_required(&capability.parameters)
            .iter()
            .map(|p| p.name.clone())
            .collect();

        debug!(
            capability = %capability.name,
            missing = ?missing,
            "auto-wiring left required gaps, invoking micro-resolution"
        );

        let inferred = self.micro.resolve(&source, capability, &missing).await?;

        // Auto-wiring results take priority on collision.
        let mut resolved = inferred;
        for (name, value) in wired.resolved {
            resolved.insert(name, value);
        }

        Ok(resolved)
    }

    /// Derive one value from source data, for template paths that evaluated
    /// to missing data.
    pub async fn resolve_semantic_value(
        &self,
        source: &Map<String, Value>,
        name: &str,
        hint: &str,
        target: ParameterType,
    ) -> OrchestratorResult<Value> {
        self.micro.resolve_single(source, name, hint, target).await
    }
}

/// All required parameters resolved, or everything unmapped is optional.
fn fully_resolved(wired: &WireOutcome, capability: &Capability) -> bool {
    if wired.unmapped.is_empty() {
        return true;
    }
    wired.missing_required(&capability.parameters).is_empty()
}

/// Merge dependency outputs into one flat source map.
///
/// Failed steps are skipped; later steps override earlier on key collision.
/// Non-object responses land under the step id.
pub fn merge_dependency_outputs(dependency_results: &[StepResult]) -> Map<String, Value> {
    let mut merged = Map::new();

    for result in dependency_results {
        if !result.success {
            continue;
        }
        match result.response_json() {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    merged.insert(key, value);
                }
            }
            Some(other) => {
                merged.insert(result.step_id.clone(), other);
            }
            None => {}
        }
    }

    merged
}
