//! 微解析器
//! Micro-resolver
//!
//! Single-capability model call that extracts or infers parameter values
//! from source data when auto-wiring leaves required gaps.  All semantic
//! inference (synonyms, domain mapping) is delegated here so the auto-wirer
//! can stay a trivial name matcher.

use super::coerce::coerce;
use crate::plan::extract::strip_code_fences;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tutti_kernel::component::{Capability, ParameterType};
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::{CompletionRequest, FunctionCallOutcome, FunctionDef, LLMProvider};

/// Deterministic extraction: micro-resolution runs at temperature zero.
const MICRO_TEMPERATURE: f32 = 0.0;

pub struct MicroResolver {
    provider: Arc<dyn LLMProvider>,
}

impl MicroResolver {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Extract parameter values for `capability` from `source`.
    ///
    /// `missing_hint` names the required-but-unmapped parameters the caller
    /// still needs; the model is pointed at them, and the call fails with
    /// [`OrchestratorError::MicroResolutionFailed`] when any of them is
    /// absent from the reply.
    pub async fn resolve(
        &self,
        source: &Map<String, Value>,
        capability: &Capability,
        missing_hint: &[String],
    ) -> OrchestratorResult<BTreeMap<String, Value>> {
        let raw = if self.provider.supports_functions() {
            self.resolve_via_functions(source, capability).await?
        } else {
            self.resolve_via_text(source, capability, missing_hint).await?
        };

        // Coerce each extracted field toward the schema type.
        let mut resolved = BTreeMap::new();
        for (name, value) in raw {
            let coerced = match capability.parameter(&name) {
                Some(def) => coerce(&value, def.param_type).0,
                None => value,
            };
            resolved.insert(name, coerced);
        }

        for required in missing_hint {
            if !resolved.contains_key(required) {
                return Err(OrchestratorError::MicroResolutionFailed(format!(
                    "model reply omitted required parameter '{required}' for capability '{}'",
                    capability.name
                )));
            }
        }

        Ok(resolved)
    }

    /// Derive a single value by name when a template path missed.
    pub async fn resolve_single(
        &self,
        source: &Map<String, Value>,
        name: &str,
        hint: &str,
        target: ParameterType,
    ) -> OrchestratorResult<Value> {
        let prompt = format!(
            "Source data (JSON):\n{}\n\nExtract or derive the value for \"{name}\".\n{hint}\n\
             Respond with a JSON object of the form {{\"{name}\": <value>}} and nothing else.",
            serde_json::to_string_pretty(source).unwrap_or_default(),
        );

        let completion = self
            .provider
            .generate(
                CompletionRequest::new(prompt)
                    .system("You extract exact values from JSON data. Respond with bare JSON only.")
                    .temperature(MICRO_TEMPERATURE),
            )
            .await?;

        let parsed = parse_object_reply(&completion.content)?;
        let value = parsed.get(name).cloned().ok_or_else(|| {
            OrchestratorError::MicroResolutionFailed(format!(
                "model reply omitted value for '{name}'"
            ))
        })?;

        Ok(coerce(&value, target).0)
    }

    async fn resolve_via_functions(
        &self,
        source: &Map<String, Value>,
        capability: &Capability,
    ) -> OrchestratorResult<Map<String, Value>> {
        let function = FunctionDef::new(
            format!("fill_{}", capability.name),
            format!("Provide parameters for the '{}' capability", capability.name),
            parameter_schema(capability),
        );

        let prompt = format!(
            "Source data (JSON):\n{}\n\nCall the function with parameter values taken from the \
             source data. Infer values only when the data clearly implies them.",
            serde_json::to_string_pretty(source).unwrap_or_default(),
        );

        let outcome = self
            .provider
            .generate_with_functions(
                CompletionRequest::new(prompt).temperature(MICRO_TEMPERATURE),
                &[function],
            )
            .await?;

        match outcome {
            FunctionCallOutcome::Call { arguments, .. } => match arguments {
                Value::Object(map) => Ok(map),
                other => Err(OrchestratorError::MicroResolutionFailed(format!(
                    "function call arguments were not an object: {other}"
                ))),
            },
            FunctionCallOutcome::Content { content } => {
                // Provider declined to call; fall back to parsing the text.
                debug!("function-calling provider replied with content, parsing as JSON");
                parse_object_reply(&content)
            }
        }
    }

    async fn resolve_via_text(
        &self,
        source: &Map<String, Value>,
        capability: &Capability,
        missing_hint: &[String],
    ) -> OrchestratorResult<Map<String, Value>> {
        let mut schema_lines = String::new();
        for param in &capability.parameters {
            schema_lines.push_str(&format!(
                "- {} ({:?}{}): {}\n",
                param.name,
                param.param_type,
                if param.required { ", required" } else { "" },
                param.description,
            ));
        }

        let mut prompt = format!(
            "Capability: {}\nParameters:\n{}\nSource data (JSON):\n{}\n",
            capability.name,
            schema_lines,
            serde_json::to_string_pretty(source).unwrap_or_default(),
        );
        if !missing_hint.is_empty() {
            prompt.push_str(&format!(
                "\nThe following required parameters are still unresolved: {}.\n",
                missing_hint.join(", ")
            ));
        }
        prompt.push_str(
            "\nRespond with a single JSON object mapping parameter names to values. \
             No markdown, no explanations.",
        );

        let completion = self
            .provider
            .generate(
                CompletionRequest::new(prompt)
                    .system(
                        "You map source data onto a capability's parameters. \
                         Respond with bare JSON only.",
                    )
                    .temperature(MICRO_TEMPERATURE),
            )
            .await?;

        if completion.is_empty() {
            warn!(capability = %capability.name, "micro-resolution got an empty reply");
            return Err(OrchestratorError::MicroResolutionFailed(
                "empty model reply".to_string(),
            ));
        }

        parse_object_reply(&completion.content)
    }
}

/// Strip markdown fencing and parse a JSON object.
fn parse_object_reply(content: &str) -> OrchestratorResult<Map<String, Value>> {
    let stripped = strip_code_fences(content);
    let value: Value = serde_json::from_str(stripped.trim()).map_err(|e| {
        OrchestratorError::MicroResolutionFailed(format!("reply is not valid JSON: {e}"))
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(OrchestratorError::MicroResolutionFailed(format!(
            "reply is not a JSON object: {other}"
        ))),
    }
}

/// JSON Schema for the capability's parameters (function-calling mode).
fn parameter_schema(capability: &Capability) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in &capability.parameters {
        let type_name = match param.param_type {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        };
        properties.insert(
            param.name.clone(),
            serde_json::json!({"type": type_name, "description": param.description}),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
