//! 自动装配
//! Auto-wiring
//!
//! Fill a capability's parameters from a flat source map by name alone.
//! Deliberately trivial: exact match, case-insensitive match, one level of
//! nested objects keyed by their own `name`/`code`/`id` field.  No fuzzy or
//! semantic matching, no domain vocabulary — everything smarter belongs to
//! the micro-resolver.

use super::coerce::{CoerceOutcome, coerce};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use tutti_kernel::component::CapabilityParameter;

/// Fields a nested object may use to announce what it is.
const NESTED_KEY_FIELDS: [&str; 3] = ["name", "code", "id"];

/// Result of one auto-wiring pass.
#[derive(Debug, Clone, Default)]
pub struct WireOutcome {
    /// Parameters that found a value, coerced toward the schema type.
    pub resolved: BTreeMap<String, Value>,
    /// Parameter names nothing in the source matched.
    pub unmapped: Vec<String>,
}

impl WireOutcome {
    /// Required parameters (from the given schema slice) still missing.
    pub fn missing_required<'a>(
        &self,
        params: &'a [CapabilityParameter],
    ) -> Vec<&'a CapabilityParameter> {
        params
            .iter()
            .filter(|p| p.required && !self.resolved.contains_key(&p.name))
            .collect()
    }
}

/// Wire `params` from the flat `source` map.
pub fn auto_wire(source: &Map<String, Value>, params: &[CapabilityParameter]) -> WireOutcome {
    let mut outcome = WireOutcome::default();

    for param in params {
        match find_value(source, &param.name) {
            Some(value) => {
                let (coerced, result) = coerce(&value, param.param_type);
                if result == CoerceOutcome::NotCoerced {
                    debug!(
                        parameter = %param.name,
                        "auto-wired value kept uncoerced, type mismatch with schema"
                    );
                }
                outcome.resolved.insert(param.name.clone(), coerced);
            }
            None => outcome.unmapped.push(param.name.clone()),
        }
    }

    outcome
}

/// Match order: exact key → case-insensitive key → one level of nested
/// objects whose own name/code/id field equals the parameter name.
fn find_value(source: &Map<String, Value>, name: &str) -> Option<Value> {
    if let Some(value) = source.get(name) {
        return Some(value.clone());
    }

    let lowered = name.to_lowercase();
    for (key, value) in source {
        if key.to_lowercase() == lowered {
            return Some(value.clone());
        }
    }

    for value in source.values() {
        if let Value::Object(nested) = value {
            for field in NESTED_KEY_FIELDS {
                if let Some(Value::String(tag)) = nested.get(field) {
                    if tag == name || tag.to_lowercase() == lowered {
                        return Some(Value::Object(nested.clone()));
                    }
                }
            }
        }
    }

    None
}
