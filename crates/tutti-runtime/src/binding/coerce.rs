//! 标量类型转换
//! Scalar type coercion
//!
//! Pure, deterministic, non-destructive: a value that cannot be converted is
//! returned unchanged and flagged, never dropped.  Idempotent by
//! construction — an already-correct value passes through.

use serde_json::Value;
use tutti_kernel::component::{Capability, ParameterType};
use std::collections::BTreeMap;

/// Whether a coercion changed the value into the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceOutcome {
    /// Value now has the target type (possibly unchanged).
    Coerced,
    /// Incompatible conversion; the original value was kept.
    NotCoerced,
}

impl CoerceOutcome {
    pub fn is_coerced(&self) -> bool {
        matches!(self, CoerceOutcome::Coerced)
    }
}

/// Convert a scalar value toward the target type.
///
/// Rules:
/// - Already-correct types pass through.
/// - Strings parse into number/integer/boolean; integer targets reject
///   fractional strings; boolean accepts case-insensitive `true`/`false`
///   only.
/// - Numbers widen to number targets; whole floats narrow to integer.
/// - Anything else returns the original value flagged [`CoerceOutcome::NotCoerced`].
pub fn coerce(value: &Value, target: ParameterType) -> (Value, CoerceOutcome) {
    if target.matches(value) {
        return (value.clone(), CoerceOutcome::Coerced);
    }

    match target {
        ParameterType::Number => coerce_number(value),
        ParameterType::Integer => coerce_integer(value),
        ParameterType::Boolean => coerce_boolean(value),
        ParameterType::String => coerce_string(value),
        // No coercion into compound types.
        ParameterType::Array | ParameterType::Object => {
            (value.clone(), CoerceOutcome::NotCoerced)
        }
    }
}

fn coerce_number(value: &Value) -> (Value, CoerceOutcome) {
    if let Value::String(s) = value {
        if let Ok(f) = s.trim().parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return (Value::Number(n), CoerceOutcome::Coerced);
            }
        }
    }
    (value.clone(), CoerceOutcome::NotCoerced)
}

fn coerce_integer(value: &Value) -> (Value, CoerceOutcome) {
    match value {
        // "3.5" must not silently truncate
        Value::String(s) => {
            if let Ok(i) = s.trim().parse::<i64>() {
                return (Value::Number(i.into()), CoerceOutcome::Coerced);
            }
            (value.clone(), CoerceOutcome::NotCoerced)
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.is_finite() {
                    return (Value::Number((f as i64).into()), CoerceOutcome::Coerced);
                }
            }
            (value.clone(), CoerceOutcome::NotCoerced)
        }
        _ => (value.clone(), CoerceOutcome::NotCoerced),
    }
}

fn coerce_boolean(value: &Value) -> (Value, CoerceOutcome) {
    if let Value::String(s) = value {
        match s.trim().to_lowercase().as_str() {
            "true" => return (Value::Bool(true), CoerceOutcome::Coerced),
            "false" => return (Value::Bool(false), CoerceOutcome::Coerced),
            _ => {}
        }
    }
    (value.clone(), CoerceOutcome::NotCoerced)
}

fn coerce_string(value: &Value) -> (Value, CoerceOutcome) {
    match value {
        Value::Number(n) => (Value::String(n.to_string()), CoerceOutcome::Coerced),
        Value::Bool(b) => (Value::String(b.to_string()), CoerceOutcome::Coerced),
        _ => (value.clone(), CoerceOutcome::NotCoerced),
    }
}

/// Coerce every parameter present in `params` against the capability schema.
/// Parameters without a schema entry are left as-is.
pub fn coerce_map(
    params: &BTreeMap<String, Value>,
    capability: &Capability,
) -> BTreeMap<String, Value> {
    params
        .iter()
        .map(|(name, value)| {
            let coerced = match capability.parameter(name) {
                Some(def) => coerce(value, def.param_type).0,
                None => value.clone(),
            };
            (name.clone(), coerced)
        })
        .collect()
}
