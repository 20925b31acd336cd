//! 模板插值
//! Template interpolation
//!
//! Plan steps may reference upstream output with `{{step-id.response.path}}`
//! tokens inside their parameter values.  A value that *is* a single token
//! keeps the JSON type of the referenced data; tokens embedded in a larger
//! string are stringified in place.  Paths that evaluate to nothing are
//! reported back so the executor can fall back to semantic resolution.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\.response((?:\.[A-Za-z0-9_.-]+)?)\s*\}\}")
            .expect("static pattern")
    })
}

/// One template path that evaluated to missing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMiss {
    /// Parameter the token appeared in.
    pub parameter: String,
    /// Full token text, e.g. `{{s1.response.city}}`.
    pub token: String,
    pub step_id: String,
    /// Dotted path under the step response, empty for the whole response.
    pub path: String,
}

/// Result of interpolating one parameter map.
#[derive(Debug, Clone, Default)]
pub struct TemplateOutcome {
    pub parameters: BTreeMap<String, Value>,
    pub misses: Vec<TemplateMiss>,
}

/// Interpolate every `{{step-id.response.path}}` token in `parameters`
/// against the parsed dependency responses.
pub fn interpolate(
    parameters: &BTreeMap<String, Value>,
    dependency_responses: &BTreeMap<String, Value>,
) -> TemplateOutcome {
    let mut outcome = TemplateOutcome::default();

    for (name, value) in parameters {
        let rendered = render_value(name, value, dependency_responses, &mut outcome.misses);
        outcome.parameters.insert(name.clone(), rendered);
    }

    outcome
}

fn render_value(
    parameter: &str,
    value: &Value,
    responses: &BTreeMap<String, Value>,
    misses: &mut Vec<TemplateMiss>,
) -> Value {
    match value {
        Value::String(s) => render_string(parameter, s, responses, misses),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(parameter, item, responses, misses))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(parameter, v, responses, misses)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(
    parameter: &str,
    text: &str,
    responses: &BTreeMap<String, Value>,
    misses: &mut Vec<TemplateMiss>,
) -> Value {
    let pattern = token_pattern();

    // Whole-string token: preserve the JSON type of the referenced value.
    if let Some(caps) = pattern.captures(text) {
        if caps.get(0).map(|m| m.as_str().trim()) == Some(text.trim()) {
            let step_id = &caps[1];
            let path = caps[2].trim_start_matches('.');
            return match lookup(responses, step_id, path) {
                Some(found) => found,
                None => {
                    debug!(parameter, token = text, "template path missed");
                    misses.push(TemplateMiss {
                        parameter: parameter.to_string(),
                        token: text.to_string(),
                        step_id: step_id.to_string(),
                        path: path.to_string(),
                    });
                    Value::String(text.to_string())
                }
            };
        }
    }

    // Embedded tokens: substitute stringified values in place.
    let rendered = pattern.replace_all(text, |caps: &regex::Captures| {
        let step_id = &caps[1];
        let path = caps[2].trim_start_matches('.');
        match lookup(responses, step_id, path) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => {
                misses.push(TemplateMiss {
                    parameter: parameter.to_string(),
                    token: caps[0].to_string(),
                    step_id: step_id.to_string(),
                    path: path.to_string(),
                });
                caps[0].to_string()
            }
        }
    });

    Value::String(rendered.into_owned())
}

/// Walk the dotted path under the step response.  Array indices are numeric
/// segments.
fn lookup(responses: &BTreeMap<String, Value>, step_id: &str, path: &str) -> Option<Value> {
    let mut current = responses.get(step_id)?;

    if path.is_empty() {
        return Some(current.clone());
    }

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }

    Some(current.clone())
}
