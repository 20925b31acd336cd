//! 类型错误模式识别
//! Type-error pattern recognition
//!
//! A 4xx body that matches one of these shapes means the component rejected
//! our parameter *types*, not their meaning — the cheap validation-feedback
//! layer can fix that without consulting the error analyzer.

/// Body fragments that identify a type/unmarshalling failure.
///
/// Matching is case-insensitive substring search; patterns are kept to
/// phrasings observed from real components (Go unmarshalling, serde,
/// JSON-schema validators).
const TYPE_ERROR_PATTERNS: [&str; 8] = [
    "cannot unmarshal",
    "expected number",
    "expected integer",
    "expected boolean",
    "invalid type",
    "type mismatch",
    "cannot convert",
    "json: unknown field",
];

/// Whether a response body matches a known type-error pattern.
pub fn is_type_error(body: &str) -> bool {
    let lowered = body.to_lowercase();
    TYPE_ERROR_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
