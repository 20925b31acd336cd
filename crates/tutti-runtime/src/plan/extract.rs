//! JSON 提取
//! JSON extraction from noisy model output
//!
//! Model replies wrap JSON in prose, markdown fences, and stray emphasis
//! markers.  The pipeline here recovers the first complete JSON object:
//! fence stripping → string-safe brace scan → conservative markdown-inside-
//! string cleanup.  Only the string-safe scanner exists; a naive depth
//! counter would be fooled by braces inside string literals.

use tutti_kernel::error::{OrchestratorError, OrchestratorResult};

/// Strip ```json ... ``` / ``` ... ``` fencing, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}

/// Index one past the `}` matching the `{` at `start`.
///
/// Tracks brace depth while respecting string literals and backslash
/// escapes, so `{"note": "a } inside"}` scans correctly.
pub fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Conservative markdown cleanup inside an extracted JSON candidate:
/// `**x**` → `x` and `*x*` → `x`, applied only when the emphasized content
/// contains no JSON structural characters and is shorter than 100 chars.
pub fn clean_markdown_in_strings(text: &str) -> String {
    let strip_emphasis = |input: &str, marker: &str| -> String {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find(marker) {
            let after_open = &rest[open + marker.len()..];
            match after_open.find(marker) {
                Some(close) => {
                    let content = &after_open[..close];
                    // An empty match means the `*` pass is looking at a `**`
                    // pair; leave it for real content only.
                    let safe = !content.is_empty()
                        && content.len() < 100
                        && !content
                            .chars()
                            .any(|c| matches!(c, '{' | '}' | '[' | ']' | '"' | ',' | ':'));
                    if safe {
                        output.push_str(&rest[..open]);
                        output.push_str(content);
                        rest = &after_open[close + marker.len()..];
                    } else {
                        output.push_str(&rest[..open + marker.len()]);
                        rest = after_open;
                    }
                }
                None => break,
            }
        }
        output.push_str(rest);
        output
    };

    let pass = strip_emphasis(text, "**");
    strip_emphasis(&pass, "*")
}

/// Recover the first complete JSON object from raw model output.
pub fn extract_json_object(raw: &str) -> OrchestratorResult<String> {
    let unfenced = strip_code_fences(raw);

    let start = unfenced.find('{').ok_or_else(|| {
        OrchestratorError::PlanParseFailed("no JSON object found in model output".to_string())
    })?;

    let end = find_json_end(unfenced, start).ok_or_else(|| {
        OrchestratorError::PlanParseFailed(
            "unbalanced braces in model output".to_string(),
        )
    })?;

    Ok(clean_markdown_in_strings(&unfenced[start..end]))
}
