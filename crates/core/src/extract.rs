//! Best-effort structured extraction from free-form model replies.
//!
//! Chat models asked for "only JSON" still wrap replies in markdown fences or
//! chatter around the object. Every parser of a vendor text completion goes
//! through [`extract_structured`] instead of rolling its own cleanup.

use serde::de::DeserializeOwned;

/// Why a completion could not be turned into a typed value.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no JSON object found in completion")]
    NoObject,
    #[error("unbalanced braces in completion")]
    Unbalanced,
    #[error("invalid JSON object: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Removes a surrounding markdown code fence (```` ```json ```` or bare ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop an optional language tag on the opening fence line.
        body = match rest.find('\n') {
            Some(idx) if rest[..idx].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[idx + 1..]
            }
            _ => rest.strip_prefix("json").unwrap_or(rest),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Locates the first complete top-level JSON object in `text`.
///
/// Scans from the first `{` and tracks brace depth, ignoring braces inside
/// string literals.
pub fn locate_object(text: &str) -> Result<&str, ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Err(ExtractError::Unbalanced)
}

/// Parses the first JSON object embedded in a model reply into `T`.
pub fn extract_structured<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let body = strip_code_fence(text);
    let object = locate_object(body)?;
    Ok(serde_json::from_str(object)?)
}
