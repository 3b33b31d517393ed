//! Extraction of the structured assessment payload embedded in assistant
//! text output.
//!
//! When the assistant has gathered enough signal it emits its profile as a
//! fenced ```json block inside an otherwise free-form text item. Only
//! blocks tagged `json` count; the first such block wins and any later ones
//! in the same text are ignored. A fence whose body fails to parse yields
//! the parse error so the caller can log it and move on.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\n(.*?)\n```").expect("fence pattern is valid"));

/// Locate the body of the first ```json fence in `text`, if any.
pub fn find_fenced_json(text: &str) -> Option<&str> {
    FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract the structured payload from assistant text.
///
/// Returns `None` when no ```json fence is present, `Some(Ok(value))` for a
/// well-formed payload, and `Some(Err(_))` when a fence exists but its body
/// is not valid JSON.
pub fn extract_payload(text: &str) -> Option<Result<serde_json::Value, serde_json::Error>> {
    find_fenced_json(text).map(serde_json::from_str)
}
