//! Tolerant reader for the model's structured answer.
//!
//! The model is asked for a JSON object with `populated_fields`, `missing_data`
//! and `assumptions`, but what comes back may be wrapped in a markdown fence,
//! cut off mid-array, or not JSON at all. [`parse`] never fails: it walks a
//! ladder of strict parse, partial recovery of complete array elements, and
//! finally an empty result carrying a diagnostic.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::types::ParseStatus;
use crate::template::types::value_type_name;

pub const NO_JUSTIFICATION: &str = "No justification provided";
pub const TRUNCATION_NOTE: &str = "Response was truncated";
pub const MALFORMED_NOTE: &str = "Response was not valid JSON; only complete entries were recovered";

/// A value the model proposes for one template cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub field_code: String,
    /// May be `Value::Null` when the model explicitly declines to give a value.
    pub value: Value,
    pub justification: String,
    pub source_rule_ids: Vec<String>,
    /// Raw confidence string as the model wrote it.
    pub confidence: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub populated_fields: Vec<FieldCandidate>,
    pub missing_data: Vec<String>,
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ModelOutput),
    /// Only complete array elements survived; the string says what went wrong.
    PartiallyRecovered(ModelOutput, String),
    Failed(String),
}

impl ParseOutcome {
    pub fn status(&self) -> ParseStatus {
        match self {
            ParseOutcome::Parsed(_) => ParseStatus::Parsed,
            ParseOutcome::PartiallyRecovered(..) => ParseStatus::PartiallyRecovered,
            ParseOutcome::Failed(_) => ParseStatus::Failed,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::PartiallyRecovered(_, note) => Some(note),
            ParseOutcome::Failed(diag) => Some(diag),
        }
    }

    /// The model output and, on failure, the error text. A failed parse yields
    /// empty lists.
    pub fn into_output(self) -> (ModelOutput, Option<String>) {
        match self {
            ParseOutcome::Parsed(out) | ParseOutcome::PartiallyRecovered(out, _) => (out, None),
            ParseOutcome::Failed(diag) => (ModelOutput::default(), Some(diag)),
        }
    }
}

pub fn parse(raw: &str) -> ParseOutcome {
    let body = strip_code_fence(raw);

    let strict_error = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => return ParseOutcome::Parsed(normalize(&map)),
        Ok(other) => format!("expected a JSON object, got {}", value_type_name(&other)),
        Err(e) => e.to_string(),
    };
    warn!(error = %strict_error, len = body.len(), "Strict parse failed, attempting partial recovery");

    match recover(body) {
        Some((output, truncated)) => {
            let note = format!(
                "{}: recovered {} field entries ({})",
                if truncated { TRUNCATION_NOTE } else { MALFORMED_NOTE },
                output.populated_fields.len(),
                strict_error
            );
            debug!(recovered = output.populated_fields.len(), truncated, "Partial recovery succeeded");
            ParseOutcome::PartiallyRecovered(output, note)
        }
        None => {
            warn!("Partial recovery failed");
            ParseOutcome::Failed(format!("Failed to parse model response: {}", strict_error))
        }
    }
}

/// Remove a surrounding markdown fence: an opening line of three backticks with an
/// optional language tag, and an optional closing fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some((opener, body)) = rest.split_once('\n') else {
        return text;
    };
    let is_tag = opener
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !is_tag {
        return text;
    }
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn recover(body: &str) -> Option<(ModelOutput, bool)> {
    let fields = extract_array(body, "populated_fields")?;
    if !fields.closed && fields.items.is_empty() {
        return None;
    }
    let mut truncated = !fields.closed;

    let mut map = Map::new();
    map.insert("populated_fields".to_string(), Value::Array(fields.items));
    for key in ["missing_data", "assumptions"] {
        if let Some(arr) = extract_array(body, key) {
            truncated |= !arr.closed;
            map.insert(key.to_string(), Value::Array(arr.items));
        }
    }

    let mut output = normalize(&map);
    let note = if truncated { TRUNCATION_NOTE } else { MALFORMED_NOTE };
    if !output.missing_data.iter().any(|m| m == note) {
        output.missing_data.push(note.to_string());
    }
    Some((output, truncated))
}

struct RecoveredArray {
    items: Vec<Value>,
    /// The closing bracket was found.
    closed: bool,
}

static ARRAY_KEY: OnceLock<Option<Regex>> = OnceLock::new();

/// Matches the opening of any of the three top-level arrays.
fn array_key() -> Option<&'static Regex> {
    ARRAY_KEY
        .get_or_init(|| Regex::new(r#""(populated_fields|missing_data|assumptions)"\s*:\s*\["#).ok())
        .as_ref()
}

/// Byte offset just past `"key": [` for the first occurrence of `key`.
fn array_start(body: &str, key: &str) -> Option<usize> {
    array_key()?
        .captures_iter(body)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == Some(key))
        .and_then(|caps| caps.get(0))
        .map(|m| m.end())
}

/// Locate `"key": [` and parse every complete element that follows it.
fn extract_array(body: &str, key: &str) -> Option<RecoveredArray> {
    let start = array_start(body, key)?;
    let rest = &body[start..];

    let (end, closed) = complete_prefix(rest);
    let source = rest[..end].trim_end().trim_end_matches(',');
    match serde_json::from_str::<Vec<Value>>(&format!("[{}]", source)) {
        Ok(items) => Some(RecoveredArray { items, closed }),
        Err(e) => {
            debug!(key, error = %e, "Recovered array source did not parse");
            None
        }
    }
}

/// Length of the prefix of an array body that holds only complete elements,
/// and whether the array's closing bracket was reached.
fn complete_prefix(rest: &str) -> (usize, bool) {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut complete = 0usize;

    for (i, c) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if depth == 0 {
                    complete = i + 1;
                }
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' if depth == 0 => return (i, true),
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    complete = i + 1;
                }
            }
            ',' if depth == 0 => complete = i,
            _ => {}
        }
    }
    (complete, false)
}

fn normalize(map: &Map<String, Value>) -> ModelOutput {
    let populated_fields = match map.get("populated_fields") {
        Some(Value::Array(items)) => items.iter().filter_map(candidate_from).collect(),
        Some(other) => {
            warn!(kind = value_type_name(other), "populated_fields is not an array");
            Vec::new()
        }
        None => {
            warn!("Missing key in model response: populated_fields");
            Vec::new()
        }
    };

    ModelOutput {
        populated_fields,
        missing_data: string_list(map, "missing_data"),
        assumptions: string_list(map, "assumptions"),
    }
}

fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Null) | None => {
            warn!(key, "Missing key in model response");
            Vec::new()
        }
        Some(other) => {
            warn!(key, kind = value_type_name(other), "Ignoring non-list value");
            Vec::new()
        }
    }
}

fn candidate_from(item: &Value) -> Option<FieldCandidate> {
    let Some(obj) = item.as_object() else {
        warn!(kind = value_type_name(item), "Dropping non-object field entry");
        return None;
    };

    let field_code = obj
        .get("field_code")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let (Some(field_code), Some(value)) = (field_code, obj.get("value")) else {
        warn!(entry = %item, "Dropping field entry without field_code and value");
        return None;
    };

    let justification = obj
        .get("justification")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|j| !j.is_empty())
        .unwrap_or(NO_JUSTIFICATION)
        .to_string();

    let source_rule_ids = match obj.get("source_rule_ids").or_else(|| obj.get("source_rules")) {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(id)) if !id.trim().is_empty() => vec![id.trim().to_string()],
        _ => Vec::new(),
    };

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Some(FieldCandidate {
        field_code: field_code.to_string(),
        value: value.clone(),
        justification,
        source_rule_ids,
        confidence,
    })
}
