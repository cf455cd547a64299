//! Conversion of tool-call arguments between structured values and text.
//!
//! Model output is free text, so decoding never fails: anything that is not
//! valid JSON is kept as a JSON string holding the trimmed text.

use serde_json::Value;

/// Decodes argument text into a structured value.
///
/// The text is trimmed first. Valid JSON decodes to its value; anything
/// else becomes `Value::String` with the trimmed text. Empty text decodes
/// to an empty object.
pub fn decode(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Like [`decode`], but warns when the payload claimed to be JSON and was not.
pub fn decode_with_hint(text: &str, content_type: Option<&str>) -> Value {
    let value = decode(text);
    if value.is_string() && content_type.is_some_and(|ct| ct.eq_ignore_ascii_case("json")) {
        tracing::warn!(
            payload = text.trim(),
            "arguments declared as json did not parse, keeping raw text"
        );
    }
    value
}

/// Encodes a structured value as compact JSON text.
///
/// `decode(&encode(&v)) == v` for every value `decode` can produce, so
/// decode → encode → decode is stable.
pub fn encode(value: &Value) -> String {
    value.to_string()
}

/// Renders a single parameter value for a tag-delimited call block: strings
/// appear verbatim (trimmed), everything else as compact JSON.
pub fn encode_parameter(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Inverse of [`encode_parameter`]: trimmed JSON when it parses, otherwise
/// the trimmed text. Unlike [`decode`], an empty value stays an empty string.
pub fn decode_parameter(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Flattens call arguments into named parameters.
///
/// Objects yield their entries sorted by key. Arrays are positional and
/// yield `arg_0`, `arg_1`, … in order. `null` yields nothing and any other
/// scalar becomes `arg_0`.
pub fn named_parameters(arguments: &Value) -> Vec<(String, &Value)> {
    match arguments {
        Value::Object(map) => {
            let mut entries: Vec<(String, &Value)> =
                map.iter().map(|(k, v)| (k.clone(), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("arg_{i}"), v))
            .collect(),
        Value::Null => Vec::new(),
        scalar => vec![("arg_0".to_string(), scalar)],
    }
}
