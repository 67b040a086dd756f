//! Provider response mapping into canonical result fields.
//!
//! Provider backends return heterogeneous shapes: structured
//! chat-completion objects, JSON-encoded strings, or loosely quoted
//! literals with an object embedded somewhere inside. [`ProviderResponse`]
//! splits the two cases; the `Text` arm attempts a full JSON parse, then
//! the first brace-delimited substring that parses, then a relaxed
//! literal pass, and re-dispatches. A small typed walker then pulls out
//! token usage and the assistant content.

use serde_json::{Deserializer, Value};

/// A provider response prior to mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Structured(Value),
    Text(String),
}

/// Canonical fields extracted from a provider response. `analysis_output`
/// is always emitted: the original text when the response was plain text,
/// otherwise the serialized object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedOutput {
    pub analysed_review: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub analysis_output: String,
}

/// Map a provider response into canonical fields.
pub fn map_response(response: &ProviderResponse) -> MappedOutput {
    match response {
        ProviderResponse::Structured(value) => map_structured(value),
        ProviderResponse::Text(text) => match extract_object(text) {
            Some(value) => map_structured(&value),
            // No object anywhere: pass the text through untouched.
            None => MappedOutput {
                analysis_output: text.clone(),
                ..MappedOutput::default()
            },
        },
    }
}

/// Convenience for already-structured values.
pub fn map_value(value: &Value) -> MappedOutput {
    map_structured(value)
}

fn map_structured(value: &Value) -> MappedOutput {
    let mut mapped = MappedOutput {
        analysis_output: serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        ..MappedOutput::default()
    };

    if let Some(usage) = find_key(value, "usage").and_then(Value::as_object) {
        mapped.input_tokens = usage.get("prompt_tokens").and_then(Value::as_i64);
        mapped.output_tokens = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(Value::as_i64);
        mapped.total_tokens = usage.get("total_tokens").and_then(Value::as_i64);
    }

    if let Some(first) = find_key(value, "choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    {
        let message = first.get("message").or_else(|| first.get("msg"));
        mapped.analysed_review = match message {
            Some(msg) => msg
                .get("content")
                .or_else(|| msg.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            None => first
                .get("text")
                .or_else(|| first.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string),
        };
    }

    mapped
}

/// Recursive search for a key in nested object/array structures.
fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|v| find_key(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// Try to recover a JSON object from loosely formatted text.
fn extract_object(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    if let Some(value) = first_parsable_object(text) {
        return Some(value);
    }
    // Relaxed literal pass: tolerate single quotes and Python-style
    // booleans, then retry both strategies.
    let relaxed = relax_literal(text);
    if relaxed != text {
        if let Ok(value) = serde_json::from_str::<Value>(&relaxed) {
            return Some(value);
        }
        if let Some(value) = first_parsable_object(&relaxed) {
            return Some(value);
        }
    }
    None
}

/// Scan for the first `{`-anchored substring that parses as a JSON value,
/// ignoring whatever trails it.
fn first_parsable_object(text: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
        search_from = start + 1;
    }
    None
}

fn relax_literal(text: &str) -> String {
    text.replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null")
}
