use serde_json::Value;

use crate::db::Pass;

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    text.filter(|s| !s.is_empty())
}

fn token_from_object(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    object
        .get("code")
        .and_then(text_of)
        .or_else(|| object.get("id").and_then(text_of))
}

/// Token from an already parsed payload: objects yield `code` then `id`,
/// arrays the first object that has either, strings are normalized as text.
pub fn token_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => token_from_object(value),
        Value::Array(items) => items.iter().find_map(token_from_object),
        Value::String(raw) => normalize_token(raw),
        Value::Number(_) => text_of(value),
        _ => None,
    }
}

/// Token from raw text. JSON-looking input is parsed; if that fails or has
/// no usable field the trimmed text itself is the token.
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(token) = serde_json::from_str::<Value>(trimmed)
            .ok()
            .as_ref()
            .and_then(|parsed| match parsed {
                Value::Object(_) | Value::Array(_) => token_from_value(parsed),
                _ => None,
            })
        {
            return Some(token);
        }
    }

    Some(trimmed.to_string())
}

/// Code matches take priority over id matches.
pub fn find_by_token<'a>(passes: &'a [Pass], token: &str) -> Option<&'a Pass> {
    passes
        .iter()
        .find(|pass| pass.code.trim() == token)
        .or_else(|| passes.iter().find(|pass| pass.id.trim() == token))
}

pub fn find_by_code<'a>(passes: &'a [Pass], raw: &str) -> Option<&'a Pass> {
    let token = normalize_token(raw)?;
    find_by_token(passes, &token)
}

pub fn find_by_value<'a>(passes: &'a [Pass], value: &Value) -> Option<&'a Pass> {
    let token = token_from_value(value)?;
    find_by_token(passes, &token)
}
