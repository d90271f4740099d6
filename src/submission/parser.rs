use serde_json::{Map, Value};

use crate::models::SubmissionFields;

/// Parse a request body into submission fields based on Content-Type.
///
/// Only an explicit `application/x-www-form-urlencoded` body is read as form
/// pairs. Everything else, including a missing or unrelated content type,
/// must be a JSON object: the bare field object or `{"data": {...}}`.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<SubmissionFields, String> {
    let raw = match content_type {
        Some(ct) if ct.contains("application/x-www-form-urlencoded") => {
            parse_form_urlencoded(body)?
        }
        _ => serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {e}"))?,
    };

    into_fields(raw)
}

fn into_fields(raw: Value) -> Result<SubmissionFields, String> {
    let Value::Object(mut obj) = raw else {
        return Err("Expected a JSON object of form fields".to_string());
    };

    let obj = match obj.remove("data") {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            obj.insert("data".to_string(), other);
            obj
        }
        None => obj,
    };

    serde_json::from_value(Value::Object(obj)).map_err(|e| format!("Invalid form fields: {e}"))
}

fn parse_form_urlencoded(body: &[u8]) -> Result<Value, String> {
    let body_str = std::str::from_utf8(body).map_err(|e| format!("Invalid UTF-8: {e}"))?;

    let map: Map<String, Value> = form_urlencoded::parse(body_str.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    Ok(Value::Object(map))
}
