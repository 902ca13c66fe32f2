//! Best-effort readers for the object store's loosely shaped responses.
use reqwest::Url;
use serde_json::Value;

/// Error bodies are cut to this many characters.
pub const MAX_ERROR_BODY: usize = 500;

pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{}…", head)
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `id`, then `response.id`, then `response.result.id`.
pub fn extract_record_id(body: &Value) -> Option<String> {
    ["/id", "/response/id", "/response/result/id"]
        .iter()
        .find_map(|ptr| body.pointer(ptr).and_then(as_id))
}

/// A field of a fetched record; the Data API nests it under `response`.
pub fn record_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    record
        .get("response")
        .and_then(|r| r.get(field))
        .or_else(|| record.get(field))
}

/// URL out of a file-upload response body: `url`, `file_url`, `fileUrl`,
/// `response.url`, else the raw text. Returns `None` unless the result is an
/// absolute http(s) URL.
pub fn extract_upload_url(text: &str) -> Option<String> {
    let raw = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => {
            let body = Value::Object(map);
            ["/url", "/file_url", "/fileUrl", "/response/url"]
                .iter()
                .find_map(|ptr| body.pointer(ptr).and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| text.to_string())
        }
        Ok(Value::String(s)) => s,
        _ => text.to_string(),
    };
    let normalized = normalize_url(&raw);
    is_http_url(&normalized).then_some(normalized)
}

/// Strip quotes and whitespace; `//host/path` becomes `https://host/path`.
pub fn normalize_url(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    if cleaned.starts_with("//") {
        format!("https:{}", cleaned)
    } else {
        cleaned.to_string()
    }
}

pub fn is_http_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
